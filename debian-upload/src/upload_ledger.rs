// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Upload ledgers.

An upload ledger is a `.upload` file sitting next to a `.changes` file. It is the format
`dupload` maintains: one line per event, of the form

```text
u pkg_1.0_amd64.deb ftp.example.com Thu Feb 06 23:04:27 2014
```

The first character is the action (`u` for an uploaded file, `a` for an announcement,
`s` for a successfully completed upload), followed by the file name, the destination, and
the time of the event.

The ledger is append-only. Entries are never rewritten, which makes it the record of
what can be skipped when an interrupted upload is retried.
*/

use {
    crate::{
        control::RejectedLine,
        error::{DebianError, Result},
    },
    chrono::NaiveDateTime,
    log::info,
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        collections::HashMap,
        fmt::{Display, Formatter},
        io::Write,
        path::{Path, PathBuf},
    },
};

/// Format of timestamps in ledger lines.
pub const DATE_FORMAT: &str = "%a %b %d %H:%M:%S %Y";

static LEDGER_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([a-z])\s+(\S+)\s+(\S+)\s+(.+)$").expect("ledger line regex should compile")
});

/// The kind of event recorded in a ledger.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ActionKind {
    /// A file was uploaded.
    Upload,
    /// An upload was announced.
    Announce,
    /// All files of a `.changes` file were uploaded.
    Success,
}

impl ActionKind {
    /// The character representing this action in ledger lines.
    pub fn as_char(&self) -> char {
        match self {
            Self::Upload => 'u',
            Self::Announce => 'a',
            Self::Success => 's',
        }
    }
}

impl TryFrom<char> for ActionKind {
    type Error = char;

    fn try_from(c: char) -> std::result::Result<Self, Self::Error> {
        match c {
            'u' => Ok(Self::Upload),
            'a' => Ok(Self::Announce),
            's' => Ok(Self::Success),
            _ => Err(c),
        }
    }
}

impl Display for ActionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// A single event recorded for a file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerAction {
    pub kind: ActionKind,
    pub destination: String,
    pub timestamp: NaiveDateTime,
}

/// All events recorded for a file name.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LedgerEntry {
    file_name: String,
    actions: Vec<LedgerAction>,
}

impl LedgerEntry {
    pub fn new(file_name: impl ToString) -> Self {
        Self {
            file_name: file_name.to_string(),
            actions: vec![],
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn actions(&self) -> &[LedgerAction] {
        &self.actions
    }

    /// Record an event.
    ///
    /// Destinations must not be empty or contain whitespace.
    pub fn add_action(
        &mut self,
        kind: ActionKind,
        destination: &str,
        timestamp: NaiveDateTime,
    ) -> Result<()> {
        if destination.is_empty() || destination.chars().any(|c| c.is_whitespace()) {
            return Err(DebianError::Other(format!(
                "invalid ledger destination: {:?}",
                destination
            )));
        }

        self.actions.push(LedgerAction {
            kind,
            destination: destination.to_string(),
            timestamp,
        });

        Ok(())
    }

    /// Whether an action of a given kind was recorded.
    pub fn has_action(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.kind == kind)
    }

    /// Lines representing this entry in a ledger file.
    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.actions.iter().map(move |action| {
            format!(
                "{} {} {} {}",
                action.kind,
                self.file_name,
                action.destination,
                action.timestamp.format(DATE_FORMAT)
            )
        })
    }
}

/// Derive the path of the ledger belonging to a `.changes` file.
///
/// `foo_1.0_amd64.changes` has its ledger in `foo_1.0_amd64.upload` in the same directory.
pub fn ledger_path_for(changes_path: &Path) -> PathBuf {
    changes_path.with_extension("upload")
}

/// The events recorded in an upload ledger, keyed by file name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UploadLedger {
    entries: Vec<LedgerEntry>,
    index: HashMap<String, usize>,
}

impl UploadLedger {
    /// Read the ledger at a path.
    ///
    /// A missing file is an empty ledger. Lines that can't be parsed are returned.
    pub fn from_path(path: impl AsRef<Path>) -> Result<(Self, Vec<RejectedLine>)> {
        let path = path.as_ref();
        let mut ledger = Self::default();

        if path.is_dir() {
            return Err(DebianError::LedgerIsDirectory(format!("{}", path.display())));
        }

        let rejected = match std::fs::read_to_string(path) {
            Ok(text) => ledger.parse(&text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => vec![],
            Err(e) => return Err(DebianError::IoPath(format!("{}", path.display()), e)),
        };

        Ok((ledger, rejected))
    }

    /// Parse ledger text into this instance.
    ///
    /// Blank lines are ignored. Every other line that isn't a valid record is returned.
    pub fn parse(&mut self, text: &str) -> Vec<RejectedLine> {
        let mut rejected = vec![];

        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }

            let caps = if let Some(caps) = LEDGER_LINE_RE.captures(line) {
                caps
            } else {
                rejected.push(RejectedLine::new("invalid line format", line));
                continue;
            };

            let kind = caps[1].chars().next().map(ActionKind::try_from);
            let kind = match kind {
                Some(Ok(kind)) => kind,
                _ => {
                    rejected.push(RejectedLine::new(
                        format!("invalid action {:?}", &caps[1]),
                        line,
                    ));
                    continue;
                }
            };

            let timestamp = match NaiveDateTime::parse_from_str(caps[4].trim(), DATE_FORMAT) {
                Ok(timestamp) => timestamp,
                Err(e) => {
                    rejected.push(RejectedLine::new(format!("invalid date format: {}", e), line));
                    continue;
                }
            };

            let mut entry = LedgerEntry::new(&caps[2]);
            if let Err(e) = entry.add_action(kind, &caps[3], timestamp) {
                rejected.push(RejectedLine::new(e, line));
                continue;
            }

            self.merge_entry(entry);
        }

        rejected
    }

    /// Add an entry, appending its actions to an existing entry for the same file name.
    pub fn merge_entry(&mut self, entry: LedgerEntry) {
        if let Some(i) = self.index.get(&entry.file_name) {
            self.entries[*i].actions.extend(entry.actions);
        } else {
            self.index.insert(entry.file_name.clone(), self.entries.len());
            self.entries.push(entry);
        }
    }

    pub fn get(&self, file_name: &str) -> Option<&LedgerEntry> {
        self.index.get(file_name).map(|i| &self.entries[*i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a file name has a recorded [ActionKind::Upload].
    pub fn is_uploaded(&self, file_name: &str) -> bool {
        self.get(file_name)
            .map(|entry| entry.has_action(ActionKind::Upload))
            .unwrap_or(false)
    }

    /// Append the actions of this ledger to a ledger file.
    ///
    /// The file is created if missing. Existing content is never rewritten: a newline is
    /// appended first if the existing content doesn't end with one, then one line per
    /// action.
    pub fn append_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let path_error = |e| DebianError::IoPath(format!("{}", path.display()), e);

        if path.is_dir() {
            return Err(DebianError::LedgerIsDirectory(format!("{}", path.display())));
        }

        let needs_newline = match std::fs::read(path) {
            Ok(data) => data.last().map(|c| *c != b'\n').unwrap_or(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(path_error(e)),
        };

        let mut data = String::new();
        if needs_newline {
            data.push('\n');
        }
        for line in self.entries.iter().flat_map(|entry| entry.lines()) {
            data.push_str(&line);
            data.push('\n');
        }

        let mut fh = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(path_error)?;
        fh.write_all(data.as_bytes()).map_err(path_error)?;
        fh.sync_all().map_err(path_error)?;

        info!(
            "recorded {} ledger entries in {}",
            self.entries.len(),
            path.display()
        );

        Ok(())
    }
}
