// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian `.changes` files.

A `.changes` file is produced by a package build and describes an upload: the source
package, its version, the distributions it targets, and the files that make up the
upload along with their sizes and digests.

See <https://www.debian.org/doc/debian-policy/ch-controlfields.html#debian-changes-files-changes>.
*/

use {
    crate::{
        control::{parse_field_line, ControlField, ControlLineReader, RejectedLine},
        distribution::Distributions,
        error::{DebianError, Result},
        file_entry::{FileEntry, FileEntryRegistry},
        io::{ChecksumType, ContentHasher, DefaultContentHasher},
        package_version::PackageVersion,
    },
    chrono::{DateTime, FixedOffset},
    log::debug,
    once_cell::sync::Lazy,
    regex::Regex,
    std::{
        fmt::{Display, Formatter},
        io::Write,
        path::Path,
    },
    thiserror::Error,
};

/// Format of the `Date` field.
pub const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

static CONTACT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^<>,]*?)\s*<([^<>,\s]+)>$").expect("contact regex should compile")
});

#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ContactError {
    #[error("malformed contact: {0:?}")]
    Malformed(String),
}

/// A person, as `Name <email>`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Contact {
    name: String,
    email: String,
}

impl Contact {
    pub fn new(name: &str, email: &str) -> std::result::Result<Self, ContactError> {
        Self::parse(&format!("{} <{}>", name.trim(), email))
    }

    /// Parse a `Name <email>` string.
    pub fn parse(s: &str) -> std::result::Result<Self, ContactError> {
        let caps = CONTACT_RE
            .captures(s.trim())
            .ok_or_else(|| ContactError::Malformed(s.to_string()))?;

        Ok(Self {
            name: caps[1].trim().to_string(),
            email: caps[2].to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

impl Display for Contact {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.name.is_empty() {
            write!(f, "<{}>", self.email)
        } else {
            write!(f, "{} <{}>", self.name, self.email)
        }
    }
}

/// Parse a list of contacts separated by commas.
///
/// Each `Name <email>` pair stands on its own: a malformed piece between commas is
/// reported without affecting the pairs around it. Returns the parsed contacts and the
/// pieces that could not be parsed.
fn parse_contacts(value: &str) -> (Vec<Contact>, Vec<String>) {
    let mut contacts = vec![];
    let mut bad = vec![];

    let segments = value.split('>').collect::<Vec<_>>();
    let last = segments.len() - 1;

    for (i, segment) in segments.into_iter().enumerate() {
        let piece = segment.trim_start_matches(|c: char| c == ',' || c.is_whitespace());

        if i == last {
            if !piece.trim().is_empty() {
                bad.push(piece.trim().to_string());
            }
        } else {
            // Anything before the last comma ahead of `<` isn't part of this pair.
            let (junk, pair) = match piece.find('<').and_then(|open| piece[..open].rfind(',')) {
                Some(comma) => (&piece[..comma], &piece[comma + 1..]),
                None => ("", piece),
            };

            bad.extend(
                junk.split(',')
                    .map(|s| s.trim())
                    .filter(|s| !s.is_empty())
                    .map(|s| s.to_string()),
            );

            let pair = format!("{}>", pair.trim_start());
            match Contact::parse(&pair) {
                Ok(contact) => contacts.push(contact),
                Err(_) => bad.push(pair),
            }
        }
    }

    (contacts, bad)
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no distributions defined")]
    NoDistributions,

    #[error("UNRELEASED distribution cannot be uploaded")]
    UnreleasedDistribution,

    #[error("no files defined")]
    NoFiles,

    #[error("file entry has no name")]
    FileMissingName,

    #[error("size of {0} is not recorded")]
    SizeMissing(String),

    #[error("size of {name} is {actual}; expected {expected}")]
    SizeMismatch {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("{checksum} of {name} is {actual}; expected {expected}")]
    DigestMismatch {
        name: String,
        checksum: ChecksumType,
        expected: String,
        actual: String,
    },

    #[error("I/O error on path {0}: {1:?}")]
    Io(String, std::io::Error),
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// A line of a multiline value. ` .` stands for an empty line.
fn block_line(line: &str) -> String {
    if line == "." {
        String::new()
    } else {
        line.to_string()
    }
}

fn words(value: &str) -> Vec<String> {
    value.split_whitespace().map(|s| s.to_string()).collect()
}

/// A parsed `.changes` file.
///
/// Fields hold already validated types, so a populated instance only contains values
/// that are valid for their field.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ChangesFile {
    pub format: Option<String>,
    pub date: Option<DateTime<FixedOffset>>,
    pub source: Option<String>,
    pub binaries: Vec<String>,
    pub architectures: Vec<String>,
    pub version: Option<PackageVersion>,
    pub distributions: Distributions,
    pub urgency: Option<String>,
    pub maintainers: Vec<Contact>,
    pub changed_by: Option<Contact>,
    pub short_description: Option<String>,
    pub long_description: Vec<String>,
    pub closes: Vec<String>,
    pub changes: Vec<String>,
    pub files: FileEntryRegistry,
}

impl ChangesFile {
    /// Parse a `.changes` file from its text.
    ///
    /// Returns the parsed instance and the lines that were rejected.
    pub fn parse_str(text: &str) -> (Self, Vec<RejectedLine>) {
        let mut changes = Self::default();
        let rejected = changes.parse(text);

        (changes, rejected)
    }

    /// Read and parse a `.changes` file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<(Self, Vec<RejectedLine>)> {
        let path = path.as_ref();

        let text = std::fs::read_to_string(path)
            .map_err(|e| DebianError::IoPath(format!("{}", path.display()), e))?;

        Ok(Self::parse_str(&text))
    }

    /// Parse text into this instance.
    ///
    /// Parsing never fails. Lines that can't be interpreted are returned, along with the
    /// reason why, and everything else is retained. Files are merged with files already
    /// present in this instance.
    pub fn parse(&mut self, text: &str) -> Vec<RejectedLine> {
        let mut rejected = vec![];
        let mut reader = ControlLineReader::new(text);

        while let Some(line) = reader.next_line() {
            let (name, value) = if let Some(v) = parse_field_line(line) {
                v
            } else {
                rejected.push(RejectedLine::new("not a field definition", line));
                continue;
            };

            match name.to_ascii_lowercase().as_str() {
                "format" => self.format = non_empty(value),
                "date" => match DateTime::parse_from_rfc2822(value) {
                    Ok(date) => self.date = Some(date),
                    Err(e) => rejected.push(RejectedLine::new(format!("invalid date: {}", e), line)),
                },
                "source" => self.source = non_empty(value),
                "binary" => self.binaries = words(value),
                "architecture" => self.architectures = words(value),
                "version" if value.is_empty() => self.version = None,
                "version" => match PackageVersion::parse(value) {
                    Ok(version) => self.version = Some(version),
                    Err(e) => rejected.push(RejectedLine::new(e, line)),
                },
                "distribution" => {
                    for (_, e) in self.distributions.add_all(value.split_whitespace()) {
                        rejected.push(RejectedLine::new(e, line));
                    }
                }
                "urgency" => self.urgency = non_empty(value),
                "maintainer" => {
                    let (contacts, bad) = parse_contacts(value);
                    self.maintainers.extend(contacts);
                    for piece in bad {
                        rejected.push(RejectedLine::new(
                            format!("invalid maintainer {:?}", piece),
                            line,
                        ));
                    }
                }
                "changed-by" => match Contact::parse(value) {
                    Ok(contact) => self.changed_by = Some(contact),
                    Err(e) => rejected.push(RejectedLine::new(e, line)),
                },
                "closes" => self.closes = words(value),
                "description" => {
                    let mut block = reader.take_text_block().into_iter().map(block_line);

                    self.short_description = if value.is_empty() {
                        block.next()
                    } else {
                        Some(value.to_string())
                    };
                    self.long_description = block.collect();
                }
                "changes" => {
                    let block = reader.take_text_block();

                    self.changes = if value.is_empty() {
                        vec![]
                    } else {
                        vec![value.to_string()]
                    };
                    self.changes.extend(block.into_iter().map(block_line));
                }
                "files" | "checksums-sha1" | "checksums-sha256" => {
                    let checksum = ChecksumType::from_field_name(name);
                    let block = reader.take_text_block();

                    for file_line in std::iter::once(value)
                        .filter(|v| !v.is_empty())
                        .chain(block.into_iter())
                    {
                        if let Err(e) = FileEntry::parse_line(file_line, checksum)
                            .and_then(|entry| self.files.merge_entry_by_name(entry))
                        {
                            rejected.push(RejectedLine::new(e, file_line));
                        }
                    }
                }
                _ => {
                    reader.take_text_block();
                    rejected.push(RejectedLine::new(format!("unknown field {}", name), line));
                }
            }
        }

        rejected
    }

    /// Validate this instance against files in a directory.
    ///
    /// See [Self::validate_with_hasher].
    pub fn validate(&self, base_path: impl AsRef<Path>) -> std::result::Result<(), ValidationError> {
        self.validate_with_hasher(base_path.as_ref(), &DefaultContentHasher::default())
    }

    /// Validate this instance against files in a directory.
    ///
    /// The document must target at least 1 distribution, none of them `UNRELEASED`, and
    /// reference at least 1 file. Every referenced file must exist in `base_path`, have
    /// the recorded size, and match every recorded digest.
    ///
    /// The first problem found is returned.
    pub fn validate_with_hasher(
        &self,
        base_path: &Path,
        hasher: &dyn ContentHasher,
    ) -> std::result::Result<(), ValidationError> {
        if self.distributions.saw_unreleased() {
            return Err(ValidationError::UnreleasedDistribution);
        }
        if self.distributions.is_empty() {
            return Err(ValidationError::NoDistributions);
        }
        if self.files.is_empty() {
            return Err(ValidationError::NoFiles);
        }

        for entry in self.files.iter() {
            let name = entry.name().ok_or(ValidationError::FileMissingName)?;
            let path = base_path.join(name);
            let io_error = |e| ValidationError::Io(format!("{}", path.display()), e);

            debug!("validating {}", path.display());

            let expected = entry
                .size()
                .ok_or_else(|| ValidationError::SizeMissing(name.to_string()))?;
            let actual = hasher.size(&path).map_err(io_error)?;
            if expected != actual {
                return Err(ValidationError::SizeMismatch {
                    name: name.to_string(),
                    expected,
                    actual,
                });
            }

            let recorded = ChecksumType::all()
                .filter_map(|checksum| entry.digest(checksum))
                .collect::<Vec<_>>();
            if recorded.is_empty() {
                continue;
            }

            let checksums = recorded
                .iter()
                .map(|digest| digest.checksum_type())
                .collect::<Vec<_>>();
            let actuals = hasher
                .file_digests_hex(&path, &checksums)
                .map_err(io_error)?;

            for (digest, actual) in recorded.into_iter().zip(actuals) {
                let expected = digest.digest_hex();

                if !expected.eq_ignore_ascii_case(&actual) {
                    return Err(ValidationError::DigestMismatch {
                        name: name.to_string(),
                        checksum: digest.checksum_type(),
                        expected,
                        actual,
                    });
                }
            }
        }

        Ok(())
    }

    /// Obtain the control fields constituting this instance, in canonical order.
    ///
    /// Unset fields are omitted, except `Version` and `Urgency`.
    pub fn fields(&self) -> Vec<ControlField<'_>> {
        let mut fields = vec![];

        if let Some(format) = &self.format {
            fields.push(ControlField::new("Format", format.as_str()));
        }
        if let Some(date) = &self.date {
            fields.push(ControlField::new("Date", date.format(DATE_FORMAT).to_string()));
        }
        if let Some(source) = &self.source {
            fields.push(ControlField::new("Source", source.as_str()));
        }
        if !self.binaries.is_empty() {
            fields.push(ControlField::new("Binary", self.binaries.join(" ")));
        }
        if !self.architectures.is_empty() {
            fields.push(ControlField::new(
                "Architecture",
                self.architectures.join(" "),
            ));
        }
        fields.push(ControlField::new(
            "Version",
            self.version
                .as_ref()
                .map(|v| v.to_string())
                .unwrap_or_default(),
        ));
        if !self.distributions.is_empty() {
            fields.push(ControlField::new(
                "Distribution",
                self.distributions.iter().collect::<Vec<_>>().join(" "),
            ));
        }
        fields.push(ControlField::new(
            "Urgency",
            self.urgency.as_deref().unwrap_or_default(),
        ));
        if !self.maintainers.is_empty() {
            fields.push(ControlField::new(
                "Maintainer",
                self.maintainers
                    .iter()
                    .map(|c| c.to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
            ));
        }
        if let Some(changed_by) = &self.changed_by {
            fields.push(ControlField::new("Changed-By", changed_by.to_string()));
        }
        if self.short_description.is_some() || !self.long_description.is_empty() {
            fields.push(ControlField::from_lines(
                "Description",
                self.short_description
                    .iter()
                    .chain(self.long_description.iter())
                    .map(|s| s.as_str()),
            ));
        }
        if !self.closes.is_empty() {
            fields.push(ControlField::new("Closes", self.closes.join(" ")));
        }
        if !self.changes.is_empty() {
            fields.push(ControlField::from_lines(
                "Changes",
                self.changes.iter().map(|s| s.as_str()),
            ));
        }

        for checksum in [ChecksumType::Sha1, ChecksumType::Sha256, ChecksumType::Md5] {
            let lines = self
                .files
                .iter()
                .filter_map(|entry| entry.field_line(checksum))
                .collect::<Vec<_>>();

            if !lines.is_empty() {
                fields.push(ControlField::from_lines(checksum.field_name(), lines));
            }
        }

        fields
    }

    /// Write the serialized form of this instance to a writer.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in self.fields() {
            field.write(writer)?;
        }

        Ok(())
    }
}

impl Display for ChangesFile {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for field in self.fields() {
            write!(f, "{}", field)?;
        }

        Ok(())
    }
}
