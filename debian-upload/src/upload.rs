// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Uploading the files described by `.changes` files.

[Uploader] publishes a `.changes` file and the files it references through a
[Transport]. Progress is tracked in the upload ledger next to the `.changes` file so
that publishing again only sends what wasn't delivered yet.

Each publish goes through the states of [UploadState]:

1. The `.changes` file is parsed and validated against the files in its directory.
2. The ledger is read and every file (including the `.changes` file itself) without a
   recorded upload is pending. If nothing is pending, the publish is done.
3. Pending files are handed to the transport in a single call.
4. Once the transport reports success, an upload event for each pending file and a
   success event for the `.changes` file are appended to the ledger.
*/

use {
    crate::{
        changes::ChangesFile,
        distribution::Distributions,
        error::{DebianError, Result},
        io::{ContentHasher, DefaultContentHasher},
        transport::{Transport, UploadTarget},
        upload_ledger::{ledger_path_for, ActionKind, LedgerEntry, UploadLedger},
    },
    log::{debug, error, info, warn},
    serde::{Deserialize, Serialize},
    std::{
        fmt::{Display, Formatter},
        path::{Path, PathBuf},
    },
};

/// Describes where uploads go.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct UploadConfig {
    /// URL or path of the destination. See [crate::transport::transport_from_str].
    pub destination_url: String,

    /// Directory at the destination receiving files.
    #[serde(default)]
    pub incoming_path: String,

    /// Token in `incoming_path` replaced by each distribution of a `.changes` file.
    #[serde(default)]
    pub distribution_pattern: Option<String>,
}

/// The stages of publishing a single `.changes` file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UploadState {
    Validating,
    ComputingPending,
    Uploading,
    RecordingSuccess,
    Done,
    Failed,
}

impl Display for UploadState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Validating => "validating",
            Self::ComputingPending => "computing pending files",
            Self::Uploading => "uploading",
            Self::RecordingSuccess => "recording success",
            Self::Done => "done",
            Self::Failed => "failed",
        })
    }
}

/// Describes an event that occurs while publishing.
#[derive(Clone, Debug)]
pub enum UploadEvent {
    /// Publishing of a `.changes` file entered a new state.
    StateChanged(String, UploadState),
    /// Files of a `.changes` file that will be uploaded.
    PendingFiles(String, Vec<String>),
}

impl Display for UploadEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StateChanged(changes, state) => write!(f, "{}: {}", changes, state),
            Self::PendingFiles(changes, files) => {
                write!(f, "{}: pending files: {}", changes, files.join(" "))
            }
        }
    }
}

/// Result of publishing a `.changes` file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UploadOutcome {
    /// The ledger already records every file as uploaded. Nothing was sent.
    AlreadyUploaded,
    /// Files were sent and recorded in the ledger.
    Uploaded {
        files: Vec<String>,
        targets: Vec<UploadTarget>,
    },
}

/// Obtain the names of files that still need uploading.
///
/// These are the files of the `.changes` file plus the `.changes` file itself, in that
/// order, minus those the ledger records an upload for.
pub fn pending_files(
    changes: &ChangesFile,
    changes_file_name: &str,
    ledger: &UploadLedger,
) -> Vec<String> {
    let mut names = changes
        .files
        .iter()
        .filter_map(|entry| entry.name())
        .map(|name| name.to_string())
        .collect::<Vec<_>>();

    if !names.iter().any(|name| name == changes_file_name) {
        names.push(changes_file_name.to_string());
    }

    names
        .into_iter()
        .filter(|name| !ledger.is_uploaded(name))
        .collect()
}

fn join_remote(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');

    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Publishes `.changes` files through a [Transport].
pub struct Uploader<'a> {
    transport: &'a dyn Transport,
    incoming_path: String,
    distribution_pattern: Option<String>,
    hasher: Box<dyn ContentHasher + 'a>,
    progress_cb: Option<Box<dyn Fn(UploadEvent) + 'a>>,
}

impl<'a> Uploader<'a> {
    /// Construct an instance sending files to `incoming_path` of a transport.
    pub fn new(transport: &'a dyn Transport, incoming_path: impl ToString) -> Self {
        Self {
            transport,
            incoming_path: incoming_path.to_string(),
            distribution_pattern: None,
            hasher: Box::new(DefaultContentHasher::default()),
            progress_cb: None,
        }
    }

    /// Construct an instance from an [UploadConfig].
    ///
    /// The transport should have been derived from [UploadConfig::destination_url].
    pub fn from_config(transport: &'a dyn Transport, config: &UploadConfig) -> Self {
        let mut uploader = Self::new(transport, &config.incoming_path);
        uploader.distribution_pattern = config.distribution_pattern.clone();

        uploader
    }

    /// Upload into one directory per distribution by replacing `pattern` in the incoming path.
    #[must_use]
    pub fn with_distribution_pattern(mut self, pattern: impl ToString) -> Self {
        self.distribution_pattern = Some(pattern.to_string());
        self
    }

    /// Use a custom [ContentHasher] to validate files.
    #[must_use]
    pub fn with_hasher(mut self, hasher: Box<dyn ContentHasher + 'a>) -> Self {
        self.hasher = hasher;
        self
    }

    /// Register a function to be called for every [UploadEvent].
    #[must_use]
    pub fn with_progress_callback(mut self, cb: Box<dyn Fn(UploadEvent) + 'a>) -> Self {
        self.progress_cb = Some(cb);
        self
    }

    fn emit(&self, event: UploadEvent) {
        if let Some(cb) = &self.progress_cb {
            cb(event);
        }
    }

    fn set_state(&self, changes_name: &str, state: UploadState) {
        debug!("{}: {}", changes_name, state);
        self.emit(UploadEvent::StateChanged(changes_name.to_string(), state));
    }

    /// Resolve the destinations of files.
    ///
    /// Every file goes into the incoming path. With a distribution pattern, the pattern in
    /// the incoming path is replaced by each distribution, yielding every file once per
    /// distinct resulting directory.
    pub fn upload_targets(
        &self,
        base_dir: &Path,
        files: &[String],
        distributions: &Distributions,
    ) -> Vec<UploadTarget> {
        let remote_dirs = match &self.distribution_pattern {
            Some(pattern) if !pattern.is_empty() && !distributions.is_empty() => {
                let mut dirs: Vec<String> = vec![];
                for dir in distributions
                    .iter()
                    .map(|dist| self.incoming_path.replace(pattern.as_str(), dist))
                {
                    if !dirs.contains(&dir) {
                        dirs.push(dir);
                    }
                }

                dirs
            }
            _ => vec![self.incoming_path.clone()],
        };

        remote_dirs
            .iter()
            .flat_map(|dir| {
                files.iter().map(move |name| UploadTarget {
                    local_path: base_dir.join(name),
                    remote_path: join_remote(dir, name),
                })
            })
            .collect()
    }

    /// Publish a `.changes` file.
    ///
    /// On error nothing is recorded in the ledger.
    pub fn publish(&self, changes_path: &Path) -> Result<UploadOutcome> {
        let changes_name = changes_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                DebianError::Other(format!("not a file path: {}", changes_path.display()))
            })?;

        match self.publish_changes(changes_path, &changes_name) {
            Ok(outcome) => {
                self.set_state(&changes_name, UploadState::Done);
                Ok(outcome)
            }
            Err(e) => {
                error!("{}: upload failed: {}", changes_name, e);
                self.set_state(&changes_name, UploadState::Failed);
                Err(e)
            }
        }
    }

    fn publish_changes(&self, changes_path: &Path, changes_name: &str) -> Result<UploadOutcome> {
        let base_dir = match changes_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        self.set_state(changes_name, UploadState::Validating);

        let (changes, rejected) = ChangesFile::from_path(changes_path)?;
        for line in rejected {
            warn!("{}: ignoring line: {}", changes_name, line);
        }
        changes.validate_with_hasher(base_dir, self.hasher.as_ref())?;

        self.set_state(changes_name, UploadState::ComputingPending);

        let ledger_path = ledger_path_for(changes_path);
        let (ledger, rejected) = UploadLedger::from_path(&ledger_path)?;
        for line in rejected {
            warn!("{}: ignoring line: {}", ledger_path.display(), line);
        }

        let pending = pending_files(&changes, changes_name, &ledger);
        if pending.is_empty() {
            info!("{}: already uploaded", changes_name);
            return Ok(UploadOutcome::AlreadyUploaded);
        }
        self.emit(UploadEvent::PendingFiles(
            changes_name.to_string(),
            pending.clone(),
        ));

        self.set_state(changes_name, UploadState::Uploading);

        let targets = self.upload_targets(base_dir, &pending, &changes.distributions);
        info!(
            "{}: storing {} files to {}",
            changes_name,
            targets.len(),
            self.transport.identity()
        );
        self.transport.store_files(&targets)?;

        self.set_state(changes_name, UploadState::RecordingSuccess);

        let destination = self.transport.identity();
        let now = chrono::Local::now().naive_local();

        let mut record = UploadLedger::default();
        for name in &pending {
            let mut entry = LedgerEntry::new(name);
            entry.add_action(ActionKind::Upload, &destination, now)?;
            record.merge_entry(entry);
        }
        let mut entry = LedgerEntry::new(changes_name);
        entry.add_action(ActionKind::Success, &destination, now)?;
        record.merge_entry(entry);

        record.append_to_path(&ledger_path)?;

        Ok(UploadOutcome::Uploaded {
            files: pending,
            targets,
        })
    }

    /// Publish every `.changes` file in a directory.
    ///
    /// Files are processed in name order. A failure to publish one file doesn't prevent
    /// publishing the others; the result of each is returned.
    pub fn publish_directory(
        &self,
        dir: &Path,
    ) -> Result<Vec<(PathBuf, Result<UploadOutcome>)>> {
        let mut paths = vec![];

        for entry in
            std::fs::read_dir(dir).map_err(|e| DebianError::IoPath(format!("{}", dir.display()), e))?
        {
            let path = entry?.path();

            if path.is_file() && path.extension().map(|ext| ext == "changes").unwrap_or(false) {
                paths.push(path);
            }
        }

        if paths.is_empty() {
            return Err(DebianError::NoChangesFiles(format!("{}", dir.display())));
        }

        paths.sort();

        Ok(paths
            .into_iter()
            .map(|path| {
                let res = self.publish(&path);
                (path, res)
            })
            .collect())
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            changes::ValidationError,
            file_entry::FileEntry,
            transport::{SinkTransport, SinkTransportBehavior},
        },
        std::{cell::RefCell, rc::Rc},
    };

    fn write_entry(dir: &Path, name: &str, content: &[u8]) -> Result<FileEntry> {
        std::fs::write(dir.join(name), content)?;

        let hasher = DefaultContentHasher::default();
        let mut entry = FileEntry::new(name)?;
        entry.set_size(content.len() as u64);
        entry.set_md5(Some(&hasher.md5_hex(content)))?;
        entry.set_sha256(Some(&hasher.sha256_hex(content)))?;

        Ok(entry)
    }

    /// Write a `.changes` file referencing `a.deb` and `b.deb` into a directory.
    fn write_changes(dir: &Path, stem: &str, distributions: &[&str]) -> Result<PathBuf> {
        let mut changes = ChangesFile::default();
        for dist in distributions {
            changes.distributions.add(dist)?;
        }
        changes
            .files
            .merge_entry_by_name(write_entry(dir, "a.deb", b"first package")?)?;
        changes
            .files
            .merge_entry_by_name(write_entry(dir, "b.deb", b"second package")?)?;

        let path = dir.join(format!("{}.changes", stem));
        std::fs::write(&path, changes.to_string())?;

        Ok(path)
    }

    #[test]
    fn pending() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = write_changes(td.path(), "pkg", &["unstable"])?;
        let (changes, _) = ChangesFile::from_path(&path)?;

        let mut ledger = UploadLedger::default();
        assert_eq!(
            pending_files(&changes, "pkg.changes", &ledger),
            vec!["a.deb", "b.deb", "pkg.changes"]
        );

        ledger.parse("u a.deb host Thu Feb 06 23:04:27 2014\na b.deb host Thu Feb 06 23:04:27 2014\n");
        assert_eq!(
            pending_files(&changes, "pkg.changes", &ledger),
            vec!["b.deb", "pkg.changes"]
        );

        Ok(())
    }

    #[test]
    fn resumable_upload() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = write_changes(td.path(), "pkg_1.0_amd64", &["unstable"])?;
        let ledger_path = td.path().join("pkg_1.0_amd64.upload");
        std::fs::write(&ledger_path, "u a.deb ftp.example.com Thu Feb 06 23:04:27 2014\n")?;

        let transport = SinkTransport::default();
        let uploader = Uploader::new(&transport, "incoming");

        match uploader.publish(&path)? {
            UploadOutcome::Uploaded { files, targets } => {
                assert_eq!(files, vec!["b.deb", "pkg_1.0_amd64.changes"]);
                assert_eq!(
                    targets
                        .iter()
                        .map(|t| t.remote_path.as_str())
                        .collect::<Vec<_>>(),
                    vec!["incoming/b.deb", "incoming/pkg_1.0_amd64.changes"]
                );
                assert_eq!(targets[0].local_path, td.path().join("b.deb"));
            }
            outcome => panic!("unexpected outcome: {:?}", outcome),
        }
        assert_eq!(transport.stored_targets().len(), 2);

        let (ledger, rejected) = UploadLedger::from_path(&ledger_path)?;
        assert!(rejected.is_empty());
        assert!(ledger.is_uploaded("a.deb"));
        assert!(ledger.is_uploaded("b.deb"));
        let changes_entry = ledger
            .get("pkg_1.0_amd64.changes")
            .expect("changes entry should exist");
        assert_eq!(
            changes_entry
                .actions()
                .iter()
                .map(|a| (a.kind, a.destination.as_str()))
                .collect::<Vec<_>>(),
            vec![
                (ActionKind::Upload, "null://"),
                (ActionKind::Success, "null://")
            ]
        );

        // Everything is recorded now. Publishing again sends nothing.
        assert_eq!(uploader.publish(&path)?, UploadOutcome::AlreadyUploaded);
        assert_eq!(transport.stored_targets().len(), 2);

        Ok(())
    }

    #[test]
    fn transport_failure_records_nothing() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = write_changes(td.path(), "pkg", &["unstable"])?;

        let transport = SinkTransport::new(SinkTransportBehavior::Fail);
        let uploader = Uploader::new(&transport, "");

        assert!(matches!(
            uploader.publish(&path),
            Err(DebianError::Transport(_))
        ));
        assert!(!td.path().join("pkg.upload").exists());

        Ok(())
    }

    #[test]
    fn validation_failure_uploads_nothing() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = write_changes(td.path(), "pkg", &["unstable"])?;
        std::fs::write(td.path().join("b.deb"), b"tampered package")?;

        let transport = SinkTransport::default();
        let uploader = Uploader::new(&transport, "");

        assert!(matches!(
            uploader.publish(&path),
            Err(DebianError::Validation(ValidationError::SizeMismatch { .. }))
        ));
        assert!(transport.stored_targets().is_empty());
        assert!(!td.path().join("pkg.upload").exists());

        Ok(())
    }

    #[test]
    fn distribution_targets() -> Result<()> {
        let transport = SinkTransport::default();
        let config = UploadConfig {
            destination_url: "null://".into(),
            incoming_path: "/incoming/DIST".into(),
            distribution_pattern: Some("DIST".into()),
        };
        let uploader = Uploader::from_config(&transport, &config);

        let mut distributions = Distributions::default();
        distributions.add("testing")?;
        distributions.add("stable")?;

        let files = vec!["a.deb".to_string(), "pkg.changes".to_string()];
        let targets = uploader.upload_targets(Path::new("/build"), &files, &distributions);

        assert_eq!(
            targets
                .iter()
                .map(|t| t.remote_path.as_str())
                .collect::<Vec<_>>(),
            vec![
                "/incoming/testing/a.deb",
                "/incoming/testing/pkg.changes",
                "/incoming/stable/a.deb",
                "/incoming/stable/pkg.changes",
            ]
        );
        assert_eq!(targets[2].local_path, PathBuf::from("/build/a.deb"));

        // A pattern absent from the incoming path doesn't duplicate uploads.
        let uploader = Uploader::new(&transport, "/incoming/").with_distribution_pattern("DIST");
        assert_eq!(
            uploader
                .upload_targets(Path::new("/build"), &files, &distributions)
                .len(),
            2
        );

        Ok(())
    }

    #[test]
    fn progress_events() -> Result<()> {
        let td = tempfile::tempdir()?;
        let path = write_changes(td.path(), "pkg", &["unstable"])?;

        let states = Rc::new(RefCell::new(vec![]));
        let states_cb = states.clone();

        let transport = SinkTransport::default();
        let uploader = Uploader::new(&transport, "").with_progress_callback(Box::new(
            move |event| {
                if let UploadEvent::StateChanged(_, state) = event {
                    states_cb.borrow_mut().push(state);
                }
            },
        ));

        uploader.publish(&path)?;
        assert_eq!(
            *states.borrow(),
            vec![
                UploadState::Validating,
                UploadState::ComputingPending,
                UploadState::Uploading,
                UploadState::RecordingSuccess,
                UploadState::Done,
            ]
        );

        states.borrow_mut().clear();
        uploader.publish(&td.path().join("missing.changes")).ok();
        assert_eq!(
            *states.borrow(),
            vec![UploadState::Validating, UploadState::Failed]
        );

        Ok(())
    }

    #[test]
    fn publish_directory() -> Result<()> {
        let td = tempfile::tempdir()?;
        let transport = SinkTransport::default();
        let uploader = Uploader::new(&transport, "");

        assert!(matches!(
            uploader.publish_directory(td.path()),
            Err(DebianError::NoChangesFiles(_))
        ));

        write_changes(td.path(), "good", &["unstable"])?;
        std::fs::write(td.path().join("bad.changes"), "Distribution: UNRELEASED\n")?;

        let results = uploader.publish_directory(td.path())?;
        assert_eq!(results.len(), 2);

        assert_eq!(results[0].0, td.path().join("bad.changes"));
        assert!(matches!(
            results[0].1,
            Err(DebianError::Validation(ValidationError::UnreleasedDistribution))
        ));

        assert_eq!(results[1].0, td.path().join("good.changes"));
        assert!(matches!(results[1].1, Ok(UploadOutcome::Uploaded { .. })));
        assert!(td.path().join("good.upload").exists());

        Ok(())
    }
}
