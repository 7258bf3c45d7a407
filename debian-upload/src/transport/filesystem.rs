// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem based upload destinations. */

use {
    crate::{
        error::{DebianError, Result},
        transport::{Transport, UploadTarget},
    },
    log::debug,
    std::path::{Path, PathBuf},
    url::Url,
};

/// A [Transport] copying files into a local directory.
#[derive(Clone, Debug)]
pub struct FilesystemTransport {
    root_dir: PathBuf,
}

impl FilesystemTransport {
    /// Construct a new instance, bound to the root directory specified.
    ///
    /// No validation of the passed path is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }

    /// Resolve the filesystem path of a remote path.
    fn dest_path(&self, remote_path: &str) -> PathBuf {
        self.root_dir.join(remote_path.trim_start_matches('/'))
    }
}

impl Transport for FilesystemTransport {
    fn store_files(&self, targets: &[UploadTarget]) -> Result<()> {
        for target in targets {
            let dest_path = self.dest_path(&target.remote_path);

            if let Some(parent) = dest_path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| DebianError::IoPath(format!("{}", parent.display()), e))?;
            }

            debug!(
                "copying {} to {}",
                target.local_path.display(),
                dest_path.display()
            );
            std::fs::copy(&target.local_path, &dest_path)
                .map_err(|e| DebianError::IoPath(format!("{}", dest_path.display()), e))?;
        }

        Ok(())
    }

    fn identity(&self) -> String {
        let root = if self.root_dir.is_absolute() {
            self.root_dir.clone()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&self.root_dir))
                .unwrap_or_else(|_| self.root_dir.clone())
        };

        Url::from_directory_path(&root)
            .map(|url| url.to_string())
            .unwrap_or_else(|_| format!("file://{}", root.display()).replace(' ', "%20"))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn store_files() -> Result<()> {
        let source = tempfile::tempdir()?;
        let dest = tempfile::tempdir()?;

        let local_path = source.path().join("pkg_1.0.dsc");
        std::fs::write(&local_path, b"dsc")?;

        let transport = FilesystemTransport::new(dest.path());
        transport.store_files(&[
            UploadTarget {
                local_path: local_path.clone(),
                remote_path: "/incoming/unstable/pkg_1.0.dsc".into(),
            },
            UploadTarget {
                local_path: local_path.clone(),
                remote_path: "pkg_1.0.dsc".into(),
            },
        ])?;

        assert_eq!(
            std::fs::read(dest.path().join("incoming/unstable/pkg_1.0.dsc"))?,
            b"dsc"
        );
        assert_eq!(std::fs::read(dest.path().join("pkg_1.0.dsc"))?, b"dsc");

        assert!(matches!(
            transport.store_files(&[UploadTarget {
                local_path: source.path().join("missing.deb"),
                remote_path: "missing.deb".into(),
            }]),
            Err(DebianError::IoPath(_, _))
        ));

        Ok(())
    }

    #[test]
    fn identity() {
        let transport = FilesystemTransport::new("/srv/debian incoming");

        assert!(transport.identity().starts_with("file:///srv/debian"));
        assert!(!transport.identity().contains(' '));
    }
}
