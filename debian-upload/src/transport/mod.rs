// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Delivery of files to an upload destination.

A [Transport] receives every file of an upload in a single call and either stores all of
them or reports failure. Nothing is recorded in an upload ledger unless the transport
reports success.

Transports are usually obtained from a URL via [transport_from_str]. If a value contains
`://` it is parsed as a URL. Otherwise it is interpreted as a local filesystem path.

The following URL schemes are recognized:

`file://`
   A local filesystem directory. Files are copied beneath it.

`null://`
   Discards files. `null://fail` reports failure instead, which is useful to exercise
   error handling.
*/

pub mod filesystem;
pub mod sink;

use {
    crate::error::{DebianError, Result},
    std::path::PathBuf,
    url::Url,
};

pub use {
    filesystem::FilesystemTransport,
    sink::{SinkTransport, SinkTransportBehavior},
};

/// A file to deliver and the path it should have at the destination.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct UploadTarget {
    /// Local path of the file.
    pub local_path: PathBuf,
    /// `/` delimited path relative to the root of the destination.
    pub remote_path: String,
}

/// A destination that can store files.
pub trait Transport {
    /// Store all files.
    ///
    /// An error means the upload failed as a whole, even if some files were stored.
    fn store_files(&self, targets: &[UploadTarget]) -> Result<()>;

    /// A whitespace free string identifying this destination in upload ledgers.
    fn identity(&self) -> String;
}

/// Obtain a [Transport] from a URL or filesystem path.
pub fn transport_from_str(s: &str) -> Result<Box<dyn Transport>> {
    if !s.contains("://") {
        return Ok(Box::new(FilesystemTransport::new(s)));
    }

    let url = Url::parse(s)?;

    match url.scheme() {
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| DebianError::UnsupportedTransport(s.to_string()))?;

            Ok(Box::new(FilesystemTransport::new(path)))
        }
        "null" => {
            let behavior = match url.host_str() {
                None | Some("") => SinkTransportBehavior::Succeed,
                Some("fail") => SinkTransportBehavior::Fail,
                Some(_) => return Err(DebianError::UnsupportedTransport(s.to_string())),
            };

            Ok(Box::new(SinkTransport::new(behavior)))
        }
        _ => Err(DebianError::UnsupportedTransport(s.to_string())),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn from_str() -> Result<()> {
        assert_eq!(transport_from_str("null://")?.identity(), "null://");
        assert!(transport_from_str("null://fail")?
            .store_files(&[])
            .is_err());
        assert!(transport_from_str("null://")?.store_files(&[]).is_ok());

        let td = tempfile::tempdir()?;
        let url = Url::from_directory_path(td.path())
            .map_err(|_| DebianError::Other("bad path".into()))?;
        assert_eq!(transport_from_str(url.as_str())?.identity(), url.to_string());
        assert_eq!(
            transport_from_str(&format!("{}", td.path().display()))?.identity(),
            url.to_string()
        );

        assert!(matches!(
            transport_from_str("ftp://ftp.example.com/incoming"),
            Err(DebianError::UnsupportedTransport(_))
        ));
        assert!(matches!(
            transport_from_str("null://bogus"),
            Err(DebianError::UnsupportedTransport(_))
        ));

        Ok(())
    }
}
