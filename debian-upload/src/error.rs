// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {
    crate::{
        changes::ValidationError, distribution::DistributionError, file_entry::FileEntryError,
        package_version::VersionError,
    },
    thiserror::Error,
};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum DebianError {
    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("hex parsing error: {0:?}")]
    Hex(#[from] hex::FromHexError),

    #[error("date parsing error: {0:?}")]
    DateParse(#[from] chrono::ParseError),

    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("file entry error: {0}")]
    FileEntry(#[from] FileEntryError),

    #[error("distribution error: {0}")]
    Distribution(#[from] DistributionError),

    #[error("changes validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("content digest {0} has {1} bytes; expected {2}")]
    ContentDigestBadLength(String, usize, usize),

    #[error("I/O error on path {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("upload ledger path is a directory: {0}")]
    LedgerIsDirectory(String),

    #[error("no .changes files found in {0}")]
    NoChangesFiles(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unsupported transport URL: {0}")]
    UnsupportedTransport(String),

    #[error("{0}")]
    Other(String),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, DebianError>;
