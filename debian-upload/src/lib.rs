// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian `.changes` handling and resumable uploading.

This crate defines pure Rust implementations of the primitives needed to publish the
output of a Debian package build: the `.changes` file describing a build, the files it
references, and a ledger tracking which of those files have already been delivered
somewhere.

# A Tour of Functionality

Debian version strings are modeled by [package_version::PackageVersion]. Instances are
totally ordered using the same rules as `dpkg --compare-versions`.

A `.changes` file is a control file with a fixed set of recognized fields. Low-level line
grammar is defined in the [control] module. [changes::ChangesFile] parses, validates, and
serializes whole documents. Parsing is tolerant: lines that can't be understood are
reported as [control::RejectedLine] instead of aborting the parse.

Files referenced by a `.changes` file are modeled by [file_entry::FileEntry]. The
`Files`, `Checksums-Sha1`, and `Checksums-Sha256` fields each describe a subset of an
entry's attributes and are merged by file name in a [file_entry::FileEntryRegistry].
Content digests and the hashing collaborator used for validation live in [io].

An `.upload` file sitting next to a `.changes` file records every upload, announcement, and
success event for the files in it. [upload_ledger::UploadLedger] reads and appends these.

[upload::Uploader] ties everything together: it validates a `.changes` file, figures out
which files haven't been uploaded yet, hands them to a [transport::Transport], and only then
records the result in the ledger. Re-running an interrupted upload therefore skips
whatever was already delivered.
*/

pub mod changes;
pub mod control;
pub mod distribution;
pub mod error;
pub mod file_entry;
pub mod io;
pub mod package_version;
pub mod transport;
pub mod upload;
pub mod upload_ledger;
