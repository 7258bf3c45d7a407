// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! A special transport that sends files to a black hole. */

use {
    crate::{
        error::{DebianError, Result},
        transport::{Transport, UploadTarget},
    },
    std::sync::Mutex,
};

/// How [Transport::store_files()] should behave for [SinkTransport] instances.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SinkTransportBehavior {
    /// Report every store as successful.
    Succeed,
    /// Report every store as failed.
    Fail,
}

/// A [Transport] that discards files.
///
/// Targets passed to successful stores are remembered and available via
/// [SinkTransport::stored_targets].
pub struct SinkTransport {
    behavior: SinkTransportBehavior,
    stored: Mutex<Vec<UploadTarget>>,
}

impl Default for SinkTransport {
    fn default() -> Self {
        Self::new(SinkTransportBehavior::Succeed)
    }
}

impl SinkTransport {
    pub fn new(behavior: SinkTransportBehavior) -> Self {
        Self {
            behavior,
            stored: Mutex::new(vec![]),
        }
    }

    /// Targets of all successful stores so far.
    pub fn stored_targets(&self) -> Vec<UploadTarget> {
        self.stored
            .lock()
            .map(|stored| stored.clone())
            .unwrap_or_default()
    }
}

impl Transport for SinkTransport {
    fn store_files(&self, targets: &[UploadTarget]) -> Result<()> {
        match self.behavior {
            SinkTransportBehavior::Succeed => {
                self.stored
                    .lock()
                    .map_err(|_| DebianError::Transport("sink state poisoned".to_string()))?
                    .extend(targets.iter().cloned());

                Ok(())
            }
            SinkTransportBehavior::Fail => Err(DebianError::Transport(format!(
                "refusing to store {} files",
                targets.len()
            ))),
        }
    }

    fn identity(&self) -> String {
        "null://".to_string()
    }
}
