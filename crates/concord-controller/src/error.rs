//! Errors returned by controller syncs

use thiserror::Error;

/// Failure of one sync; the engine logs it and retries the key with backoff
#[derive(Debug, Error)]
pub enum SyncError {
    /// Shared error from common code
    #[error(transparent)]
    Common(#[from] concord_common::Error),

    /// The sync could not complete
    #[error("{message}")]
    Failed {
        /// Description of the failure
        message: String,
    },

    /// The sync panicked
    #[error("sync panicked: {0}")]
    Panicked(String),
}

impl SyncError {
    /// Create a sync failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}
