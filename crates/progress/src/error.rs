//! Progress operation errors.

use waypoint_core::UserId;
use waypoint_storage::StorageError;

/// Result alias for progress operations.
pub type Result<T> = std::result::Result<T, ProgressError>;

/// Errors returned by [`crate::ProgressStore`].
#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    /// No (valid) authenticated user
    #[error("not authenticated: {0:?}")]
    Auth(UserId),

    /// Transport or store failure
    #[error("remote store error: {0}")]
    Remote(#[from] StorageError),

    /// Malformed or missing data
    #[error("data error: {0}")]
    Data(String),
}

impl ProgressError {
    /// Expected conditions that callers skip quietly rather than report.
    pub fn is_expected(&self) -> bool {
        match self {
            ProgressError::Auth(_) => true,
            ProgressError::Remote(e) => e.is_transient(),
            ProgressError::Data(_) => false,
        }
    }
}
