//! Sync failures and skip reasons.

use waypoint_core::SyncResult;
use waypoint_progress::ProgressError;
use waypoint_storage::StorageError;

/// Why a sync cycle did not complete.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Connectivity is down and the cycle was not forced
    #[error("offline")]
    Offline,

    /// No signed-in user
    #[error("not authenticated")]
    NotAuthenticated,

    /// Another cycle is running
    #[error("sync in progress")]
    InProgress,

    /// Fetching the remote snapshot failed
    #[error("pull failed: {0}")]
    Pull(#[from] StorageError),

    /// Replaying a queued change failed
    #[error("push failed: {0}")]
    Push(#[from] ProgressError),
}

impl SyncError {
    /// Expected states that are reported as a skip rather than a failure.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            SyncError::Offline | SyncError::NotAuthenticated | SyncError::InProgress
        )
    }

    /// Result object for the UI.
    pub fn to_result(&self) -> SyncResult {
        if self.is_skip() {
            SyncResult::skipped(false, Some(&self.to_string()))
        } else {
            SyncResult::failed(self)
        }
    }
}
