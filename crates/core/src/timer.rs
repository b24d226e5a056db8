//! Persisted countdown state.

use serde::{Deserialize, Serialize};
use crate::id::{ScreenId, UserId};
use crate::Time;

/// The live state of one countdown. Each save supersedes the previous one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSnapshot {
    /// Owner
    pub user_id: UserId,

    /// Countdown screen
    pub screen_id: ScreenId,

    /// Seconds left when saved
    pub remaining_seconds: u32,

    /// When this snapshot was written
    pub last_saved_at: Time,
}

impl TimerSnapshot {
    /// Snapshot stamped with the current time.
    pub fn now(user_id: UserId, screen_id: ScreenId, remaining_seconds: u32) -> Self {
        Self {
            user_id,
            screen_id,
            remaining_seconds,
            last_saved_at: chrono::Utc::now(),
        }
    }

    /// A snapshot is resumable when time is left on it.
    pub fn is_resumable(&self) -> bool {
        self.remaining_seconds > 0
    }
}
