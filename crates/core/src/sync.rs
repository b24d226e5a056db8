//! Sync bookkeeping shared between the progress store and the sync engine.

use std::collections::BTreeSet;
use serde::{Deserialize, Serialize};
use crate::Time;

/// Entity families a local mutation can touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RecordFamily {
    /// Level progress records
    Level,
    /// Module progress records
    Module,
    /// Timer snapshots
    Timer,
}

/// Tracks whether anything changed locally since the last reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// Last successful reconciliation
    pub last_sync_time: Option<Time>,

    /// A local mutation happened since `last_sync_time`
    pub pending_local_change: bool,

    /// Incremented on every local mutation
    pub generation: u64,

    /// Families touched since the last reconciliation
    pub dirty: BTreeSet<RecordFamily>,
}

impl SyncCursor {
    /// Record a local mutation of `family`.
    pub fn mark(&mut self, family: RecordFamily) {
        self.pending_local_change = true;
        self.generation = self.generation.wrapping_add(1);
        self.dirty.insert(family);
    }

    /// Record a successful reconciliation at `now`.
    ///
    /// Only clears the pending flag if no mutation happened after
    /// `synced_generation` was captured.
    pub fn synced(&mut self, synced_generation: u64, now: Time) {
        self.last_sync_time = Some(now);
        if self.generation == synced_generation {
            self.pending_local_change = false;
            self.dirty.clear();
        }
    }
}

/// Outcome of a sync attempt, shaped for optional UI feedback.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// The attempt reached a consistent state
    pub success: bool,

    /// Nothing was attempted
    pub skipped: bool,

    /// Why the attempt was skipped
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// What went wrong
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Remote records that were new or changed
    pub pulled: usize,

    /// Records written to the remote store
    pub pushed: usize,

    /// Cursor time after the attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<Time>,
}

impl SyncResult {
    /// Skipped attempt. `success` is true only for the "nothing to do" case.
    pub fn skipped(success: bool, reason: Option<&str>) -> Self {
        Self {
            success,
            skipped: true,
            reason: reason.map(str::to_string),
            ..Default::default()
        }
    }

    /// Failed attempt.
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            skipped: false,
            error: Some(error.to_string()),
            ..Default::default()
        }
    }

    /// Successful attempt.
    pub fn completed(pulled: usize, pushed: usize, last_sync_time: Time) -> Self {
        Self {
            success: true,
            skipped: false,
            pulled,
            pushed,
            last_sync_time: Some(last_sync_time),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_and_sync() {
        let mut cursor = SyncCursor::default();
        cursor.mark(RecordFamily::Level);
        let captured = cursor.generation;
        assert!(cursor.pending_local_change);

        cursor.synced(captured, chrono::Utc::now());
        assert!(!cursor.pending_local_change);
        assert!(cursor.dirty.is_empty());
        assert!(cursor.last_sync_time.is_some());
    }

    #[test]
    fn test_mutation_during_sync_stays_pending() {
        let mut cursor = SyncCursor::default();
        cursor.mark(RecordFamily::Level);
        let captured = cursor.generation;
        cursor.mark(RecordFamily::Module);

        cursor.synced(captured, chrono::Utc::now());
        assert!(cursor.pending_local_change);
        assert!(cursor.dirty.contains(&RecordFamily::Module));
    }

    #[test]
    fn test_skipped_result_serializes_reason() {
        let result = SyncResult::skipped(false, Some("offline"));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["skipped"], true);
        assert_eq!(json["reason"], "offline");
        assert!(json.get("error").is_none());
    }
}
