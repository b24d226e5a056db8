//! Progress records and the values derived from them.

use serde::{Deserialize, Serialize};
use crate::id::{LevelId, LevelKey, ModuleId, UserId};
use crate::Time;

/// Completion state of one level for one user.
///
/// Unique per `(user_id, module_id, level_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelProgressRecord {
    /// Owner
    pub user_id: UserId,

    /// Module the level belongs to
    pub module_id: ModuleId,

    /// Level within the module
    pub level_id: LevelId,

    /// Whether the level has been finished
    pub is_completed: bool,

    /// Created at
    pub created_at: Time,

    /// Last mutation
    pub updated_at: Time,
}

impl LevelProgressRecord {
    /// A freshly started, not yet completed level.
    pub fn started(user_id: UserId, module_id: ModuleId, level_id: LevelId, now: Time) -> Self {
        Self {
            user_id,
            module_id,
            level_id,
            is_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Cache key of this record.
    pub fn key(&self) -> LevelKey {
        LevelKey::new(self.module_id, self.level_id)
    }

    /// Completed copy of this record. Completion is sticky: an already
    /// completed record is returned unchanged.
    pub fn completed(&self, now: Time) -> Self {
        if self.is_completed {
            return self.clone();
        }
        Self {
            is_completed: true,
            updated_at: now,
            ..self.clone()
        }
    }

    /// Merge another copy of the same record. Completion never regresses and
    /// the later `updated_at` wins.
    pub fn merge(&self, other: &LevelProgressRecord) -> Self {
        Self {
            user_id: self.user_id.clone(),
            module_id: self.module_id,
            level_id: self.level_id,
            is_completed: self.is_completed || other.is_completed,
            created_at: self.created_at.min(other.created_at),
            updated_at: self.updated_at.max(other.updated_at),
        }
    }
}

/// Unlock and completion state of one module for one user.
///
/// Unique per `(user_id, module_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProgressRecord {
    /// Owner
    pub user_id: UserId,

    /// Module
    pub module_id: ModuleId,

    /// Whether the module may be played
    pub is_unlocked: bool,

    /// Whether every level of the module is complete
    pub is_completed: bool,

    /// Created at
    pub created_at: Time,

    /// Last mutation
    pub updated_at: Time,
}

impl ModuleProgressRecord {
    /// Seed record: module 1 unlocked, every other module locked.
    pub fn seeded(user_id: UserId, module_id: ModuleId, now: Time) -> Self {
        Self {
            user_id,
            is_unlocked: module_id.is_first(),
            module_id,
            is_completed: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge another copy of the same record. Flags never regress.
    pub fn merge(&self, other: &ModuleProgressRecord) -> Self {
        Self {
            user_id: self.user_id.clone(),
            module_id: self.module_id,
            is_unlocked: self.is_unlocked || other.is_unlocked,
            is_completed: self.is_completed || other.is_completed,
            created_at: self.created_at.min(other.created_at),
            updated_at: self.updated_at.max(other.updated_at),
        }
    }
}

/// Level records of one module, ordered by level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProgress {
    /// Module
    pub module_id: ModuleId,

    /// Level records ordered by `level_id`
    pub levels: Vec<LevelProgressRecord>,
}

impl ModuleProgress {
    /// Build a snapshot, sorting the records by level.
    pub fn new(module_id: ModuleId, mut levels: Vec<LevelProgressRecord>) -> Self {
        levels.retain(|r| r.module_id == module_id);
        levels.sort_by_key(|r| r.level_id);
        Self { module_id, levels }
    }

    /// Record for a level, if one exists.
    pub fn level(&self, level: LevelId) -> Option<&LevelProgressRecord> {
        self.levels.iter().find(|r| r.level_id == level)
    }

    /// Whether a level has a completed record.
    pub fn is_level_completed(&self, level: LevelId) -> bool {
        self.level(level).map(|r| r.is_completed).unwrap_or(false)
    }

    /// Number of completed levels among `1..=total`.
    pub fn completed_count(&self, total: u32) -> u32 {
        self.levels
            .iter()
            .filter(|r| r.is_completed && r.level_id.0 >= 1 && r.level_id.0 <= total)
            .count() as u32
    }

    /// Whether every level in `1..=total` is complete. An empty module is
    /// never complete.
    pub fn all_completed(&self, total: u32) -> bool {
        total > 0 && self.completed_count(total) == total
    }
}

/// Tri-state status of a module or level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnlockStatus {
    /// Not yet reachable
    Locked,
    /// Unlocked, not completed
    Available,
    /// Finished
    Completed,
}

impl UnlockStatus {
    /// Derive the status from the two underlying booleans.
    pub fn from_flags(unlocked: bool, completed: bool) -> Self {
        match (unlocked, completed) {
            (_, true) => UnlockStatus::Completed,
            (true, false) => UnlockStatus::Available,
            (false, false) => UnlockStatus::Locked,
        }
    }

    /// Anything but `Locked`.
    pub fn is_unlocked(self) -> bool {
        !matches!(self, UnlockStatus::Locked)
    }
}

impl std::fmt::Display for UnlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnlockStatus::Locked => write!(f, "locked"),
            UnlockStatus::Available => write!(f, "available"),
            UnlockStatus::Completed => write!(f, "completed"),
        }
    }
}

/// Completed-count over total for one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Module
    pub module_id: ModuleId,

    /// Completed levels
    pub completed: u32,

    /// Levels in the module
    pub total: u32,
}

impl ProgressSummary {
    /// Percentage complete.
    pub fn percentage(&self) -> f32 {
        if self.total > 0 {
            (self.completed as f32 / self.total as f32) * 100.0
        } else {
            0.0
        }
    }
}
