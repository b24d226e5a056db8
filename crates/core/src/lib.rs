//! Waypoint core data models.
//!
//! Records, identifiers and small policies shared by the progress store,
//! the unlock evaluator, the sync engine and countdown persistence.

#![warn(missing_docs)]

// Identities
mod id;

// Progress records
mod progress;
mod curriculum;

// Sync and timers
mod sync;
mod timer;
mod gate;

// Configuration
mod config;

pub use id::*;

pub use progress::{
    LevelProgressRecord, ModuleProgressRecord, ModuleProgress, UnlockStatus, ProgressSummary,
};
pub use curriculum::{Curriculum, ModuleSpec};
pub use sync::{RecordFamily, SyncCursor, SyncResult};
pub use timer::TimerSnapshot;
pub use gate::{Delta, DeltaGate};
pub use config::{ConfigError, EngineConfig, SyncSettings, TimerSettings};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
