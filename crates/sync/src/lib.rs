//! Offline-first synchronization.
//!
//! Pulls the remote snapshot on startup, replays queued local changes,
//! and skips remote work entirely when nothing changed locally.

#![warn(missing_docs)]

pub mod error;
pub mod engine;
pub mod lifecycle;

pub use error::SyncError;
pub use engine::{SyncEngine, SyncOptions, SyncPhase, SyncStats};
pub use lifecycle::{LifecycleEvent, PeriodicSync};
