//! Progress tracking and unlock evaluation.
//!
//! Level and module records, the unlock rules derived from them, and the
//! per-session state (replica, unlock cache, outbox) they are evaluated
//! against.

#![warn(missing_docs)]

pub mod error;
pub mod cache;
pub mod locks;
pub mod context;
pub mod evaluator;
pub mod store;

pub use error::{ProgressError, Result};
pub use cache::UnlockCache;
pub use locks::{WriteKey, WriteLocks};
pub use context::{ContextState, EngineContext, LocalReplica, Outbox, PendingChange};
pub use evaluator::UnlockEvaluator;
pub use store::{AdminOps, ProgressStore};
