//! Storage abstraction and implementations for Waypoint.
//!
//! This crate provides the [`RemoteStore`] trait (the contract the progress
//! engine writes through) and its backends: an in-process map store, a JSON
//! file tree, and optionally SQLite and a REST endpoint.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
pub mod json_storage;
#[cfg(feature = "sqlite")]
pub mod sqlite_storage;
#[cfg(feature = "http")]
pub mod http_storage;

pub use trait_::{RemoteStore, StorageError, Result};
pub use memory::MemoryStore;
pub use json_storage::JsonStore;
#[cfg(feature = "sqlite")]
pub use sqlite_storage::SqliteStore;
#[cfg(feature = "http")]
pub use http_storage::HttpStore;
