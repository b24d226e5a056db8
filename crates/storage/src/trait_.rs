//! Remote store abstraction.

use async_trait::async_trait;
use waypoint_core::{
    LevelId, LevelProgressRecord, ModuleId, ModuleProgressRecord, ScreenId, TimerSnapshot, UserId,
};

/// Error type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// SQLite error
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// HTTP transport error
    #[cfg(feature = "http")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Store cannot be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl StorageError {
    /// Whether retrying later could succeed (connectivity rather than data).
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(_) | StorageError::Unavailable(_) => true,
            #[cfg(feature = "http")]
            StorageError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Remote store for progress records and timer snapshots.
///
/// Writes are upserts by composite key: `(user, module, level)` for level
/// records, `(user, module)` for module records, `(user, screen)` for timer
/// snapshots. Implementations must be safe to share across tasks.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    // === Level progress ===

    /// Create or replace a level record.
    async fn upsert_level(&self, record: &LevelProgressRecord) -> Result<()>;

    /// Load one level record.
    async fn load_level(
        &self,
        user: &UserId,
        module: ModuleId,
        level: LevelId,
    ) -> Result<Option<LevelProgressRecord>>;

    /// List a user's level records, optionally restricted to one module,
    /// ordered by module then level.
    async fn list_levels(
        &self,
        user: &UserId,
        module: Option<ModuleId>,
    ) -> Result<Vec<LevelProgressRecord>>;

    // === Module progress ===

    /// Create or replace a module record.
    async fn upsert_module(&self, record: &ModuleProgressRecord) -> Result<()>;

    /// Load one module record.
    async fn load_module(
        &self,
        user: &UserId,
        module: ModuleId,
    ) -> Result<Option<ModuleProgressRecord>>;

    /// List a user's module records ordered by module.
    async fn list_modules(&self, user: &UserId) -> Result<Vec<ModuleProgressRecord>>;

    // === Timers ===

    /// Replace the timer snapshot for `(user, screen)`.
    async fn save_timer(&self, snapshot: &TimerSnapshot) -> Result<()>;

    /// Load the timer snapshot for `(user, screen)`.
    async fn load_timer(&self, user: &UserId, screen: &ScreenId) -> Result<Option<TimerSnapshot>>;

    // === Administration ===

    /// Delete every record owned by `user`. Returns how many were removed.
    async fn delete_user(&self, user: &UserId) -> Result<usize>;
}

#[async_trait]
impl<S: RemoteStore + ?Sized> RemoteStore for std::sync::Arc<S> {
    async fn upsert_level(&self, record: &LevelProgressRecord) -> Result<()> {
        (**self).upsert_level(record).await
    }

    async fn load_level(
        &self,
        user: &UserId,
        module: ModuleId,
        level: LevelId,
    ) -> Result<Option<LevelProgressRecord>> {
        (**self).load_level(user, module, level).await
    }

    async fn list_levels(
        &self,
        user: &UserId,
        module: Option<ModuleId>,
    ) -> Result<Vec<LevelProgressRecord>> {
        (**self).list_levels(user, module).await
    }

    async fn upsert_module(&self, record: &ModuleProgressRecord) -> Result<()> {
        (**self).upsert_module(record).await
    }

    async fn load_module(
        &self,
        user: &UserId,
        module: ModuleId,
    ) -> Result<Option<ModuleProgressRecord>> {
        (**self).load_module(user, module).await
    }

    async fn list_modules(&self, user: &UserId) -> Result<Vec<ModuleProgressRecord>> {
        (**self).list_modules(user).await
    }

    async fn save_timer(&self, snapshot: &TimerSnapshot) -> Result<()> {
        (**self).save_timer(snapshot).await
    }

    async fn load_timer(&self, user: &UserId, screen: &ScreenId) -> Result<Option<TimerSnapshot>> {
        (**self).load_timer(user, screen).await
    }

    async fn delete_user(&self, user: &UserId) -> Result<usize> {
        (**self).delete_user(user).await
    }
}
