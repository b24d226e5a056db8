//! SQLite storage backend.
//!
//! One table per record family with the composite key as primary key, so
//! every write is a single `INSERT ... ON CONFLICT DO UPDATE`.

use std::path::Path;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use waypoint_core::{
    LevelId, LevelProgressRecord, ModuleId, ModuleProgressRecord, ScreenId, TimerSnapshot, UserId,
};

use super::trait_::{RemoteStore, Result, StorageError};

/// SQLite storage implementation.
#[derive(Clone)]
pub struct SqliteStore {
    /// Database connection pool
    pool: sqlx::SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    pub async fn new_from_path(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Create an in-memory SQLite storage for testing.
    ///
    /// Limited to one connection: every `:memory:` connection is its own database.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let storage = Self { pool };
        storage.init_schema().await?;

        Ok(storage)
    }

    /// Initialize the database schema.
    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS level_progress (
                user_id TEXT NOT NULL,
                module_id INTEGER NOT NULL,
                level_id INTEGER NOT NULL,
                is_completed INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, module_id, level_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS module_progress (
                user_id TEXT NOT NULL,
                module_id INTEGER NOT NULL,
                is_unlocked INTEGER NOT NULL,
                is_completed INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (user_id, module_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS timer_snapshots (
                user_id TEXT NOT NULL,
                screen_id TEXT NOT NULL,
                remaining_seconds INTEGER NOT NULL,
                last_saved_at TEXT NOT NULL,
                PRIMARY KEY (user_id, screen_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn level_from_row(row: &SqliteRow) -> Result<LevelProgressRecord> {
        Ok(LevelProgressRecord {
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            module_id: ModuleId(to_u32(row.try_get("module_id")?)?),
            level_id: LevelId(to_u32(row.try_get("level_id")?)?),
            is_completed: row.try_get("is_completed")?,
            created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_time(&row.try_get::<String, _>("updated_at")?)?,
        })
    }

    fn module_from_row(row: &SqliteRow) -> Result<ModuleProgressRecord> {
        Ok(ModuleProgressRecord {
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            module_id: ModuleId(to_u32(row.try_get("module_id")?)?),
            is_unlocked: row.try_get("is_unlocked")?,
            is_completed: row.try_get("is_completed")?,
            created_at: parse_time(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_time(&row.try_get::<String, _>("updated_at")?)?,
        })
    }
}

#[async_trait]
impl RemoteStore for SqliteStore {
    // === Level progress ===

    async fn upsert_level(&self, record: &LevelProgressRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO level_progress (user_id, module_id, level_id, is_completed, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, module_id, level_id) DO UPDATE SET
                is_completed = excluded.is_completed,
                updated_at = excluded.updated_at",
        )
        .bind(record.user_id.as_str())
        .bind(i64::from(record.module_id.0))
        .bind(i64::from(record.level_id.0))
        .bind(record.is_completed)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_level(
        &self,
        user: &UserId,
        module: ModuleId,
        level: LevelId,
    ) -> Result<Option<LevelProgressRecord>> {
        let row = sqlx::query(
            "SELECT * FROM level_progress WHERE user_id = ? AND module_id = ? AND level_id = ?",
        )
        .bind(user.as_str())
        .bind(i64::from(module.0))
        .bind(i64::from(level.0))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::level_from_row).transpose()
    }

    async fn list_levels(
        &self,
        user: &UserId,
        module: Option<ModuleId>,
    ) -> Result<Vec<LevelProgressRecord>> {
        let rows = match module {
            Some(module) => {
                sqlx::query(
                    "SELECT * FROM level_progress WHERE user_id = ? AND module_id = ?
                    ORDER BY module_id, level_id",
                )
                .bind(user.as_str())
                .bind(i64::from(module.0))
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM level_progress WHERE user_id = ? ORDER BY module_id, level_id",
                )
                .bind(user.as_str())
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::level_from_row).collect()
    }

    // === Module progress ===

    async fn upsert_module(&self, record: &ModuleProgressRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO module_progress (user_id, module_id, is_unlocked, is_completed, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (user_id, module_id) DO UPDATE SET
                is_unlocked = excluded.is_unlocked,
                is_completed = excluded.is_completed,
                updated_at = excluded.updated_at",
        )
        .bind(record.user_id.as_str())
        .bind(i64::from(record.module_id.0))
        .bind(record.is_unlocked)
        .bind(record.is_completed)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_module(
        &self,
        user: &UserId,
        module: ModuleId,
    ) -> Result<Option<ModuleProgressRecord>> {
        let row = sqlx::query("SELECT * FROM module_progress WHERE user_id = ? AND module_id = ?")
            .bind(user.as_str())
            .bind(i64::from(module.0))
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::module_from_row).transpose()
    }

    async fn list_modules(&self, user: &UserId) -> Result<Vec<ModuleProgressRecord>> {
        let rows = sqlx::query("SELECT * FROM module_progress WHERE user_id = ? ORDER BY module_id")
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::module_from_row).collect()
    }

    // === Timers ===

    async fn save_timer(&self, snapshot: &TimerSnapshot) -> Result<()> {
        sqlx::query(
            "INSERT INTO timer_snapshots (user_id, screen_id, remaining_seconds, last_saved_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (user_id, screen_id) DO UPDATE SET
                remaining_seconds = excluded.remaining_seconds,
                last_saved_at = excluded.last_saved_at",
        )
        .bind(snapshot.user_id.as_str())
        .bind(snapshot.screen_id.as_str())
        .bind(i64::from(snapshot.remaining_seconds))
        .bind(snapshot.last_saved_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_timer(&self, user: &UserId, screen: &ScreenId) -> Result<Option<TimerSnapshot>> {
        let row = sqlx::query("SELECT * FROM timer_snapshots WHERE user_id = ? AND screen_id = ?")
            .bind(user.as_str())
            .bind(screen.as_str())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(TimerSnapshot {
            user_id: UserId::new(row.try_get::<String, _>("user_id")?),
            screen_id: ScreenId::new(row.try_get::<String, _>("screen_id")?),
            remaining_seconds: to_u32(row.try_get("remaining_seconds")?)?,
            last_saved_at: parse_time(&row.try_get::<String, _>("last_saved_at")?)?,
        }))
    }

    // === Administration ===

    async fn delete_user(&self, user: &UserId) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for table in ["level_progress", "module_progress", "timer_snapshots"] {
            let result = sqlx::query(&format!("DELETE FROM {} WHERE user_id = ?", table))
                .bind(user.as_str())
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(removed)
    }
}

fn to_u32(value: i64) -> Result<u32> {
    u32::try_from(value).map_err(|_| StorageError::Other(format!("id out of range: {}", value)))
}

fn parse_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::Other(format!("bad timestamp {:?}: {}", s, e)))
}
