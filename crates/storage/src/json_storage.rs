//! JSON file storage implementation.
//!
//! Stores one JSON file per record under a per-user directory:
//!
//! ```text
//! <root>/users/<user>/levels/<module>-<level>.json
//! <root>/users/<user>/modules/<module>.json
//! <root>/users/<user>/timers/<screen>.json
//! ```
//!
//! User and screen names are hex-encoded so arbitrary ids map to safe file
//! names. Writes go through a temporary file and a rename so a crash never
//! leaves a half-written record behind.

use std::path::{Path, PathBuf};
use async_trait::async_trait;
use tokio::fs;
use tokio::sync::Mutex;
use waypoint_core::{
    LevelId, LevelProgressRecord, ModuleId, ModuleProgressRecord, ScreenId, TimerSnapshot, UserId,
};
use super::{RemoteStore, Result};

/// File-based JSON storage backend.
pub struct JsonStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStore {
    /// Create storage rooted at `root`, creating the directory if needed.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("users")).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    fn user_dir(&self, user: &UserId) -> PathBuf {
        self.root.join("users").join(encode_name(user.as_str()))
    }

    fn levels_dir(&self, user: &UserId) -> PathBuf {
        self.user_dir(user).join("levels")
    }
    fn modules_dir(&self, user: &UserId) -> PathBuf {
        self.user_dir(user).join("modules")
    }
    fn timers_dir(&self, user: &UserId) -> PathBuf {
        self.user_dir(user).join("timers")
    }

    fn level_path(&self, user: &UserId, module: ModuleId, level: LevelId) -> PathBuf {
        self.levels_dir(user).join(format!("{}-{}.json", module, level))
    }
    fn module_path(&self, user: &UserId, module: ModuleId) -> PathBuf {
        self.modules_dir(user).join(format!("{}.json", module))
    }
    fn timer_path(&self, user: &UserId, screen: &ScreenId) -> PathBuf {
        self.timers_dir(user).join(format!("{}.json", encode_name(screen.as_str())))
    }

    async fn write_json<T: serde::Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)?;
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json.as_bytes()).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for JsonStore {
    async fn upsert_level(&self, record: &LevelProgressRecord) -> Result<()> {
        let path = self.level_path(&record.user_id, record.module_id, record.level_id);
        self.write_json(&path, record).await
    }

    async fn load_level(
        &self,
        user: &UserId,
        module: ModuleId,
        level: LevelId,
    ) -> Result<Option<LevelProgressRecord>> {
        read_json(&self.level_path(user, module, level)).await
    }

    async fn list_levels(
        &self,
        user: &UserId,
        module: Option<ModuleId>,
    ) -> Result<Vec<LevelProgressRecord>> {
        let mut levels: Vec<LevelProgressRecord> = list_dir(&self.levels_dir(user)).await?;
        levels.retain(|r| module.map_or(true, |m| r.module_id == m));
        levels.sort_by_key(|r| (r.module_id, r.level_id));
        Ok(levels)
    }

    async fn upsert_module(&self, record: &ModuleProgressRecord) -> Result<()> {
        let path = self.module_path(&record.user_id, record.module_id);
        self.write_json(&path, record).await
    }

    async fn load_module(
        &self,
        user: &UserId,
        module: ModuleId,
    ) -> Result<Option<ModuleProgressRecord>> {
        read_json(&self.module_path(user, module)).await
    }

    async fn list_modules(&self, user: &UserId) -> Result<Vec<ModuleProgressRecord>> {
        let mut modules: Vec<ModuleProgressRecord> = list_dir(&self.modules_dir(user)).await?;
        modules.sort_by_key(|r| r.module_id);
        Ok(modules)
    }

    async fn save_timer(&self, snapshot: &TimerSnapshot) -> Result<()> {
        let path = self.timer_path(&snapshot.user_id, &snapshot.screen_id);
        self.write_json(&path, snapshot).await
    }

    async fn load_timer(&self, user: &UserId, screen: &ScreenId) -> Result<Option<TimerSnapshot>> {
        read_json(&self.timer_path(user, screen)).await
    }

    async fn delete_user(&self, user: &UserId) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let mut removed = 0;
        for dir in [self.levels_dir(user), self.modules_dir(user), self.timers_dir(user)] {
            removed += count_json(&dir).await?;
        }
        fs::remove_dir_all(self.user_dir(user)).await.or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
        })?;
        Ok(removed)
    }
}

/// Ids are caller supplied and may contain `/`, `..` or characters a file
/// system rejects. Hex keeps each id a single safe path component.
fn encode_name(name: &str) -> String {
    name.bytes().map(|b| format!("{:02x}", b)).collect()
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&entry.path()).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => tracing::warn!(path = %entry.path().display(), error = %e, "skipping unreadable record"),
        }
    }
    Ok(items)
}

async fn count_json(dir: &Path) -> Result<usize> {
    let mut count = 0;
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = rd.next_entry().await? {
        if entry.path().extension().and_then(|s| s.to_str()) == Some("json") {
            count += 1;
        }
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_level_round_trip_and_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();
        let user = UserId::new("player@example.com");
        let now = Utc::now();

        for level in [3, 1, 2] {
            let record = LevelProgressRecord::started(user.clone(), ModuleId(2), LevelId(level), now);
            store.upsert_level(&record).await.unwrap();
        }
        store
            .upsert_level(&LevelProgressRecord::started(user.clone(), ModuleId(1), LevelId(1), now))
            .await
            .unwrap();

        let module_two = store.list_levels(&user, Some(ModuleId(2))).await.unwrap();
        let order: Vec<u32> = module_two.iter().map(|r| r.level_id.0).collect();
        assert_eq!(order, vec![1, 2, 3]);
        assert_eq!(store.list_levels(&user, None).await.unwrap().len(), 4);
    }

    #[test]
    fn test_encode_name_is_single_component() {
        let encoded = encode_name("../team/a b");
        assert!(encoded.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(encode_name("a/b"), encode_name("a_b"));
    }

    #[tokio::test]
    async fn test_missing_user_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();
        let user = UserId::new("nobody");

        assert!(store.list_modules(&user).await.unwrap().is_empty());
        assert!(store.load_level(&user, ModuleId(1), LevelId(1)).await.unwrap().is_none());
        assert_eq!(store.delete_user(&user).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_timer_superseded_and_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path()).await.unwrap();
        let user = UserId::new("u1");
        let screen = ScreenId::new("case/interview");

        store.save_timer(&TimerSnapshot::now(user.clone(), screen.clone(), 600)).await.unwrap();
        store.save_timer(&TimerSnapshot::now(user.clone(), screen.clone(), 570)).await.unwrap();
        let loaded = store.load_timer(&user, &screen).await.unwrap().unwrap();
        assert_eq!(loaded.remaining_seconds, 570);

        assert_eq!(store.delete_user(&user).await.unwrap(), 1);
        assert!(store.load_timer(&user, &screen).await.unwrap().is_none());
    }
}
