//! In-process store.
//!
//! Keeps everything in maps behind a mutex. The connectivity switch makes
//! every call fail with [`StorageError::Unavailable`], which is how offline
//! behaviour is exercised without a network.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use async_trait::async_trait;
use tokio::sync::Mutex;
use waypoint_core::{
    LevelId, LevelProgressRecord, ModuleId, ModuleProgressRecord, ScreenId, TimerSnapshot, UserId,
};
use super::{RemoteStore, Result, StorageError};

#[derive(Default)]
struct Tables {
    levels: BTreeMap<(UserId, ModuleId, LevelId), LevelProgressRecord>,
    modules: BTreeMap<(UserId, ModuleId), ModuleProgressRecord>,
    timers: BTreeMap<(UserId, ScreenId), TimerSnapshot>,
}

/// Map-backed store with a connectivity switch and a write counter.
pub struct MemoryStore {
    tables: Mutex<Tables>,
    online: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Empty, reachable store.
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            online: AtomicBool::new(true),
            writes: AtomicUsize::new(0),
        }
    }

    /// Toggle reachability.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Number of successful writes (upserts, timer saves, deletes).
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StorageError::Unavailable("memory store is offline".into()))
        }
    }

    fn count_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn upsert_level(&self, record: &LevelProgressRecord) -> Result<()> {
        self.check_online()?;
        let key = (record.user_id.clone(), record.module_id, record.level_id);
        self.tables.lock().await.levels.insert(key, record.clone());
        self.count_write();
        Ok(())
    }

    async fn load_level(
        &self,
        user: &UserId,
        module: ModuleId,
        level: LevelId,
    ) -> Result<Option<LevelProgressRecord>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.levels.get(&(user.clone(), module, level)).cloned())
    }

    async fn list_levels(
        &self,
        user: &UserId,
        module: Option<ModuleId>,
    ) -> Result<Vec<LevelProgressRecord>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .levels
            .values()
            .filter(|r| &r.user_id == user)
            .filter(|r| module.map_or(true, |m| r.module_id == m))
            .cloned()
            .collect())
    }

    async fn upsert_module(&self, record: &ModuleProgressRecord) -> Result<()> {
        self.check_online()?;
        let key = (record.user_id.clone(), record.module_id);
        self.tables.lock().await.modules.insert(key, record.clone());
        self.count_write();
        Ok(())
    }

    async fn load_module(
        &self,
        user: &UserId,
        module: ModuleId,
    ) -> Result<Option<ModuleProgressRecord>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.modules.get(&(user.clone(), module)).cloned())
    }

    async fn list_modules(&self, user: &UserId) -> Result<Vec<ModuleProgressRecord>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .modules
            .values()
            .filter(|r| &r.user_id == user)
            .cloned()
            .collect())
    }

    async fn save_timer(&self, snapshot: &TimerSnapshot) -> Result<()> {
        self.check_online()?;
        let key = (snapshot.user_id.clone(), snapshot.screen_id.clone());
        self.tables.lock().await.timers.insert(key, snapshot.clone());
        self.count_write();
        Ok(())
    }

    async fn load_timer(&self, user: &UserId, screen: &ScreenId) -> Result<Option<TimerSnapshot>> {
        self.check_online()?;
        let tables = self.tables.lock().await;
        Ok(tables.timers.get(&(user.clone(), screen.clone())).cloned())
    }

    async fn delete_user(&self, user: &UserId) -> Result<usize> {
        self.check_online()?;
        let mut tables = self.tables.lock().await;
        let before = tables.levels.len() + tables.modules.len() + tables.timers.len();
        tables.levels.retain(|(u, _, _), _| u != user);
        tables.modules.retain(|(u, _), _| u != user);
        tables.timers.retain(|(u, _), _| u != user);
        let after = tables.levels.len() + tables.modules.len() + tables.timers.len();
        self.count_write();
        Ok(before - after)
    }
}
