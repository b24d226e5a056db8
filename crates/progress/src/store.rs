//! Progress store: every progress read and write against the remote store
//! goes through here.
//!
//! Successful writes are applied to the context's replica, evict the
//! module's unlock cache entries and mark the sync cursor. Writes that fail
//! to reach the store are queued in the outbox for the next sync and reported
//! as [`ProgressError::Remote`].

use std::sync::Arc;
use chrono::Utc;
use tracing::{debug, error, info, warn};
use waypoint_core::{
    LevelId, LevelKey, LevelProgressRecord, ModuleId, ModuleProgress, ModuleProgressRecord,
    ProgressSummary, RecordFamily, UserId,
};
use waypoint_storage::RemoteStore;

use crate::context::{EngineContext, PendingChange};
use crate::error::{ProgressError, Result};
use crate::locks::WriteKey;

/// Typed progress operations over a [`RemoteStore`].
pub struct ProgressStore<R: RemoteStore> {
    remote: Arc<R>,
    ctx: Arc<EngineContext>,
}

impl<R: RemoteStore> Clone for ProgressStore<R> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            ctx: self.ctx.clone(),
        }
    }
}

impl<R: RemoteStore> ProgressStore<R> {
    /// Create a store writing through `remote` and reporting into `ctx`.
    pub fn new(remote: Arc<R>, ctx: Arc<EngineContext>) -> Self {
        Self { remote, ctx }
    }

    /// The engine context.
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// The underlying remote store.
    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    fn check_user(&self, user: &UserId) -> Result<()> {
        if user.is_valid() {
            Ok(())
        } else {
            info!(user = ?user.as_str(), "rejecting progress call without a valid user");
            Err(ProgressError::Auth(user.clone()))
        }
    }

    fn check_level(&self, module: ModuleId, level: LevelId) -> Result<()> {
        if self.ctx.curriculum().contains_level(module, level) {
            Ok(())
        } else {
            Err(ProgressError::Data(format!(
                "level {} is not part of the curriculum",
                LevelKey::new(module, level)
            )))
        }
    }

    async fn remote_failed(
        &self,
        user: &UserId,
        change: PendingChange,
        e: waypoint_storage::StorageError,
    ) -> ProgressError {
        error!(user = %user, ?change, error = %e, "remote write failed, queued for sync");
        self.ctx.state().await.defer(user, change);
        ProgressError::Remote(e)
    }

    // === Level operations ===

    /// Create the level record if it does not exist yet. Never resets a
    /// completed level. Returns the resulting record.
    pub async fn start_level(
        &self,
        user: &UserId,
        module: ModuleId,
        level: LevelId,
    ) -> Result<LevelProgressRecord> {
        self.check_user(user)?;
        self.check_level(module, level)?;
        let key = LevelKey::new(module, level);
        let change = PendingChange::StartLevel(key);
        let _guard = self.ctx.locks().acquire(WriteKey::Level(user.clone(), key)).await;

        let existing = match self.remote.load_level(user, module, level).await {
            Ok(existing) => existing,
            Err(e) => return Err(self.remote_failed(user, change, e).await),
        };
        if let Some(record) = existing {
            debug!(user = %user, %key, "level already started");
            self.ctx.state().await.confirm_level(&record);
            return Ok(record);
        }

        let record = LevelProgressRecord::started(user.clone(), module, level, Utc::now());
        if let Err(e) = self.remote.upsert_level(&record).await {
            return Err(self.remote_failed(user, change, e).await);
        }

        let mut state = self.ctx.state().await;
        state.confirm_level(&record);
        state.cursor.mark(RecordFamily::Level);
        info!(user = %user, %key, "level started");
        Ok(record)
    }

    /// Mark a level completed, then recheck the module's completion.
    ///
    /// Idempotent: completing an already completed level performs no level
    /// write. The module recheck is a best-effort follow-up; if it fails the
    /// level stays completed and the recheck is queued for the next sync.
    pub async fn complete_level(
        &self,
        user: &UserId,
        module: ModuleId,
        level: LevelId,
    ) -> Result<LevelProgressRecord> {
        self.check_user(user)?;
        self.check_level(module, level)?;
        let key = LevelKey::new(module, level);
        let change = PendingChange::CompleteLevel(key);

        let record = {
            let _guard = self.ctx.locks().acquire(WriteKey::Level(user.clone(), key)).await;
            let existing = match self.remote.load_level(user, module, level).await {
                Ok(existing) => existing,
                Err(e) => return Err(self.remote_failed(user, change, e).await),
            };

            match existing {
                Some(record) if record.is_completed => {
                    debug!(user = %user, %key, "level already completed");
                    self.ctx.state().await.confirm_level(&record);
                    record
                }
                existing => {
                    let now = Utc::now();
                    let record = existing
                        .unwrap_or_else(|| LevelProgressRecord::started(user.clone(), module, level, now))
                        .completed(now);
                    if let Err(e) = self.remote.upsert_level(&record).await {
                        return Err(self.remote_failed(user, change, e).await);
                    }
                    let mut state = self.ctx.state().await;
                    state.confirm_level(&record);
                    state.cursor.mark(RecordFamily::Level);
                    info!(user = %user, %key, "level completed");
                    record
                }
            }
        };

        if let Err(e) = self.recheck_module(user, module).await {
            warn!(user = %user, module = %module, error = %e, "module recheck failed");
            self.ctx
                .state()
                .await
                .defer(user, PendingChange::RecheckModule(module));
        }

        Ok(record)
    }

    /// Authoritative remote check. Level 1 answers without a remote call;
    /// unknown levels and missing records are locked.
    pub async fn is_level_unlocked(
        &self,
        user: &UserId,
        module: ModuleId,
        level: LevelId,
    ) -> Result<bool> {
        self.check_user(user)?;
        if level.is_first() {
            return Ok(true);
        }
        if !self.ctx.curriculum().contains_level(module, level) {
            return Ok(false);
        }
        let Some(prev) = level.previous() else {
            return Ok(false);
        };
        let record = self.remote.load_level(user, module, prev).await?;
        Ok(record.map(|r| r.is_completed).unwrap_or(false))
    }

    /// All level records of a module, ordered by level. For the signed-in
    /// user the result also becomes the module's snapshot in the replica.
    pub async fn get_module_progress(&self, user: &UserId, module: ModuleId) -> Result<ModuleProgress> {
        self.check_user(user)?;
        let owned = {
            let mut state = self.ctx.state().await;
            let owned = state.owns(user);
            if owned {
                state.cache.begin_loading(module);
            }
            owned
        };

        let fetched = self.remote.list_levels(user, Some(module)).await;

        if owned {
            let mut state = self.ctx.state().await;
            state.cache.finish_loading(module);
            if let Ok(levels) = &fetched {
                state.replica.load_module_levels(module, levels);
                state.cache.evict_module(module);
            }
        }

        let levels = fetched.map_err(|e| {
            error!(user = %user, module = %module, error = %e, "failed to fetch module progress");
            ProgressError::Remote(e)
        })?;
        Ok(ModuleProgress::new(module, levels))
    }

    /// Completed-count over total, read from the remote store.
    pub async fn module_summary(&self, user: &UserId, module: ModuleId) -> Result<ProgressSummary> {
        let progress = self.get_module_progress(user, module).await?;
        let total = self.ctx.curriculum().level_count(module).unwrap_or(0);
        Ok(ProgressSummary {
            module_id: module,
            completed: progress.completed_count(total),
            total,
        })
    }

    // === Module operations ===

    /// Module record, if one exists.
    pub async fn get_module_record(
        &self,
        user: &UserId,
        module: ModuleId,
    ) -> Result<Option<ModuleProgressRecord>> {
        self.check_user(user)?;
        let record = self.remote.load_module(user, module).await?;
        if let Some(record) = &record {
            self.ctx.state().await.confirm_module(record);
        }
        Ok(record)
    }

    /// All module records of a user, ordered by module.
    pub async fn list_module_records(&self, user: &UserId) -> Result<Vec<ModuleProgressRecord>> {
        self.check_user(user)?;
        let records = self.remote.list_modules(user).await?;
        let mut state = self.ctx.state().await;
        if state.owns(user) {
            state.replica.load_modules(&records);
        }
        Ok(records)
    }

    /// Create the module record if absent. Whether it is unlocked follows
    /// from the previous module's completion; starting a module never
    /// unlocks it by itself.
    pub async fn start_module(&self, user: &UserId, module: ModuleId) -> Result<ModuleProgressRecord> {
        self.check_user(user)?;
        if !self.ctx.curriculum().contains(module) {
            return Err(ProgressError::Data(format!("module {} is not part of the curriculum", module)));
        }
        let change = PendingChange::StartModule(module);
        let _guard = self.ctx.locks().acquire(WriteKey::Module(user.clone(), module)).await;

        match self.remote.load_module(user, module).await {
            Ok(Some(record)) => {
                self.ctx.state().await.confirm_module(&record);
                return Ok(record);
            }
            Ok(None) => {}
            Err(e) => return Err(self.remote_failed(user, change, e).await),
        }

        let unlocked = match self.previous_completed(user, module).await {
            Ok(unlocked) => unlocked,
            Err(e) => return Err(self.remote_failed(user, change, e).await),
        };
        let mut record = ModuleProgressRecord::seeded(user.clone(), module, Utc::now());
        record.is_unlocked = unlocked;
        if let Err(e) = self.remote.upsert_module(&record).await {
            return Err(self.remote_failed(user, change, e).await);
        }

        let mut state = self.ctx.state().await;
        state.confirm_module(&record);
        state.cursor.mark(RecordFamily::Module);
        info!(user = %user, module = %module, unlocked, "module started");
        Ok(record)
    }

    async fn previous_completed(
        &self,
        user: &UserId,
        module: ModuleId,
    ) -> waypoint_storage::Result<bool> {
        let Some(prev) = module.previous() else {
            return Ok(true);
        };
        Ok(self
            .remote
            .load_module(user, prev)
            .await?
            .map(|r| r.is_completed)
            .unwrap_or(false))
    }

    /// Create any missing module records: module 1 unlocked, the rest locked.
    /// Returns how many records were written.
    pub async fn seed_user(&self, user: &UserId) -> Result<usize> {
        self.check_user(user)?;
        let existing = self.remote.list_modules(user).await?;
        let now = Utc::now();
        let mut written = Vec::new();

        for module in self.ctx.curriculum().module_ids() {
            if existing.iter().any(|r| r.module_id == module) {
                continue;
            }
            let mut record = ModuleProgressRecord::seeded(user.clone(), module, now);
            record.is_unlocked = module.is_first()
                || module
                    .previous()
                    .and_then(|prev| existing.iter().find(|r| r.module_id == prev))
                    .map(|r| r.is_completed)
                    .unwrap_or(false);
            self.remote.upsert_module(&record).await?;
            written.push(record);
        }

        let mut state = self.ctx.state().await;
        if state.owns(user) {
            state.replica.load_modules(&existing);
            state.replica.load_modules(&written);
        }
        if !written.is_empty() {
            state.cursor.mark(RecordFamily::Module);
            info!(user = %user, seeded = written.len(), "seeded module records");
        }
        Ok(written.len())
    }

    /// Recompute a module's completion from its level records. When every
    /// level is complete the module is marked completed and the next module
    /// unlocked. Returns whether the module is complete.
    pub async fn recheck_module(&self, user: &UserId, module: ModuleId) -> Result<bool> {
        self.check_user(user)?;
        let Some(total) = self.ctx.curriculum().level_count(module) else {
            return Ok(false);
        };
        let _guard = self.ctx.locks().acquire(WriteKey::Module(user.clone(), module)).await;

        let levels = self.remote.list_levels(user, Some(module)).await?;
        {
            let mut state = self.ctx.state().await;
            if state.owns(user) {
                state.replica.load_module_levels(module, &levels);
                state.cache.evict_module(module);
            }
        }
        if !ModuleProgress::new(module, levels).all_completed(total) {
            return Ok(false);
        }

        let now = Utc::now();
        let current = self.remote.load_module(user, module).await?;
        if !current.as_ref().map(|r| r.is_completed && r.is_unlocked).unwrap_or(false) {
            let mut record = current.unwrap_or_else(|| ModuleProgressRecord::seeded(user.clone(), module, now));
            record.is_unlocked = true;
            record.is_completed = true;
            record.updated_at = now;
            self.remote.upsert_module(&record).await?;
            let mut state = self.ctx.state().await;
            state.confirm_module(&record);
            state.cursor.mark(RecordFamily::Module);
            info!(user = %user, module = %module, "module completed");
        }

        if let Some(next) = self.ctx.curriculum().next_module(module) {
            let _next_guard = self.ctx.locks().acquire(WriteKey::Module(user.clone(), next)).await;
            let current = self.remote.load_module(user, next).await?;
            if !current.as_ref().map(|r| r.is_unlocked).unwrap_or(false) {
                let mut record = current.unwrap_or_else(|| ModuleProgressRecord::seeded(user.clone(), next, now));
                record.is_unlocked = true;
                record.updated_at = now;
                self.remote.upsert_module(&record).await?;
                let mut state = self.ctx.state().await;
                state.confirm_module(&record);
                state.cursor.mark(RecordFamily::Module);
                info!(user = %user, module = %next, "module unlocked");
            }
        }

        Ok(true)
    }

    // === Administration ===

    /// Administrative operations. Kept behind a separate handle so that no
    /// normal play path reaches them by accident.
    pub fn admin(&self) -> AdminOps<'_, R> {
        AdminOps { store: self }
    }
}

/// Destructive progress operations for support and debugging.
pub struct AdminOps<'a, R: RemoteStore> {
    store: &'a ProgressStore<R>,
}

impl<R: RemoteStore> AdminOps<'_, R> {
    /// Delete every record of `user`. Returns how many were removed.
    pub async fn reset_user_progress(&self, user: &UserId) -> Result<usize> {
        self.store.check_user(user)?;
        warn!(user = %user, "resetting all progress");
        let removed = self.store.remote.delete_user(user).await?;

        let mut state = self.store.ctx.state().await;
        state.outbox.drain_user(user);
        if state.owns(user) {
            state.replica.clear();
            state.cache.clear();
        }
        // Timers go with the user's rows.
        for family in [RecordFamily::Level, RecordFamily::Module, RecordFamily::Timer] {
            state.cursor.mark(family);
        }
        warn!(user = %user, removed, "progress reset");
        Ok(removed)
    }

    /// Reseed one module: its module record (unlocked when the previous
    /// module is completed, module 1 always) and a fresh, not completed
    /// record for each of its levels. Existing records are overwritten.
    pub async fn initialize_user_progress(&self, user: &UserId, module: ModuleId) -> Result<ModuleProgress> {
        self.store.check_user(user)?;
        let ctx = &self.store.ctx;
        if !ctx.curriculum().contains(module) {
            return Err(ProgressError::Data(format!("module {} is not part of the curriculum", module)));
        }
        warn!(user = %user, module = %module, "reinitializing module progress");

        let now = Utc::now();
        let mut module_record = ModuleProgressRecord::seeded(user.clone(), module, now);
        module_record.is_unlocked = self.store.previous_completed(user, module).await?;
        self.store.remote.upsert_module(&module_record).await?;

        let mut levels = Vec::new();
        for level in ctx.curriculum().levels(module) {
            let record = LevelProgressRecord::started(user.clone(), module, level, now);
            self.store.remote.upsert_level(&record).await?;
            levels.push(record);
        }

        let mut state = ctx.state().await;
        state.cursor.mark(RecordFamily::Module);
        state.cursor.mark(RecordFamily::Level);
        if state.owns(user) {
            // Reseeding may regress completion, so replace rather than merge.
            state.replica.replace_module(module, &module_record, &levels);
            state.cache.evict_module(module);
        }
        Ok(ModuleProgress::new(module, levels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypoint_core::Curriculum;
    use waypoint_storage::MemoryStore;

    async fn setup() -> (ProgressStore<MemoryStore>, Arc<MemoryStore>, UserId) {
        let remote = Arc::new(MemoryStore::new());
        let ctx = Arc::new(EngineContext::new(Curriculum::default()));
        let user = UserId::new("learner-1");
        ctx.sign_in(user.clone()).await;
        (ProgressStore::new(remote.clone(), ctx), remote, user)
    }

    #[tokio::test]
    async fn test_start_level_is_idempotent_and_keeps_completion() {
        let (store, remote, user) = setup().await;
        store.complete_level(&user, ModuleId(1), LevelId(1)).await.unwrap();
        let writes = remote.writes();

        let record = store.start_level(&user, ModuleId(1), LevelId(1)).await.unwrap();
        assert!(record.is_completed);
        assert_eq!(remote.writes(), writes);
    }

    #[tokio::test]
    async fn test_complete_level_twice_same_state() {
        let (store, remote, user) = setup().await;
        let first = store.complete_level(&user, ModuleId(1), LevelId(1)).await.unwrap();
        let writes = remote.writes();
        let second = store.complete_level(&user, ModuleId(1), LevelId(1)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(remote.writes(), writes, "second completion writes nothing");
    }

    #[tokio::test]
    async fn test_completing_level_one_unlocks_level_two_only() {
        let (store, _remote, user) = setup().await;
        store.complete_level(&user, ModuleId(3), LevelId(1)).await.unwrap();

        let ctx = store.context();
        assert!(ctx.is_level_unlocked(ModuleId(3), LevelId(2)).await);
        assert!(!ctx.is_level_unlocked(ModuleId(3), LevelId(3)).await);
        assert!(store.is_level_unlocked(&user, ModuleId(3), LevelId(2)).await.unwrap());
        assert!(!store.is_level_unlocked(&user, ModuleId(3), LevelId(3)).await.unwrap());
    }

    #[tokio::test]
    async fn test_completing_all_levels_completes_module() {
        let (store, remote, user) = setup().await;
        store.seed_user(&user).await.unwrap();
        for level in 1..=4 {
            store.complete_level(&user, ModuleId(2), LevelId(level)).await.unwrap();
        }

        let module = remote.load_module(&user, ModuleId(2)).await.unwrap().unwrap();
        assert!(module.is_completed);
        let next = remote.load_module(&user, ModuleId(3)).await.unwrap().unwrap();
        assert!(next.is_unlocked);

        let ctx = store.context();
        assert!(ctx.is_module_completed(ModuleId(2)).await);
        assert!(ctx.is_module_unlocked(ModuleId(3)).await);
        assert!(!ctx.is_module_unlocked(ModuleId(4)).await);
    }

    #[tokio::test]
    async fn test_level_one_short_circuits_remote() {
        let (store, remote, user) = setup().await;
        remote.set_online(false);
        assert!(store.is_level_unlocked(&user, ModuleId(4), LevelId(1)).await.unwrap());
        assert!(store.is_level_unlocked(&user, ModuleId(4), LevelId(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_user_is_auth_error() {
        let (store, remote, _user) = setup().await;
        let err = store
            .complete_level(&UserId::new(""), ModuleId(1), LevelId(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressError::Auth(_)));
        assert!(err.is_expected());
        assert_eq!(remote.writes(), 0);
    }

    #[tokio::test]
    async fn test_unknown_level_is_data_error() {
        let (store, _remote, user) = setup().await;
        let err = store.start_level(&user, ModuleId(1), LevelId(9)).await.unwrap_err();
        assert!(matches!(err, ProgressError::Data(_)));
    }

    #[tokio::test]
    async fn test_offline_write_is_queued_not_confirmed() {
        let (store, remote, user) = setup().await;
        store.get_module_progress(&user, ModuleId(1)).await.unwrap();
        remote.set_online(false);

        let err = store.complete_level(&user, ModuleId(1), LevelId(1)).await.unwrap_err();
        assert!(matches!(err, ProgressError::Remote(_)));

        let ctx = store.context();
        assert!(!ctx.is_level_unlocked(ModuleId(1), LevelId(2)).await);
        let state = ctx.state().await;
        assert!(state.cursor.pending_local_change);
        assert_eq!(state.outbox.len_for(&user), 1);
    }

    #[tokio::test]
    async fn test_successful_write_marks_cursor() {
        let (store, _remote, user) = setup().await;
        assert!(!store.context().cursor().await.pending_local_change);
        store.start_level(&user, ModuleId(1), LevelId(1)).await.unwrap();
        let cursor = store.context().cursor().await;
        assert!(cursor.pending_local_change);
        assert!(cursor.dirty.contains(&RecordFamily::Level));
    }

    #[tokio::test]
    async fn test_concurrent_completions_write_once() {
        let (store, remote, user) = setup().await;
        let a = {
            let store = store.clone();
            let user = user.clone();
            tokio::spawn(async move { store.complete_level(&user, ModuleId(5), LevelId(1)).await })
        };
        let b = {
            let store = store.clone();
            let user = user.clone();
            tokio::spawn(async move { store.complete_level(&user, ModuleId(5), LevelId(1)).await })
        };
        let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
        assert_eq!(a, b);
        let level_writes = remote.writes();
        // One level write; module 5 is not complete so the recheck writes nothing.
        assert_eq!(level_writes, 1);
    }

    #[tokio::test]
    async fn test_seed_user_creates_missing_only() {
        let (store, remote, user) = setup().await;
        assert_eq!(store.seed_user(&user).await.unwrap(), 5);
        assert_eq!(store.seed_user(&user).await.unwrap(), 0);

        let modules = remote.list_modules(&user).await.unwrap();
        assert!(modules[0].is_unlocked);
        assert!(modules[1..].iter().all(|m| !m.is_unlocked));
    }

    #[tokio::test]
    async fn test_start_module_does_not_unlock() {
        let (store, _remote, user) = setup().await;
        let record = store.start_module(&user, ModuleId(3)).await.unwrap();
        assert!(!record.is_unlocked);
        let first = store.start_module(&user, ModuleId(1)).await.unwrap();
        assert!(first.is_unlocked);
    }

    #[tokio::test]
    async fn test_get_module_progress_ordered_and_loaded() {
        let (store, _remote, user) = setup().await;
        store.start_level(&user, ModuleId(2), LevelId(3)).await.unwrap();
        store.complete_level(&user, ModuleId(2), LevelId(1)).await.unwrap();

        let progress = store.get_module_progress(&user, ModuleId(2)).await.unwrap();
        let order: Vec<u32> = progress.levels.iter().map(|r| r.level_id.0).collect();
        assert_eq!(order, vec![1, 3]);
        assert!(store.context().state().await.replica.is_loaded(ModuleId(2)));

        let summary = store.module_summary(&user, ModuleId(2)).await.unwrap();
        assert_eq!((summary.completed, summary.total), (1, 4));
    }

    #[tokio::test]
    async fn test_admin_reset_and_initialize() {
        let (store, remote, user) = setup().await;
        store.complete_level(&user, ModuleId(1), LevelId(1)).await.unwrap();

        let removed = store.admin().reset_user_progress(&user).await.unwrap();
        assert!(removed >= 1);
        assert!(remote.list_levels(&user, None).await.unwrap().is_empty());

        store.complete_level(&user, ModuleId(1), LevelId(1)).await.unwrap();
        let progress = store.admin().initialize_user_progress(&user, ModuleId(1)).await.unwrap();
        assert_eq!(progress.levels.len(), 4);
        assert!(progress.levels.iter().all(|r| !r.is_completed));
        assert!(!store.context().is_level_completed(ModuleId(1), LevelId(1)).await);
    }

    #[tokio::test]
    async fn test_reset_marks_every_family_pending() {
        let (store, _remote, user) = setup().await;
        let before = store.context().cursor().await.generation;

        store.admin().reset_user_progress(&user).await.unwrap();

        let cursor = store.context().cursor().await;
        assert!(cursor.pending_local_change);
        assert!(cursor.generation > before);
        assert!(cursor.dirty.contains(&RecordFamily::Level));
        assert!(cursor.dirty.contains(&RecordFamily::Module));
        assert!(cursor.dirty.contains(&RecordFamily::Timer));
    }

    #[tokio::test]
    async fn test_initialize_unlocks_after_completed_predecessor() {
        let (store, remote, user) = setup().await;
        for level in 1..=4 {
            store.complete_level(&user, ModuleId(1), LevelId(level)).await.unwrap();
        }
        assert!(remote.load_module(&user, ModuleId(1)).await.unwrap().unwrap().is_completed);
        let before = store.context().cursor().await.generation;

        store.admin().initialize_user_progress(&user, ModuleId(2)).await.unwrap();
        let module = remote.load_module(&user, ModuleId(2)).await.unwrap().unwrap();
        assert!(module.is_unlocked);
        assert!(!module.is_completed);
        assert!(store.context().cursor().await.generation > before);

        store.admin().initialize_user_progress(&user, ModuleId(3)).await.unwrap();
        let locked = remote.load_module(&user, ModuleId(3)).await.unwrap().unwrap();
        assert!(!locked.is_unlocked);
    }
}
