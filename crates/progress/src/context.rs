//! Engine-owned state.
//!
//! Everything the evaluator memoizes and the sync engine tracks lives in one
//! [`EngineContext`] per client session. Nothing here is global, so several
//! engines (one per test, say) can run side by side.

use std::collections::{BTreeMap, BTreeSet};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use waypoint_core::{
    Curriculum, LevelId, LevelKey, LevelProgressRecord, ModuleId, ModuleProgress,
    ModuleProgressRecord, ProgressSummary, RecordFamily, SessionId, SyncCursor, UnlockStatus,
    UserId,
};

use crate::cache::UnlockCache;
use crate::evaluator::UnlockEvaluator;
use crate::locks::WriteLocks;

/// Confirmed records of the signed-in user, as last read from or written to
/// the remote store.
#[derive(Debug, Default, Clone)]
pub struct LocalReplica {
    levels: BTreeMap<LevelKey, LevelProgressRecord>,
    modules: BTreeMap<ModuleId, ModuleProgressRecord>,
    loaded: BTreeSet<ModuleId>,
    modules_loaded: bool,
}

impl LocalReplica {
    /// Level record, if known.
    pub fn level(&self, key: LevelKey) -> Option<&LevelProgressRecord> {
        self.levels.get(&key)
    }

    /// Module record, if known.
    pub fn module(&self, module: ModuleId) -> Option<&ModuleProgressRecord> {
        self.modules.get(&module)
    }

    /// Level records of a module, ordered by level.
    pub fn module_progress(&self, module: ModuleId) -> ModuleProgress {
        ModuleProgress::new(
            module,
            self.levels
                .range(LevelKey::new(module, LevelId(0))..=LevelKey::new(module, LevelId(u32::MAX)))
                .map(|(_, r)| r.clone())
                .collect(),
        )
    }

    /// Whether a complete snapshot of `module`'s levels has been fetched.
    pub fn is_loaded(&self, module: ModuleId) -> bool {
        self.loaded.contains(&module)
    }

    /// Whether the module records have been fetched.
    pub fn modules_loaded(&self) -> bool {
        self.modules_loaded
    }

    /// Merge a confirmed level record. Completion never regresses.
    /// Returns whether anything changed.
    pub fn apply_level(&mut self, record: &LevelProgressRecord) -> bool {
        let key = record.key();
        let merged = match self.levels.get(&key) {
            Some(existing) => existing.merge(record),
            None => record.clone(),
        };
        let changed = self.levels.get(&key) != Some(&merged);
        self.levels.insert(key, merged);
        changed
    }

    /// Merge a confirmed module record. Returns whether anything changed.
    pub fn apply_module(&mut self, record: &ModuleProgressRecord) -> bool {
        let merged = match self.modules.get(&record.module_id) {
            Some(existing) => existing.merge(record),
            None => record.clone(),
        };
        let changed = self.modules.get(&record.module_id) != Some(&merged);
        self.modules.insert(record.module_id, merged);
        changed
    }

    /// Install a complete snapshot of one module's levels.
    pub fn load_module_levels(&mut self, module: ModuleId, records: &[LevelProgressRecord]) {
        for record in records.iter().filter(|r| r.module_id == module) {
            self.apply_level(record);
        }
        self.loaded.insert(module);
    }

    /// Install the full module list.
    pub fn load_modules(&mut self, records: &[ModuleProgressRecord]) {
        for record in records {
            self.apply_module(record);
        }
        self.modules_loaded = true;
    }

    /// Overwrite one module's records with `records`, dropping any merged
    /// history. Used when progress is reseeded.
    pub fn replace_module(
        &mut self,
        module: ModuleId,
        record: &ModuleProgressRecord,
        levels: &[LevelProgressRecord],
    ) {
        self.levels.retain(|key, _| key.module != module);
        for level in levels.iter().filter(|r| r.module_id == module) {
            self.levels.insert(level.key(), level.clone());
        }
        self.modules.insert(module, record.clone());
        self.loaded.insert(module);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// A local change the remote store has not confirmed yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PendingChange {
    /// `start_level` that failed to reach the store
    StartLevel(LevelKey),
    /// `complete_level` that failed to reach the store
    CompleteLevel(LevelKey),
    /// `start_module` that failed to reach the store
    StartModule(ModuleId),
    /// Module completion recheck that did not finish
    RecheckModule(ModuleId),
}

impl PendingChange {
    /// Module this change belongs to.
    pub fn module(&self) -> ModuleId {
        match self {
            PendingChange::StartLevel(key) | PendingChange::CompleteLevel(key) => key.module,
            PendingChange::StartModule(m) | PendingChange::RecheckModule(m) => *m,
        }
    }

    /// Record family the change touches.
    pub fn family(&self) -> RecordFamily {
        match self {
            PendingChange::StartLevel(_) | PendingChange::CompleteLevel(_) => RecordFamily::Level,
            PendingChange::StartModule(_) | PendingChange::RecheckModule(_) => RecordFamily::Module,
        }
    }
}

/// Unconfirmed changes, coalesced per key.
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    levels: BTreeMap<(UserId, LevelKey), bool>,
    modules: BTreeMap<(UserId, ModuleId), bool>,
}

impl Outbox {
    /// Queue a change. A completion supersedes a start of the same level and
    /// a recheck supersedes a start of the same module.
    pub fn push(&mut self, user: &UserId, change: PendingChange) {
        match change {
            PendingChange::StartLevel(key) => {
                self.levels.entry((user.clone(), key)).or_insert(false);
            }
            PendingChange::CompleteLevel(key) => {
                self.levels.insert((user.clone(), key), true);
            }
            PendingChange::StartModule(m) => {
                self.modules.entry((user.clone(), m)).or_insert(false);
            }
            PendingChange::RecheckModule(m) => {
                self.modules.insert((user.clone(), m), true);
            }
        }
    }

    /// Remove and return everything queued for `user`, levels first.
    pub fn drain_user(&mut self, user: &UserId) -> Vec<PendingChange> {
        let mut changes = Vec::new();
        self.levels.retain(|(u, key), complete| {
            if u != user {
                return true;
            }
            changes.push(if *complete {
                PendingChange::CompleteLevel(*key)
            } else {
                PendingChange::StartLevel(*key)
            });
            false
        });
        self.modules.retain(|(u, m), recheck| {
            if u != user {
                return true;
            }
            changes.push(if *recheck {
                PendingChange::RecheckModule(*m)
            } else {
                PendingChange::StartModule(*m)
            });
            false
        });
        changes
    }

    /// Number of changes queued for `user`.
    pub fn len_for(&self, user: &UserId) -> usize {
        self.levels.keys().filter(|(u, _)| u == user).count()
            + self.modules.keys().filter(|(u, _)| u == user).count()
    }

    /// Whether nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty() && self.modules.is_empty()
    }
}

/// Mutable state of one engine instance.
#[derive(Debug, Default)]
pub struct ContextState {
    /// Signed-in user; the replica and cache belong to this user
    pub user: Option<UserId>,

    /// Memoized unlock answers
    pub cache: UnlockCache,

    /// Confirmed records
    pub replica: LocalReplica,

    /// Pending-change tracking for smart sync
    pub cursor: SyncCursor,

    /// Changes waiting for the remote store
    pub outbox: Outbox,
}

impl ContextState {
    /// Whether `user` is the signed-in user.
    pub fn owns(&self, user: &UserId) -> bool {
        self.user.as_ref() == Some(user)
    }

    /// Apply a confirmed level write and evict the module's cache entries.
    pub fn confirm_level(&mut self, record: &LevelProgressRecord) {
        if !self.owns(&record.user_id) {
            return;
        }
        self.replica.apply_level(record);
        let evicted = self.cache.evict_module(record.module_id);
        debug!(key = %record.key(), evicted, "level confirmed");
    }

    /// Apply a confirmed module write and evict the module's cache entries.
    pub fn confirm_module(&mut self, record: &ModuleProgressRecord) {
        if !self.owns(&record.user_id) {
            return;
        }
        self.replica.apply_module(record);
        self.cache.evict_module(record.module_id);
    }

    /// Queue an unconfirmed change and mark the cursor.
    pub fn defer(&mut self, user: &UserId, change: PendingChange) {
        self.outbox.push(user, change);
        self.cursor.mark(change.family());
    }
}

/// Shared state of one client session.
pub struct EngineContext {
    session: SessionId,
    evaluator: UnlockEvaluator,
    state: Mutex<ContextState>,
    locks: WriteLocks,
}

impl EngineContext {
    /// Fresh context for `curriculum`.
    pub fn new(curriculum: Curriculum) -> Self {
        Self {
            session: SessionId::new(),
            evaluator: UnlockEvaluator::new(curriculum),
            state: Mutex::new(ContextState::default()),
            locks: WriteLocks::new(),
        }
    }

    /// Session identifier.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Module and level layout.
    pub fn curriculum(&self) -> &Curriculum {
        self.evaluator.curriculum()
    }

    /// The evaluator bound to this context's curriculum.
    pub fn evaluator(&self) -> &UnlockEvaluator {
        &self.evaluator
    }

    /// Per-key write locks.
    pub fn locks(&self) -> &WriteLocks {
        &self.locks
    }

    /// Lock the mutable state. Never held across a remote call.
    pub async fn state(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().await
    }

    // === Session ===

    /// Authenticate `user`. Switching users drops the previous user's replica
    /// and cache.
    pub async fn sign_in(&self, user: UserId) {
        let mut state = self.state().await;
        if state.user.as_ref() != Some(&user) {
            state.replica.clear();
            state.cache.clear();
        }
        info!(session = %self.session, user = %user, "signed in");
        state.user = Some(user);
    }

    /// Drop the signed-in user and everything derived from their data.
    pub async fn sign_out(&self) {
        let mut state = self.state().await;
        if let Some(user) = state.user.take() {
            info!(session = %self.session, user = %user, "signed out");
        }
        state.replica.clear();
        state.cache.clear();
    }

    /// Signed-in user, if any.
    pub async fn current_user(&self) -> Option<UserId> {
        self.state().await.user.clone()
    }

    /// Copy of the sync cursor.
    pub async fn cursor(&self) -> SyncCursor {
        self.state().await.cursor.clone()
    }

    // === Render-time queries (signed-in user) ===

    /// Whether a level may be played.
    pub async fn is_level_unlocked(&self, module: ModuleId, level: LevelId) -> bool {
        let mut state = self.state().await;
        self.evaluator.is_level_unlocked(&mut state, module, level)
    }

    /// Whether a level has been finished.
    pub async fn is_level_completed(&self, module: ModuleId, level: LevelId) -> bool {
        let state = self.state().await;
        self.evaluator.is_level_completed(&state, module, level)
    }

    /// Tri-state status of a level.
    pub async fn level_status(&self, module: ModuleId, level: LevelId) -> UnlockStatus {
        let mut state = self.state().await;
        self.evaluator.level_status(&mut state, module, level)
    }

    /// Whether a module may be played.
    pub async fn is_module_unlocked(&self, module: ModuleId) -> bool {
        let state = self.state().await;
        self.evaluator.is_module_unlocked(&state, module)
    }

    /// Whether every level of a module is finished.
    pub async fn is_module_completed(&self, module: ModuleId) -> bool {
        let state = self.state().await;
        self.evaluator.is_module_completed(&state, module)
    }

    /// Tri-state status of a module.
    pub async fn module_status(&self, module: ModuleId) -> UnlockStatus {
        let state = self.state().await;
        self.evaluator.module_status(&state, module)
    }

    /// Completed-count over total for a module.
    pub async fn module_summary(&self, module: ModuleId) -> ProgressSummary {
        let state = self.state().await;
        self.evaluator.summary(&state, module)
    }
}
