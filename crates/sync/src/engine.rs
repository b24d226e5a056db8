//! The sync engine.
//!
//! Per-cycle state machine:
//! ```text
//! startup:          Idle → Pulling → Reconciled
//! smart sync:       Idle → Pulling → Pushing → Idle
//! teardown (exit):  Idle → Pushing → Idle
//! ```
//! Only one cycle runs at a time. A trigger that arrives while a cycle is
//! running is dropped, not queued; the next periodic or event trigger
//! retries.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use waypoint_core::{DeltaGate, ModuleId, SyncResult, SyncSettings, Time, UserId};
use waypoint_progress::{EngineContext, PendingChange, ProgressStore};
use waypoint_storage::RemoteStore;

use crate::error::SyncError;

/// Where the engine is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    /// No cycle running
    Idle,
    /// Fetching the remote snapshot
    Pulling,
    /// Startup snapshot applied
    Reconciled,
    /// Replaying local changes
    Pushing,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPhase::Idle => write!(f, "idle"),
            SyncPhase::Pulling => write!(f, "pulling"),
            SyncPhase::Reconciled => write!(f, "reconciled"),
            SyncPhase::Pushing => write!(f, "pushing"),
        }
    }
}

/// Options for [`SyncEngine::smart_sync`].
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Run even when offline or when nothing is pending
    pub force: bool,

    /// Only remote records updated after this count as changed. Defaults to
    /// the cursor's last sync time.
    pub last_sync_time: Option<Time>,
}

impl SyncOptions {
    /// Forced cycle.
    pub fn forced() -> Self {
        Self {
            force: true,
            last_sync_time: None,
        }
    }
}

/// Counters for UI indicators and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Cycles that reached the pull
    pub cycles: usize,
    /// Of those, forced cycles
    pub forced: usize,
    /// Triggers that returned without remote work
    pub skipped: usize,
    /// Queued changes replayed to the store
    pub pushed: usize,
}

#[derive(Debug, Default)]
struct Counters {
    cycles: AtomicUsize,
    forced: AtomicUsize,
    skipped: AtomicUsize,
    pushed: AtomicUsize,
}

impl Counters {
    fn snapshot(&self) -> SyncStats {
        SyncStats {
            cycles: self.cycles.load(Ordering::SeqCst),
            forced: self.forced.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
            pushed: self.pushed.load(Ordering::SeqCst),
        }
    }
}

/// Clears the in-flight flag when the cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Reconciles the local replica and outbox with the remote store.
pub struct SyncEngine<R: RemoteStore> {
    store: ProgressStore<R>,
    settings: SyncSettings,
    online: AtomicBool,
    in_flight: AtomicBool,
    mounted: AtomicBool,
    pulled_once: AtomicBool,
    phase: watch::Sender<SyncPhase>,
    counters: Counters,
    push_gate: Mutex<DeltaGate<u64>>,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// Create an engine. Starts online and idle.
    pub fn new(store: ProgressStore<R>, settings: SyncSettings) -> Self {
        let (phase, _) = watch::channel(SyncPhase::Idle);
        Self {
            store,
            settings,
            online: AtomicBool::new(true),
            in_flight: AtomicBool::new(false),
            mounted: AtomicBool::new(false),
            pulled_once: AtomicBool::new(false),
            phase,
            counters: Counters::default(),
            push_gate: Mutex::new(DeltaGate::new(1)),
        }
    }

    /// The progress store the engine replays through.
    pub fn store(&self) -> &ProgressStore<R> {
        &self.store
    }

    /// The engine context.
    pub fn context(&self) -> &Arc<EngineContext> {
        self.store.context()
    }

    /// Sync settings.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Current phase.
    pub fn phase(&self) -> SyncPhase {
        *self.phase.borrow()
    }

    /// Observe phase changes.
    pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> SyncStats {
        self.counters.snapshot()
    }

    /// Whether the host reports connectivity.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Record connectivity. Returns the previous value.
    pub fn set_online(&self, online: bool) -> bool {
        self.online.swap(online, Ordering::SeqCst)
    }

    /// Whether a cycle is running.
    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn set_phase(&self, phase: SyncPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(?previous, ?phase, "sync phase");
        }
    }

    fn skip(&self, e: SyncError) -> SyncResult {
        self.counters.skipped.fetch_add(1, Ordering::SeqCst);
        match e {
            SyncError::NotAuthenticated => info!("sync skipped: not authenticated"),
            ref e => debug!(reason = %e, "sync skipped"),
        }
        e.to_result()
    }

    // === Session ===

    /// Authenticate `user`. A different user gets a fresh startup pull; if
    /// the host already mounted, that pull runs now and its result is
    /// returned.
    pub async fn sign_in(&self, user: UserId) -> Option<SyncResult> {
        let previous = self.context().current_user().await;
        self.context().sign_in(user.clone()).await;
        if previous.as_ref() != Some(&user) {
            self.pulled_once.store(false, Ordering::SeqCst);
        }
        if self.mounted.load(Ordering::SeqCst) && !self.pulled_once.load(Ordering::SeqCst) {
            return Some(self.startup_pull().await);
        }
        None
    }

    /// Sign out. Nothing is pushed for a signed-out session.
    pub async fn sign_out(&self) {
        self.context().sign_out().await;
    }

    // === Triggers ===

    /// Application start: remember that the host mounted and run the
    /// startup pull. Without a user the pull waits for [`Self::sign_in`].
    pub async fn mount(&self) -> SyncResult {
        self.mounted.store(true, Ordering::SeqCst);
        self.startup_pull().await
    }

    /// Fetch the latest remote snapshot and hydrate local state. Runs once
    /// per signed-in user, regardless of connectivity. Only an attempt that
    /// reached the store counts; a failed pull leaves local state as it was
    /// and may be retried.
    pub async fn startup_pull(&self) -> SyncResult {
        if self.pulled_once.load(Ordering::SeqCst) {
            debug!("startup pull already ran");
            return SyncResult::skipped(true, Some("already pulled"));
        }
        let Some(user) = self.context().current_user().await else {
            return self.skip(SyncError::NotAuthenticated);
        };
        let Some(_flight) = InFlight::acquire(&self.in_flight) else {
            return self.skip(SyncError::InProgress);
        };
        if self.pulled_once.swap(true, Ordering::SeqCst) {
            return SyncResult::skipped(true, Some("already pulled"));
        }

        info!(user = %user, "startup pull");
        self.set_phase(SyncPhase::Pulling);
        match self.pull(&user, None).await {
            Ok(pulled) => {
                self.set_phase(SyncPhase::Reconciled);
                let cursor = self.context().cursor().await;
                SyncResult {
                    success: true,
                    pulled,
                    last_sync_time: cursor.last_sync_time,
                    ..Default::default()
                }
            }
            Err(e) => {
                warn!(user = %user, error = %e, "startup pull failed, keeping local state");
                self.pulled_once.store(false, Ordering::SeqCst);
                self.set_phase(SyncPhase::Idle);
                e.to_result()
            }
        }
    }

    /// Pull then push, unless there is nothing to do.
    ///
    /// Decision order: offline (not forced) skips; no user skips; nothing
    /// pending (not forced) succeeds without remote calls; otherwise a full
    /// cycle runs and the cursor is cleared.
    pub async fn smart_sync(&self, options: SyncOptions) -> SyncResult {
        if !self.is_online() && !options.force {
            return self.skip(SyncError::Offline);
        }
        let Some(user) = self.context().current_user().await else {
            return self.skip(SyncError::NotAuthenticated);
        };
        let cursor = self.context().cursor().await;
        if !cursor.pending_local_change && !options.force {
            self.counters.skipped.fetch_add(1, Ordering::SeqCst);
            debug!(user = %user, "nothing pending, sync skipped");
            return SyncResult::skipped(true, None);
        }
        let Some(_flight) = InFlight::acquire(&self.in_flight) else {
            return self.skip(SyncError::InProgress);
        };

        self.counters.cycles.fetch_add(1, Ordering::SeqCst);
        if options.force {
            self.counters.forced.fetch_add(1, Ordering::SeqCst);
        }
        info!(user = %user, force = options.force, "sync cycle");

        self.set_phase(SyncPhase::Pulling);
        let since = options.last_sync_time.or(cursor.last_sync_time);
        let pulled = match self.pull(&user, since).await {
            Ok(pulled) => pulled,
            Err(e) => {
                error!(user = %user, error = %e, "sync pull failed");
                self.set_phase(SyncPhase::Idle);
                return e.to_result();
            }
        };

        self.set_phase(SyncPhase::Pushing);
        let pushed = self.push(&user).await;
        self.set_phase(SyncPhase::Idle);

        match pushed {
            Ok(pushed) => {
                let (now, queued) = self.finish(&user).await;
                info!(user = %user, pulled, pushed, queued, "sync cycle complete");
                self.finished(&user, pulled, pushed, now, queued)
            }
            Err(e) => {
                error!(user = %user, error = %e, "sync push failed");
                e.to_result()
            }
        }
    }

    /// Best-effort push on teardown, bounded by the exit timeout. Never
    /// fails; there is no retry after teardown.
    pub async fn exit_push(&self) -> SyncResult {
        let Some(user) = self.context().current_user().await else {
            return self.skip(SyncError::NotAuthenticated);
        };
        if !self.context().cursor().await.pending_local_change {
            return SyncResult::skipped(true, None);
        }
        if !self.is_online() {
            return self.skip(SyncError::Offline);
        }
        let Some(_flight) = InFlight::acquire(&self.in_flight) else {
            return self.skip(SyncError::InProgress);
        };

        self.set_phase(SyncPhase::Pushing);
        let timeout = self.settings.exit_push_timeout();
        let outcome = tokio::time::timeout(timeout, self.push(&user)).await;
        self.set_phase(SyncPhase::Idle);

        match outcome {
            Ok(Ok(pushed)) => {
                let (now, queued) = self.finish(&user).await;
                info!(user = %user, pushed, queued, "exit push complete");
                self.finished(&user, 0, pushed, now, queued)
            }
            Ok(Err(e)) => {
                warn!(user = %user, error = %e, "exit push failed");
                e.to_result()
            }
            Err(_) => {
                warn!(user = %user, ?timeout, "exit push timed out");
                SyncResult::failed("exit push timed out")
            }
        }
    }

    // === Cycle steps ===

    /// Fetch every record of `user` and merge it into the replica. Returns
    /// how many records are new or changed since `since`.
    async fn pull(&self, user: &UserId, since: Option<Time>) -> Result<usize, SyncError> {
        let ctx = self.context();
        let modules: Vec<ModuleId> = ctx.curriculum().module_ids().collect();
        {
            let mut state = ctx.state().await;
            for module in &modules {
                state.cache.begin_loading(*module);
            }
        }

        let fetched = async {
            let module_records = self.store.remote().list_modules(user).await?;
            let level_records = self.store.remote().list_levels(user, None).await?;
            Ok::<_, SyncError>((module_records, level_records))
        }
        .await;

        let mut state = ctx.state().await;
        for module in &modules {
            state.cache.finish_loading(*module);
        }
        let (module_records, level_records) = fetched?;

        if !state.owns(user) {
            debug!(user = %user, "user changed during pull, discarding snapshot");
            return Ok(0);
        }

        let is_new = |updated_at: Time| since.map(|t| updated_at > t).unwrap_or(true);
        let mut touched = BTreeSet::new();
        for record in module_records.iter().filter(|r| is_new(r.updated_at)) {
            touched.insert(record.module_id);
        }
        for record in level_records.iter().filter(|r| is_new(r.updated_at)) {
            touched.insert(record.module_id);
        }
        let pulled = module_records.iter().filter(|r| is_new(r.updated_at)).count()
            + level_records.iter().filter(|r| is_new(r.updated_at)).count();

        state.replica.load_modules(&module_records);
        for module in &modules {
            state.replica.load_module_levels(*module, &level_records);
        }
        for module in &touched {
            state.cache.evict_module(*module);
        }

        debug!(user = %user, pulled, touched = touched.len(), "snapshot applied");
        Ok(pulled)
    }

    /// Replay the outbox through the progress store. Skipped when the
    /// current generation was already pushed and nothing is queued.
    async fn push(&self, user: &UserId) -> Result<usize, SyncError> {
        let (generation, queued) = {
            let state = self.context().state().await;
            (state.cursor.generation, state.outbox.len_for(user))
        };
        let open = queued > 0
            || self
                .push_gate
                .lock()
                .map(|gate| gate.should_write(&generation))
                .unwrap_or(true);
        if !open {
            debug!(user = %user, generation, "generation already pushed");
            return Ok(0);
        }

        let changes = self.context().state().await.outbox.drain_user(user);
        let mut pushed = 0;
        let mut first_error = None;
        for change in changes {
            let outcome = match change {
                PendingChange::StartLevel(key) => {
                    self.store.start_level(user, key.module, key.level).await.map(|_| ())
                }
                PendingChange::CompleteLevel(key) => {
                    self.store.complete_level(user, key.module, key.level).await.map(|_| ())
                }
                PendingChange::StartModule(module) => {
                    self.store.start_module(user, module).await.map(|_| ())
                }
                PendingChange::RecheckModule(module) => match self.store.recheck_module(user, module).await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        // recheck is not re-queued by the store itself
                        self.context().state().await.defer(user, change);
                        Err(e)
                    }
                },
            };
            match outcome {
                Ok(()) => pushed += 1,
                Err(e) => {
                    warn!(user = %user, ?change, error = %e, "replay failed, left queued");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.counters.pushed.fetch_add(pushed, Ordering::SeqCst);

        match first_error {
            Some(e) => Err(SyncError::Push(e)),
            None => Ok(pushed),
        }
    }

    /// Clear the cursor and close the push gate for the current generation,
    /// but only once nothing is left queued. Returns the sync time and how
    /// many changes are still queued.
    async fn finish(&self, user: &UserId) -> (Time, usize) {
        let now = Utc::now();
        let mut state = self.context().state().await;
        let generation = state.cursor.generation;
        let queued = state.outbox.len_for(user);
        if queued == 0 {
            state.cursor.synced(generation, now);
            if let Ok(mut gate) = self.push_gate.lock() {
                gate.record(generation);
            }
        } else {
            state.cursor.last_sync_time = Some(now);
        }
        (now, queued)
    }

    fn finished(&self, user: &UserId, pulled: usize, pushed: usize, now: Time, queued: usize) -> SyncResult {
        if queued == 0 {
            return SyncResult::completed(pulled, pushed, now);
        }
        warn!(user = %user, queued, "changes still queued after sync");
        SyncResult {
            success: false,
            error: Some(format!("{} changes still queued", queued)),
            ..SyncResult::completed(pulled, pushed, now)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use waypoint_core::{
        Curriculum, LevelId, LevelProgressRecord, ModuleProgressRecord, RecordFamily, ScreenId,
        TimerSnapshot,
    };
    use waypoint_storage::{MemoryStore, StorageError};

    /// Memory store that can reject module writes and hold the pull open.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        fail_modules: AtomicBool,
        hold_pull: AtomicBool,
        release: Notify,
    }

    #[async_trait]
    impl RemoteStore for FlakyStore {
        async fn upsert_level(&self, record: &LevelProgressRecord) -> waypoint_storage::Result<()> {
            self.inner.upsert_level(record).await
        }

        async fn load_level(
            &self,
            user: &UserId,
            module: ModuleId,
            level: LevelId,
        ) -> waypoint_storage::Result<Option<LevelProgressRecord>> {
            self.inner.load_level(user, module, level).await
        }

        async fn list_levels(
            &self,
            user: &UserId,
            module: Option<ModuleId>,
        ) -> waypoint_storage::Result<Vec<LevelProgressRecord>> {
            self.inner.list_levels(user, module).await
        }

        async fn upsert_module(&self, record: &ModuleProgressRecord) -> waypoint_storage::Result<()> {
            if self.fail_modules.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("module table down".into()));
            }
            self.inner.upsert_module(record).await
        }

        async fn load_module(
            &self,
            user: &UserId,
            module: ModuleId,
        ) -> waypoint_storage::Result<Option<ModuleProgressRecord>> {
            self.inner.load_module(user, module).await
        }

        async fn list_modules(&self, user: &UserId) -> waypoint_storage::Result<Vec<ModuleProgressRecord>> {
            if self.hold_pull.load(Ordering::SeqCst) {
                self.release.notified().await;
            }
            self.inner.list_modules(user).await
        }

        async fn save_timer(&self, snapshot: &TimerSnapshot) -> waypoint_storage::Result<()> {
            self.inner.save_timer(snapshot).await
        }

        async fn load_timer(
            &self,
            user: &UserId,
            screen: &ScreenId,
        ) -> waypoint_storage::Result<Option<TimerSnapshot>> {
            self.inner.load_timer(user, screen).await
        }

        async fn delete_user(&self, user: &UserId) -> waypoint_storage::Result<usize> {
            self.inner.delete_user(user).await
        }
    }

    fn engine_over<R: RemoteStore>(remote: Arc<R>, curriculum: Curriculum) -> SyncEngine<R> {
        let ctx = Arc::new(EngineContext::new(curriculum));
        SyncEngine::new(ProgressStore::new(remote, ctx), SyncSettings::default())
    }

    async fn setup() -> (SyncEngine<MemoryStore>, Arc<MemoryStore>, UserId) {
        let remote = Arc::new(MemoryStore::new());
        let ctx = Arc::new(EngineContext::new(Curriculum::default()));
        let store = ProgressStore::new(remote.clone(), ctx);
        let engine = SyncEngine::new(store, SyncSettings::default());
        let user = UserId::new("learner-1");
        engine.sign_in(user.clone()).await;
        (engine, remote, user)
    }

    #[tokio::test]
    async fn test_unauthenticated_sync_is_skipped() {
        let (engine, remote, _user) = setup().await;
        engine.sign_out().await;

        let result = engine.smart_sync(SyncOptions::forced()).await;
        assert!(result.skipped);
        assert!(!result.success);
        assert_eq!(result.reason.as_deref(), Some("not authenticated"));
        assert_eq!(remote.writes(), 0);
    }

    #[tokio::test]
    async fn test_nothing_pending_performs_no_writes() {
        let (engine, remote, _user) = setup().await;
        let result = engine.smart_sync(SyncOptions::default()).await;
        assert!(result.success);
        assert!(result.skipped);
        assert_eq!(remote.writes(), 0);
        assert_eq!(engine.stats().cycles, 0);
    }

    #[tokio::test]
    async fn test_offline_not_forced_is_skipped() {
        let (engine, _remote, _user) = setup().await;
        engine.set_online(false);
        let result = engine.smart_sync(SyncOptions::default()).await;
        assert_eq!(result.reason.as_deref(), Some("offline"));
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_forced_sync_without_changes_writes_nothing() {
        let (engine, remote, _user) = setup().await;
        let result = engine.smart_sync(SyncOptions::forced()).await;
        assert!(result.success);
        assert!(!result.skipped);
        assert_eq!(result.pushed, 0);
        assert_eq!(remote.writes(), 0);
    }

    #[tokio::test]
    async fn test_startup_pull_hydrates_once() {
        let (engine, remote, user) = setup().await;
        let mut record = LevelProgressRecord::started(user.clone(), ModuleId(1), LevelId(1), Utc::now());
        record.is_completed = true;
        remote.upsert_level(&record).await.unwrap();

        let ctx = engine.context().clone();
        assert!(!ctx.is_level_unlocked(ModuleId(1), LevelId(2)).await);
        let result = engine.startup_pull().await;
        assert!(result.success);
        assert_eq!(result.pulled, 1);
        assert_eq!(engine.phase(), SyncPhase::Reconciled);
        assert!(ctx.is_level_unlocked(ModuleId(1), LevelId(2)).await);
        assert!(!ctx.is_level_unlocked(ModuleId(1), LevelId(3)).await);

        let again = engine.startup_pull().await;
        assert!(again.skipped);
    }

    #[tokio::test]
    async fn test_startup_pull_offline_keeps_local_state() {
        let (engine, remote, _user) = setup().await;
        remote.set_online(false);
        let result = engine.startup_pull().await;
        assert!(!result.success);
        assert_eq!(engine.phase(), SyncPhase::Idle);
        assert!(!engine.context().is_level_unlocked(ModuleId(1), LevelId(2)).await);
    }

    #[tokio::test]
    async fn test_offline_then_online_issues_one_forced_sync() {
        let (engine, remote, user) = setup().await;
        engine.handle(crate::LifecycleEvent::Offline).await;
        remote.set_online(false);
        assert!(engine.store().complete_level(&user, ModuleId(1), LevelId(1)).await.is_err());

        remote.set_online(true);
        let result = engine.handle(crate::LifecycleEvent::Online).await;
        let result = result.unwrap();
        assert!(result.success);
        assert_eq!(result.pushed, 1);
        assert_eq!(engine.stats().forced, 1);

        assert!(engine.handle(crate::LifecycleEvent::Online).await.is_none());
        assert_eq!(engine.stats().forced, 1);

        let level = remote.load_level(&user, ModuleId(1), LevelId(1)).await.unwrap().unwrap();
        assert!(level.is_completed);
        let cursor = engine.context().cursor().await;
        assert!(!cursor.pending_local_change);
        assert!(engine.context().is_level_unlocked(ModuleId(1), LevelId(2)).await);
    }

    #[tokio::test]
    async fn test_pending_change_syncs_then_clears() {
        let (engine, _remote, user) = setup().await;
        engine.store().start_level(&user, ModuleId(2), LevelId(1)).await.unwrap();
        assert!(engine.context().cursor().await.dirty.contains(&RecordFamily::Level));

        let result = engine.smart_sync(SyncOptions::default()).await;
        assert!(result.success && !result.skipped);
        assert!(result.last_sync_time.is_some());

        let second = engine.smart_sync(SyncOptions::default()).await;
        assert!(second.skipped && second.success);
    }

    #[tokio::test]
    async fn test_exit_push_replays_outbox() {
        let (engine, remote, user) = setup().await;
        remote.set_online(false);
        let _ = engine.store().start_level(&user, ModuleId(3), LevelId(1)).await;
        remote.set_online(true);

        let result = engine.exit_push().await;
        assert!(result.success);
        assert_eq!(result.pushed, 1);
        assert!(remote.load_level(&user, ModuleId(3), LevelId(1)).await.unwrap().is_some());
        assert_eq!(engine.phase(), SyncPhase::Idle);
    }

    #[tokio::test]
    async fn test_failed_replay_stays_queued() {
        let (engine, remote, user) = setup().await;
        remote.set_online(false);
        let _ = engine.store().complete_level(&user, ModuleId(1), LevelId(1)).await;

        let result = engine.smart_sync(SyncOptions::forced()).await;
        assert!(!result.success);
        let state = engine.context().state().await;
        assert_eq!(state.outbox.len_for(&user), 1);
        assert!(state.cursor.pending_local_change);
    }

    #[tokio::test]
    async fn test_failed_module_write_is_replayed_next_sync() {
        let remote = Arc::new(FlakyStore::default());
        let engine = engine_over(remote.clone(), Curriculum::uniform(2, 1));
        let user = UserId::new("learner-1");
        engine.sign_in(user.clone()).await;

        remote.inner.set_online(false);
        assert!(engine.store().complete_level(&user, ModuleId(1), LevelId(1)).await.is_err());
        remote.inner.set_online(true);
        remote.fail_modules.store(true, Ordering::SeqCst);

        // The level lands, the module recheck fails and is queued again.
        let first = engine.smart_sync(SyncOptions::forced()).await;
        assert_eq!(first.pushed, 1);
        assert!(!first.success);
        assert_eq!(engine.context().state().await.outbox.len_for(&user), 1);
        assert!(engine.context().cursor().await.pending_local_change);

        remote.fail_modules.store(false, Ordering::SeqCst);
        let second = engine.smart_sync(SyncOptions::default()).await;
        assert!(second.success);
        assert_eq!(second.pushed, 1);

        let module = remote.load_module(&user, ModuleId(1)).await.unwrap().unwrap();
        assert!(module.is_completed);
        let next = remote.load_module(&user, ModuleId(2)).await.unwrap().unwrap();
        assert!(next.is_unlocked);

        let state = engine.context().state().await;
        assert_eq!(state.outbox.len_for(&user), 0);
        assert!(!state.cursor.pending_local_change);
        drop(state);
        assert!(engine.context().is_module_unlocked(ModuleId(2)).await);
    }

    #[tokio::test]
    async fn test_mount_before_sign_in_pulls_on_sign_in() {
        let remote = Arc::new(MemoryStore::new());
        let user = UserId::new("learner-1");
        let record = LevelProgressRecord::started(user.clone(), ModuleId(1), LevelId(1), Utc::now())
            .completed(Utc::now());
        remote.upsert_level(&record).await.unwrap();
        let engine = engine_over(remote.clone(), Curriculum::default());

        let mounted = engine.handle(crate::LifecycleEvent::Mount).await.unwrap();
        assert_eq!(mounted.reason.as_deref(), Some("not authenticated"));

        let pulled = engine.sign_in(user.clone()).await.unwrap();
        assert!(pulled.success);
        assert_eq!(pulled.pulled, 1);
        assert!(engine.context().is_level_unlocked(ModuleId(1), LevelId(2)).await);
        assert!(engine.startup_pull().await.skipped);

        // Same user again: nothing to redo.
        assert!(engine.sign_in(user).await.is_none());

        let other = engine.sign_in(UserId::new("learner-2")).await.unwrap();
        assert!(other.success);
        assert_eq!(other.pulled, 0);
        assert!(!engine.context().is_level_unlocked(ModuleId(1), LevelId(2)).await);
    }

    #[tokio::test]
    async fn test_overlapping_sync_is_dropped() {
        let remote = Arc::new(FlakyStore::default());
        let engine = Arc::new(engine_over(remote.clone(), Curriculum::default()));
        engine.sign_in(UserId::new("learner-1")).await;
        remote.hold_pull.store(true, Ordering::SeqCst);

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.smart_sync(SyncOptions::forced()).await })
        };
        while !engine.is_syncing() {
            tokio::task::yield_now().await;
        }

        let second = engine.smart_sync(SyncOptions::forced()).await;
        assert!(second.skipped);
        assert!(!second.success);
        assert_eq!(second.reason.as_deref(), Some("sync in progress"));

        remote.release.notify_one();
        let first = first.await.unwrap();
        assert!(first.success);
        assert_eq!(engine.stats().cycles, 1);
        assert!(!engine.is_syncing());
    }

    #[test]
    fn test_in_flight_guard_drops_second_trigger() {
        let flag = AtomicBool::new(false);
        let first = InFlight::acquire(&flag);
        assert!(first.is_some());
        assert!(InFlight::acquire(&flag).is_none());
        drop(first);
        assert!(InFlight::acquire(&flag).is_some());
    }
}
