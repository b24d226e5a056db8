//! Host lifecycle integration.
//!
//! Maps application events to sync triggers and runs the periodic sync.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};
use waypoint_core::SyncResult;
use waypoint_storage::RemoteStore;

use crate::engine::{SyncEngine, SyncOptions};

/// Events the host application reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Application initialized
    Mount,
    /// Connectivity came back
    Online,
    /// Connectivity lost
    Offline,
    /// Page or window about to close
    BeforeUnload,
    /// Application torn down
    Unmount,
}

impl<R: RemoteStore> SyncEngine<R> {
    /// React to a lifecycle event. Returns the result of the triggered sync,
    /// or `None` when the event triggers nothing.
    pub async fn handle(&self, event: LifecycleEvent) -> Option<SyncResult> {
        debug!(?event, "lifecycle event");
        match event {
            LifecycleEvent::Mount => Some(self.mount().await),
            LifecycleEvent::Online => {
                if self.set_online(true) {
                    return None;
                }
                info!("back online, forcing sync");
                Some(self.smart_sync(SyncOptions::forced()).await)
            }
            LifecycleEvent::Offline => {
                if self.set_online(false) {
                    info!("went offline");
                }
                None
            }
            LifecycleEvent::BeforeUnload | LifecycleEvent::Unmount => Some(self.exit_push().await),
        }
    }
}

impl<R: RemoteStore + 'static> SyncEngine<R> {
    /// Run `smart_sync` every periodic interval while online. The task stops
    /// when the returned handle is dropped.
    pub fn spawn_periodic(self: &Arc<Self>) -> PeriodicSync {
        let period = self.settings().periodic_interval();
        let engine = Arc::clone(self);
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !engine.is_online() {
                    continue;
                }
                let result = engine.smart_sync(SyncOptions::default()).await;
                debug!(?result, "periodic sync");
            }
        });
        info!(?period, "periodic sync started");
        PeriodicSync { task }
    }
}

/// Handle to the periodic sync task. Aborts the task on drop.
#[derive(Debug)]
pub struct PeriodicSync {
    task: JoinHandle<()>,
}

impl PeriodicSync {
    /// Stop the task now.
    pub fn stop(self) {
        self.task.abort();
    }

    /// Whether the task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PeriodicSync {
    fn drop(&mut self) {
        self.task.abort();
    }
}
