//! Countdown driver with remote persistence.
//!
//! One interval task per active countdown. Changing the activation state
//! aborts the running task before a new one is spawned, so a countdown never
//! has two intervals. Autosaves go through the countdown's delta gate; the
//! final flush on teardown ignores the threshold and only checks that the
//! value changed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};
use waypoint_core::{ScreenId, TimerSettings, TimerSnapshot, UserId};
use waypoint_storage::RemoteStore;

use crate::countdown::{Countdown, CountdownState};

type TickCallback = Arc<dyn Fn(u32) + Send + Sync>;
type ExpireCallback = Arc<dyn Fn() + Send + Sync>;

struct Shared<R> {
    remote: Arc<R>,
    user: UserId,
    screen: ScreenId,
    settings: TimerSettings,
    countdown: Mutex<Countdown>,
    remaining: watch::Sender<u32>,
    on_tick: Option<TickCallback>,
    on_expire: Option<ExpireCallback>,
    expired_fired: AtomicBool,
}

impl<R: RemoteStore> Shared<R> {
    fn countdown(&self) -> MutexGuard<'_, Countdown> {
        self.countdown.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Write `value` and record it in the gate. Best effort.
    async fn save(&self, value: u32) -> bool {
        let snapshot = TimerSnapshot::now(self.user.clone(), self.screen.clone(), value);
        match self.remote.save_timer(&snapshot).await {
            Ok(()) => {
                self.countdown().saved(value);
                debug!(user = %self.user, screen = %self.screen.as_str(), value, "countdown saved");
                true
            }
            Err(e) => {
                warn!(user = %self.user, screen = %self.screen.as_str(), value, error = %e, "countdown save failed");
                false
            }
        }
    }

    async fn flush(&self) -> bool {
        let pending = self.countdown().pending_flush();
        match pending {
            Some(value) => self.save(value).await,
            None => false,
        }
    }

    async fn run(self: Arc<Self>) {
        let period = self.settings.tick();
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            ticker.tick().await;
            let outcome = self.countdown().tick();
            self.remaining.send_replace(outcome.remaining);
            if let Some(on_tick) = &self.on_tick {
                on_tick(outcome.remaining);
            }

            if outcome.expired {
                if !self.expired_fired.swap(true, Ordering::SeqCst) {
                    info!(user = %self.user, screen = %self.screen.as_str(), "countdown expired");
                    if let Some(on_expire) = &self.on_expire {
                        on_expire();
                    }
                }
                self.save(0).await;
                break;
            }
            if let Some(value) = outcome.autosave {
                self.save(value).await;
            }
        }
    }
}

/// A countdown that survives reloads.
pub struct TimerPersistence<R: RemoteStore + 'static> {
    shared: Arc<Shared<R>>,
    task: Option<JoinHandle<()>>,
    torn_down: bool,
}

impl<R: RemoteStore + 'static> TimerPersistence<R> {
    /// Load the saved countdown for `(user, screen)`. Resumes from a saved
    /// value when it is above zero; otherwise starts from `initial_seconds`.
    /// The countdown starts stopped.
    pub async fn mount(
        remote: Arc<R>,
        user: UserId,
        screen: ScreenId,
        initial_seconds: u32,
        settings: TimerSettings,
    ) -> Self {
        let remaining = match remote.load_timer(&user, &screen).await {
            Ok(Some(snapshot)) if snapshot.is_resumable() => {
                info!(user = %user, screen = %screen.as_str(), remaining = snapshot.remaining_seconds, "resuming countdown");
                snapshot.remaining_seconds
            }
            Ok(_) => initial_seconds,
            Err(e) => {
                warn!(user = %user, screen = %screen.as_str(), error = %e, "could not load countdown, starting fresh");
                initial_seconds
            }
        };

        let (tx, _) = watch::channel(remaining);
        let countdown = Countdown::new(remaining, &settings);
        Self {
            shared: Arc::new(Shared {
                remote,
                user,
                screen,
                settings,
                countdown: Mutex::new(countdown),
                remaining: tx,
                on_tick: None,
                on_expire: None,
                expired_fired: AtomicBool::new(false),
            }),
            task: None,
            torn_down: false,
        }
    }

    fn shared_mut(&mut self) -> Option<&mut Shared<R>> {
        if self.task.is_some() {
            return None;
        }
        Arc::get_mut(&mut self.shared)
    }

    /// Call `f` with the remaining seconds after every tick. Only takes
    /// effect before the countdown is first started.
    pub fn on_tick(mut self, f: impl Fn(u32) + Send + Sync + 'static) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.on_tick = Some(Arc::new(f));
        }
        self
    }

    /// Call `f` once when the countdown reaches zero. Only takes effect
    /// before the countdown is first started.
    pub fn on_expire(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        if let Some(shared) = self.shared_mut() {
            shared.on_expire = Some(Arc::new(f));
        }
        self
    }

    /// Seconds left.
    pub fn remaining(&self) -> u32 {
        self.shared.countdown().remaining()
    }

    /// Countdown state.
    pub fn state(&self) -> CountdownState {
        self.shared.countdown().state()
    }

    /// Observe the remaining seconds.
    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.shared.remaining.subscribe()
    }

    /// Start or stop ticking. The previous interval task is always aborted
    /// first.
    pub fn set_active(&mut self, active: bool) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if active {
            self.shared.countdown().start();
            if self.shared.countdown().is_running() {
                self.task = Some(tokio::spawn(Arc::clone(&self.shared).run()));
            }
        } else {
            self.shared.countdown().stop();
        }
    }

    /// Start ticking.
    pub fn start(&mut self) {
        self.set_active(true);
    }

    /// Stop ticking.
    pub fn pause(&mut self) {
        self.set_active(false);
    }

    /// Stop ticking and write the current value if it changed since the last
    /// save. Returns whether a write happened.
    pub async fn teardown(mut self) -> bool {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.torn_down = true;
        self.shared.countdown().stop();
        self.shared.flush().await
    }
}

impl<R: RemoteStore + 'static> Drop for TimerPersistence<R> {
    fn drop(&mut self) {
        if self.torn_down {
            return;
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.shared.countdown().pending_flush().is_none() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let shared = Arc::clone(&self.shared);
                handle.spawn(async move {
                    shared.flush().await;
                });
            }
            Err(_) => warn!(screen = %self.shared.screen.as_str(), "countdown dropped outside a runtime, final save skipped"),
        }
    }
}
