//! Countdown state machine.

use serde::{Deserialize, Serialize};
use waypoint_core::{DeltaGate, TimerSettings};

/// Countdown state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CountdownState {
    /// Not ticking; time is left
    Stopped,
    /// Ticking
    Running,
    /// Reached zero
    Expired,
}

/// What one tick produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// Seconds left after the tick
    pub remaining: u32,

    /// Value to autosave, when the autosave gate opened on this tick
    pub autosave: Option<u32>,

    /// The countdown reached zero on this tick
    pub expired: bool,
}

/// Remaining seconds plus the autosave policy.
///
/// The gate tracks the last value known to be stored. A countdown started
/// from its initial duration treats that duration as stored, since a reload
/// without any save starts from it again.
#[derive(Debug, Clone)]
pub struct Countdown {
    remaining: u32,
    state: CountdownState,
    gate: DeltaGate<u32>,
    check_every: u32,
    since_check: u32,
}

impl Countdown {
    /// Stopped countdown at `remaining` seconds.
    pub fn new(remaining: u32, settings: &TimerSettings) -> Self {
        Self {
            remaining,
            state: if remaining == 0 {
                CountdownState::Expired
            } else {
                CountdownState::Stopped
            },
            gate: DeltaGate::seeded(remaining, u64::from(settings.autosave_threshold_secs)),
            check_every: settings.autosave_check_secs.max(1),
            since_check: 0,
        }
    }

    /// Seconds left.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    /// Current state.
    pub fn state(&self) -> CountdownState {
        self.state
    }

    /// Whether the countdown is ticking.
    pub fn is_running(&self) -> bool {
        self.state == CountdownState::Running
    }

    /// Last value known to be stored.
    pub fn last_saved(&self) -> Option<u32> {
        self.gate.last().copied()
    }

    /// Start ticking. Returns whether the state changed.
    pub fn start(&mut self) -> bool {
        if self.state != CountdownState::Stopped {
            return false;
        }
        self.state = CountdownState::Running;
        true
    }

    /// Stop ticking. Returns whether the state changed.
    pub fn stop(&mut self) -> bool {
        if self.state != CountdownState::Running {
            return false;
        }
        self.state = CountdownState::Stopped;
        true
    }

    /// Advance one second.
    pub fn tick(&mut self) -> TickOutcome {
        if self.state != CountdownState::Running {
            return TickOutcome {
                remaining: self.remaining,
                autosave: None,
                expired: false,
            };
        }

        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            self.state = CountdownState::Expired;
            return TickOutcome {
                remaining: 0,
                autosave: None,
                expired: true,
            };
        }

        self.since_check += 1;
        let mut autosave = None;
        if self.since_check >= self.check_every {
            self.since_check = 0;
            autosave = self.gate.offer(&self.remaining);
        }
        TickOutcome {
            remaining: self.remaining,
            autosave,
            expired: false,
        }
    }

    /// Record that `value` reached the store.
    pub fn saved(&mut self, value: u32) {
        self.gate.record(value);
    }

    /// Value a final flush should write, if it differs from what is stored.
    pub fn pending_flush(&self) -> Option<u32> {
        self.gate.differs(&self.remaining).then_some(self.remaining)
    }
}
