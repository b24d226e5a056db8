//! Persisted countdowns.
//!
//! A [`Countdown`] is the pure state machine; [`TimerPersistence`] drives it
//! once per tick and saves it to the remote store often enough that a reload
//! loses at most one autosave window of time.

#![warn(missing_docs)]

pub mod countdown;
pub mod persistence;

pub use countdown::{Countdown, CountdownState, TickOutcome};
pub use persistence::TimerPersistence;
