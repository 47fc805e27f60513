//! Clock abstraction for snapshot naming.
//!
//! Snapshot names are derived from UTC wall-clock time, which never repeats
//! across a DST change, so name order stays time order. The [`Clock`] trait
//! lets tests drive naming deterministically.

use chrono::{Duration, NaiveDateTime, Utc};
use parking_lot::Mutex;

/// Source of the current time used for snapshot names.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> NaiveDateTime;
}

/// Real clock, in UTC.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().naive_utc()
    }
}

/// Clock frozen at a fixed instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    at: NaiveDateTime,
}

impl FixedClock {
    /// Create a clock that always returns `at`.
    pub fn new(at: NaiveDateTime) -> Self {
        Self { at }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.at
    }
}

/// Clock that advances by a fixed step on every call.
///
/// Useful for running several cycles back to back without sleeping between them.
#[derive(Debug)]
pub struct SteppingClock {
    next: Mutex<NaiveDateTime>,
    step: Duration,
}

impl SteppingClock {
    /// Create a clock starting at `start` and advancing by `step` per call.
    pub fn new(start: NaiveDateTime, step: Duration) -> Self {
        Self {
            next: Mutex::new(start),
            step,
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> NaiveDateTime {
        let mut next = self.next.lock();
        let current = *next;
        *next = current + self.step;
        current
    }
}
