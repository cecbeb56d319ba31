// SPDX-License-Identifier: GPL-3.0-only

//! Injected wall-clock abstraction
//!
//! All auto-cut and sequence timing compares against "now" from a [`Clock`]
//! rather than reading the system clock directly, so the whole timing surface
//! is deterministic under test.

use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Wall-clock capability passed to timing-sensitive components at construction
pub trait Clock: Send + Sync {
    /// Current wall-clock time, UTC
    fn now_utc(&self) -> DateTime<Utc>;
}

/// System clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and offline simulation
///
/// Starts at the given instant and only moves when `advance` or `set` is
/// called.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward by `millis` milliseconds
    pub fn advance_millis(&self, millis: i64) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::milliseconds(millis);
    }

    /// Jump the clock to an absolute instant
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap() = instant;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now_utc(), start);

        clock.advance_millis(1500);
        assert_eq!(clock.now_utc(), start + chrono::Duration::milliseconds(1500));
    }

    #[test]
    fn test_system_clock_is_monotonic_enough() {
        let clock = SystemClock;
        let a = clock.now_utc();
        let b = clock.now_utc();
        assert!(b >= a);
    }
}
