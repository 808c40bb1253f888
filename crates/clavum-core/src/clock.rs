//! Injectable time source.
//!
//! Signature freshness windows and approval deadlines are all measured
//! against a [`Clock`] handed to each component at construction, never
//! against ambient system time. [`ManualClock`] exists for deterministic
//! tests; production uses [`SystemClock`].

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// A source of the current time.
pub trait Clock: Send + Sync + 'static {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current instant as milliseconds since the Unix epoch.
    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually-advanced clock for tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Advance the clock by `ms` milliseconds.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test-only type).
    pub fn advance_ms(&self, ms: i64) {
        let mut now = self.now.lock().expect("clock lock poisoned");
        *now += Duration::milliseconds(ms);
    }

    /// Set the clock to an absolute instant.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned (test-only type).
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().expect("clock lock poisoned") = instant;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(Utc::now());
        let before = clock.now_ms();
        clock.advance_ms(1500);
        assert_eq!(clock.now_ms(), before + 1500);
    }

    #[test]
    fn manual_clock_is_frozen_between_advances() {
        let clock = ManualClock::new(Utc::now());
        assert_eq!(clock.now(), clock.now());
    }
}
