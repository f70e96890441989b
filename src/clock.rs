//! Wall-clock abstraction.
//!
//! Window buckets and in-memory expiry are computed from a [`Clock`] so tests
//! can drive time explicitly instead of sleeping.

use std::sync::Mutex;
use std::time::Duration;

use time::OffsetDateTime;

use crate::lock::mutex_lock;

const SOURCE: &str = "clock";

pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;

    /// Whole seconds since the Unix epoch, clamped at zero.
    fn unix_seconds(&self) -> u64 {
        self.now().unix_timestamp().max(0) as u64
    }
}

/// Reads the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<OffsetDateTime>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at `seconds` after the Unix epoch.
    pub fn at_unix(seconds: i64) -> Self {
        Self::new(OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds))
    }

    pub fn advance(&self, by: Duration) {
        let mut now = mutex_lock(&self.now, SOURCE, "advance");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *mutex_lock(&self.now, SOURCE, "now")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::at_unix(1_700_000_000);
        assert_eq!(clock.unix_seconds(), 1_700_000_000);
        assert_eq!(clock.unix_seconds(), 1_700_000_000);

        clock.advance(Duration::from_secs(11));
        assert_eq!(clock.unix_seconds(), 1_700_000_011);
    }

    #[test]
    fn pre_epoch_clamps_to_zero() {
        let clock = ManualClock::at_unix(-5);
        assert_eq!(clock.unix_seconds(), 0);
    }

    #[test]
    fn system_clock_is_after_epoch() {
        assert!(SystemClock.unix_seconds() > 0);
    }
}
