use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

/// Source of "now", so schedules can run against an injected clock in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock backed by system time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for deterministic tests — time moves only when told to.
///
/// Uses `std::sync::RwLock` (not tokio's) so reads work from both sync and
/// async contexts without panicking.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    /// A clock pinned to the given instant.
    pub fn pinned(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(now)),
        }
    }

    /// Move the clock to a specific instant.
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.write().unwrap() = now;
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.write().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.read().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_reads_back_its_pin() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::pinned(t);
        assert_eq!(clock.now(), t);
    }

    #[test]
    fn manual_clock_set_replaces_now() {
        let t1 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap();
        let clock = ManualClock::pinned(t1);
        clock.set(t2);
        assert_eq!(clock.now(), t2);
    }

    #[test]
    fn manual_clock_advance_adds() {
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::pinned(t);
        clock.advance(chrono::Duration::minutes(90));
        assert_eq!(
            clock.now(),
            Utc.with_ymd_and_hms(2025, 1, 1, 1, 30, 0).unwrap()
        );
    }

    #[test]
    fn system_clock_tracks_real_time() {
        let clock = SystemClock;
        let diff = (Utc::now() - clock.now()).num_seconds().abs();
        assert!(diff < 2, "SystemClock should be within a couple of seconds");
    }
}
