use std::sync::Mutex;

use time::{Duration, OffsetDateTime};

/// Source of the current UTC time.
///
/// Every time-dependent component takes a clock at construction so that
/// day rollovers and cache ageing can be driven deterministically in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Manually driven clock.
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

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("manual clock lock should not be poisoned");
        *now += by;
    }

    pub fn set(&self, to: OffsetDateTime) {
        *self.now.lock().expect("manual clock lock should not be poisoned") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        *self.now.lock().expect("manual clock lock should not be poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::new(datetime!(2025-07-22 09:30 UTC));
        assert_eq!(clock.now(), datetime!(2025-07-22 09:30 UTC));

        clock.advance(Duration::minutes(35));
        assert_eq!(clock.now(), datetime!(2025-07-22 10:05 UTC));

        clock.set(datetime!(2025-07-23 00:00 UTC));
        assert_eq!(clock.now(), datetime!(2025-07-23 00:00 UTC));
    }
}
