use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime, UtcOffset};
use tracing::debug;

use crate::clock::Clock;

const MINUTE: time::Duration = time::Duration::minutes(1);

/// Provider call ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub per_minute: u32,
    pub per_day: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        // free-tier market data plan
        Self {
            per_minute: 5,
            per_day: 500,
        }
    }
}

/// Gatekeeper for every external provider call.
///
/// Tracks a rolling 60 second window and a calendar-day counter that resets
/// at UTC midnight. A denied request leaves the counters untouched.
pub struct RateBudget {
    limits: RateLimits,
    clock: Arc<dyn Clock>,
    state: Mutex<BudgetState>,
}

#[derive(Debug)]
struct BudgetState {
    minute: VecDeque<(OffsetDateTime, u32)>,
    day: Date,
    used_today: u32,
}

impl BudgetState {
    fn roll(&mut self, now: OffsetDateTime) {
        let today = now.date();
        if today != self.day {
            self.day = today;
            self.used_today = 0;
        }
        while let Some((at, _)) = self.minute.front() {
            if *at + MINUTE <= now {
                self.minute.pop_front();
            } else {
                break;
            }
        }
    }

    fn used_this_minute(&self) -> u32 {
        self.minute
            .iter()
            .fold(0u32, |acc, (_, cost)| acc.saturating_add(*cost))
    }
}

impl RateBudget {
    pub fn new(limits: RateLimits, clock: Arc<dyn Clock>) -> Self {
        let today = utc_now(clock.as_ref()).date();
        Self {
            limits,
            clock,
            state: Mutex::new(BudgetState {
                minute: VecDeque::new(),
                day: today,
                used_today: 0,
            }),
        }
    }

    /// Starts the daily counter at `used`, for calls an earlier process
    /// already spent today.
    pub fn with_used_today(self, used: u32) -> Self {
        self.lock().used_today = used;
        self
    }

    pub const fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Reserve `cost` calls. Returns `false` without side effects when the
    /// reservation would break the per-minute or the daily ceiling.
    pub fn try_consume(&self, cost: u32) -> bool {
        let now = utc_now(self.clock.as_ref());
        let mut state = self.lock();
        state.roll(now);

        if cost == 0 {
            return true;
        }

        let minute_used = state.used_this_minute();
        let over_day = state.used_today.saturating_add(cost) > self.limits.per_day;
        let over_minute = minute_used.saturating_add(cost) > self.limits.per_minute;
        if over_day || over_minute {
            debug!(
                cost,
                used_today = state.used_today,
                used_this_minute = minute_used,
                over_day,
                over_minute,
                "rate budget denied request"
            );
            return false;
        }

        state.used_today += cost;
        state.minute.push_back((now, cost));
        true
    }

    /// How long until a single call would be allowed. Zero when one is
    /// allowed now.
    pub fn time_until_next_slot(&self) -> Duration {
        let now = utc_now(self.clock.as_ref());
        let mut state = self.lock();
        state.roll(now);

        if state.used_today >= self.limits.per_day {
            let next_midnight = state
                .day
                .next_day()
                .map(|day| day.midnight().assume_utc())
                .unwrap_or(now);
            return to_std(next_midnight - now);
        }

        let mut used = state.used_this_minute();
        if used < self.limits.per_minute {
            return Duration::ZERO;
        }

        for (at, cost) in &state.minute {
            used = used.saturating_sub(*cost);
            if used < self.limits.per_minute {
                return to_std(*at + MINUTE - now);
            }
        }
        Duration::ZERO
    }

    pub fn remaining_today(&self) -> u32 {
        let now = utc_now(self.clock.as_ref());
        let mut state = self.lock();
        state.roll(now);
        self.limits.per_day.saturating_sub(state.used_today)
    }

    pub fn used_today(&self) -> u32 {
        let now = utc_now(self.clock.as_ref());
        let mut state = self.lock();
        state.roll(now);
        state.used_today
    }

    pub fn remaining_this_minute(&self) -> u32 {
        let now = utc_now(self.clock.as_ref());
        let mut state = self.lock();
        state.roll(now);
        self.limits
            .per_minute
            .saturating_sub(state.used_this_minute())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        self.state
            .lock()
            .expect("rate budget lock should not be poisoned")
    }
}

fn utc_now(clock: &dyn Clock) -> OffsetDateTime {
    clock.now().to_offset(UtcOffset::UTC)
}

fn to_std(duration: time::Duration) -> Duration {
    Duration::try_from(duration).unwrap_or(Duration::ZERO)
}
