use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::rate_budget::RateLimits;

/// Tunables for the engine.
///
/// `Default` matches a free-tier provider plan. `from_env` overlays any
/// `FINSIGHT_*` variable that is set; the data directory itself is resolved
/// by `WarehouseConfig` from `FINSIGHT_HOME`.
///
/// | Variable | Field |
/// |----------|-------|
/// | `FINSIGHT_RATE_PER_MINUTE` | `rate_limits.per_minute` |
/// | `FINSIGHT_RATE_PER_DAY` | `rate_limits.per_day` |
/// | `FINSIGHT_BATCH_SIZE` | `batch_size` |
/// | `FINSIGHT_CALL_DELAY_MS` | `inter_call_delay_ms` |
/// | `FINSIGHT_FETCH_TIMEOUT_MS` | `fetch_timeout_ms` |
/// | `FINSIGHT_FRESH_MINUTES` | `fresh_minutes` |
/// | `FINSIGHT_STALE_MINUTES` | `stale_minutes` |
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub rate_limits: RateLimits,
    /// Observations requested per provider call.
    pub batch_size: usize,
    pub inter_call_delay_ms: u64,
    pub fetch_timeout_ms: u64,
    /// Snapshot age below which it is served as fresh.
    pub fresh_minutes: i64,
    /// Snapshot age at and above which a refresh is triggered.
    pub stale_minutes: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            rate_limits: RateLimits::default(),
            batch_size: 100,
            inter_call_delay_ms: 12_000,
            fetch_timeout_ms: 30_000,
            fresh_minutes: 10,
            stale_minutes: 30,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::default().overlay(|key| env::var(key).ok())
    }

    /// Applies every variable `lookup` resolves. Unparseable or zero values
    /// are logged and ignored.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        overlay_positive(&lookup, "FINSIGHT_RATE_PER_MINUTE", &mut self.rate_limits.per_minute);
        overlay_positive(&lookup, "FINSIGHT_RATE_PER_DAY", &mut self.rate_limits.per_day);
        overlay_positive(&lookup, "FINSIGHT_BATCH_SIZE", &mut self.batch_size);
        overlay_any(&lookup, "FINSIGHT_CALL_DELAY_MS", &mut self.inter_call_delay_ms);
        overlay_positive(&lookup, "FINSIGHT_FETCH_TIMEOUT_MS", &mut self.fetch_timeout_ms);
        overlay_positive(&lookup, "FINSIGHT_FRESH_MINUTES", &mut self.fresh_minutes);
        overlay_positive(&lookup, "FINSIGHT_STALE_MINUTES", &mut self.stale_minutes);

        if self.stale_minutes < self.fresh_minutes {
            warn!(
                fresh_minutes = self.fresh_minutes,
                stale_minutes = self.stale_minutes,
                "stale threshold below fresh threshold, clamping"
            );
            self.stale_minutes = self.fresh_minutes;
        }
        self
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

fn overlay_any<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => warn!(key, value = %raw, "ignoring unparseable setting"),
    }
}

fn overlay_positive<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: FromStr + PartialOrd + Default + Copy,
{
    let mut candidate = *slot;
    overlay_any(lookup, key, &mut candidate);
    if candidate > T::default() {
        *slot = candidate;
    } else {
        warn!(key, "ignoring non-positive setting");
    }
}
