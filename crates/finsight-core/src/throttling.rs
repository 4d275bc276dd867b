use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::clock::{Clock as _, DefaultClock, FakeRelativeClock};
use governor::middleware::NoOpMiddleware;
use governor::nanos::Nanos;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};

use crate::clock::ManualClock;

type DirectRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;
type SimulatedRateLimiter =
    RateLimiter<NotKeyed, InMemoryState, FakeRelativeClock, NoOpMiddleware<Nanos>>;

#[derive(Clone)]
enum Limiter {
    Unpaced,
    Wall(Arc<DirectRateLimiter>),
    /// Waiting moves both clocks forward instead of sleeping.
    Simulated {
        limiter: Arc<SimulatedRateLimiter>,
        clock: FakeRelativeClock,
        engine_clock: Arc<ManualClock>,
    },
}

/// Pacing policy applied before every provider call.
///
/// A paced instance admits one call per configured delay with a burst of
/// one, so the first call goes through immediately. Clones share the same
/// limiter, which is how one pacer spans every instrument of a run. The
/// unpaced instance admits everything; the simulated one runs on a
/// [`ManualClock`] and never touches the wall clock.
#[derive(Clone)]
pub struct CallPacer {
    limiter: Limiter,
    delay: Duration,
}

impl CallPacer {
    /// A zero delay yields an unpaced instance.
    pub fn new(delay: Duration) -> Self {
        let Some(quota) = quota_for(delay) else {
            return Self::unpaced();
        };
        Self {
            limiter: Limiter::Wall(Arc::new(RateLimiter::direct(quota))),
            delay,
        }
    }

    pub fn from_millis(delay_ms: u64) -> Self {
        Self::new(Duration::from_millis(delay_ms))
    }

    pub fn unpaced() -> Self {
        Self {
            limiter: Limiter::Unpaced,
            delay: Duration::ZERO,
        }
    }

    /// Paced on virtual time: every wait advances `engine_clock` by the
    /// time it would have slept.
    pub fn simulated(delay: Duration, engine_clock: Arc<ManualClock>) -> Self {
        let Some(quota) = quota_for(delay) else {
            return Self::unpaced();
        };
        let clock = FakeRelativeClock::default();
        Self {
            limiter: Limiter::Simulated {
                limiter: Arc::new(RateLimiter::direct_with_clock(quota, &clock)),
                clock,
                engine_clock,
            },
            delay,
        }
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    pub const fn is_paced(&self) -> bool {
        !matches!(self.limiter, Limiter::Unpaced)
    }

    /// Claims the next slot, or returns how long to wait for it.
    pub fn acquire(&self) -> Result<(), Duration> {
        match &self.limiter {
            Limiter::Unpaced => Ok(()),
            Limiter::Wall(limiter) => limiter
                .check()
                .map_err(|not_until| not_until.wait_time_from(DefaultClock::default().now())),
            Limiter::Simulated { limiter, clock, .. } => limiter
                .check()
                .map_err(|not_until| not_until.wait_time_from(clock.now())),
        }
    }

    /// Waits until a slot is available and claims it.
    pub async fn pace(&self) {
        while let Err(wait) = self.acquire() {
            match &self.limiter {
                Limiter::Simulated {
                    clock, engine_clock, ..
                } => {
                    clock.advance(wait);
                    let elapsed = time::Duration::try_from(wait).unwrap_or(time::Duration::ZERO);
                    engine_clock.advance(elapsed);
                }
                Limiter::Unpaced | Limiter::Wall(_) => tokio::time::sleep(wait).await,
            }
        }
    }
}

fn quota_for(delay: Duration) -> Option<Quota> {
    Quota::with_period(delay).map(|quota| quota.allow_burst(NonZeroU32::MIN))
}

impl std::fmt::Debug for CallPacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.limiter {
            Limiter::Unpaced => "unpaced",
            Limiter::Wall(_) => "wall",
            Limiter::Simulated { .. } => "simulated",
        };
        f.debug_struct("CallPacer")
            .field("delay", &self.delay)
            .field("mode", &mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use time::macros::datetime;

    #[test]
    fn paced_instance_admits_one_call_per_delay() {
        let pacer = CallPacer::new(Duration::from_secs(60));
        assert!(pacer.is_paced());
        assert!(pacer.acquire().is_ok());

        let wait = pacer.acquire().expect_err("second call must wait");
        assert!(wait > Duration::ZERO);
        assert!(wait <= Duration::from_secs(60));
    }

    #[test]
    fn zero_delay_is_unpaced() {
        let pacer = CallPacer::from_millis(0);
        assert!(!pacer.is_paced());
        for _ in 0..100 {
            assert!(pacer.acquire().is_ok());
        }
    }

    #[tokio::test]
    async fn unpaced_pace_never_sleeps() {
        let pacer = CallPacer::unpaced();
        let started = std::time::Instant::now();
        for _ in 0..50 {
            pacer.pace().await;
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn simulated_pacing_advances_the_engine_clock() {
        let start = datetime!(2025-07-22 12:00 UTC);
        let clock = Arc::new(ManualClock::new(start));
        let pacer = CallPacer::simulated(Duration::from_secs(12), clock.clone());

        for _ in 0..3 {
            pacer.pace().await;
        }
        assert_eq!(clock.now() - start, time::Duration::seconds(24));

        let shared = pacer.clone();
        shared.pace().await;
        assert_eq!(clock.now() - start, time::Duration::seconds(36));
    }
}
