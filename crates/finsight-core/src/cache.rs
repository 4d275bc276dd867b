//! Single published snapshot of every tracked instrument's outputs.
//!
//! The coordinator holds one immutable [`Snapshot`] behind an `Arc` and swaps
//! it whole on refresh, so all readers of one refresh cycle see identical
//! numbers. Freshness is derived from the snapshot age on an injected clock:
//!
//! ```text
//! Empty --refresh--> Fresh --(10 min)--> Recent --(30 min)--> Stale
//!                      ^                                        |
//!                      +--------------- refresh ----------------+
//! ```

use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use time::{Date, Duration, OffsetDateTime};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::domain::Instrument;
use crate::economic::EconomicMetrics;
use crate::error::EngineError;
use crate::indicators::{IndicatorKind, IndicatorReading};
use crate::normalizer::NormalizedSignal;
use crate::sufficiency::SufficiencyReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Empty,
    Fresh,
    Recent,
    Stale,
}

impl Freshness {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Fresh => "fresh",
            Self::Recent => "recent",
            Self::Stale => "stale",
        }
    }
}

impl Display for Freshness {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Age thresholds separating fresh, recent and stale snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub fresh_for: Duration,
    pub stale_after: Duration,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            fresh_for: Duration::minutes(10),
            stale_after: Duration::minutes(30),
        }
    }
}

impl FreshnessPolicy {
    pub fn from_minutes(fresh_minutes: i64, stale_minutes: i64) -> Self {
        Self {
            fresh_for: Duration::minutes(fresh_minutes),
            stale_after: Duration::minutes(stale_minutes.max(fresh_minutes)),
        }
    }

    pub fn classify(&self, age: Duration) -> Freshness {
        if age < self.fresh_for {
            Freshness::Fresh
        } else if age < self.stale_after {
            Freshness::Recent
        } else {
            Freshness::Stale
        }
    }
}

/// Latest reading of one indicator and its normalized signal, when the
/// trailing window was long enough to produce one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub indicator: IndicatorKind,
    pub date: Date,
    pub reading: IndicatorReading,
    pub signal: Option<NormalizedSignal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSnapshot {
    pub instrument: Instrument,
    pub sufficiency: SufficiencyReport,
    pub indicators: Vec<IndicatorSnapshot>,
    pub economic: Option<EconomicMetrics>,
}

impl InstrumentSnapshot {
    pub fn signal(&self, indicator: IndicatorKind) -> Option<&NormalizedSignal> {
        self.indicators
            .iter()
            .find(|entry| entry.indicator == indicator)
            .and_then(|entry| entry.signal.as_ref())
    }
}

/// One refresh cycle's outputs. Never mutated after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cycle: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub as_of: OffsetDateTime,
    pub entries: Vec<InstrumentSnapshot>,
}

impl Snapshot {
    pub fn entry(&self, instrument: &Instrument) -> Option<&InstrumentSnapshot> {
        self.entries
            .iter()
            .find(|entry| &entry.instrument == instrument)
    }
}

/// What a reader gets: the published snapshot, if any, and how old it is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotView {
    pub freshness: Freshness,
    pub snapshot: Option<Arc<Snapshot>>,
}

impl SnapshotView {
    pub fn as_of(&self) -> Option<OffsetDateTime> {
        self.snapshot.as_ref().map(|snapshot| snapshot.as_of)
    }

    pub fn cycle(&self) -> Option<u64> {
        self.snapshot.as_ref().map(|snapshot| snapshot.cycle)
    }

    pub fn entries(&self) -> &[InstrumentSnapshot] {
        match &self.snapshot {
            Some(snapshot) => &snapshot.entries,
            None => &[],
        }
    }
}

/// Computes a full set of outputs for the coordinator to publish.
pub trait SnapshotSource: Send + Sync {
    fn compute<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<InstrumentSnapshot>, EngineError>> + Send + 'a>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Published { cycle: u64 },
    AlreadyRunning,
}

/// Owns the published snapshot and guarantees at most one refresh in flight.
pub struct UnifiedCacheCoordinator {
    source: Arc<dyn SnapshotSource>,
    clock: Arc<dyn Clock>,
    policy: FreshnessPolicy,
    published: RwLock<Option<Arc<Snapshot>>>,
    refresh_gate: Arc<Mutex<()>>,
    cycles: AtomicU64,
}

impl UnifiedCacheCoordinator {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        clock: Arc<dyn Clock>,
        policy: FreshnessPolicy,
    ) -> Self {
        Self {
            source,
            clock,
            policy,
            published: RwLock::new(None),
            refresh_gate: Arc::new(Mutex::new(())),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn freshness(&self) -> Freshness {
        self.view().freshness
    }

    pub fn is_refreshing(&self) -> bool {
        self.refresh_gate.try_lock().is_err()
    }

    /// The published snapshot as-is, without triggering anything.
    pub fn view(&self) -> SnapshotView {
        let snapshot = self
            .published
            .read()
            .expect("published snapshot lock should not be poisoned")
            .clone();
        let freshness = match &snapshot {
            None => Freshness::Empty,
            Some(snapshot) => self.policy.classify(self.clock.now() - snapshot.as_of),
        };
        SnapshotView {
            freshness,
            snapshot,
        }
    }

    /// Fresh and recent snapshots are returned untouched. A stale one is
    /// returned immediately while a refresh runs in the background. With
    /// nothing published yet the caller waits for the first refresh, and
    /// readers that arrive while it runs share its outcome.
    pub async fn get_snapshot(self: &Arc<Self>) -> SnapshotView {
        let view = self.view();
        match view.freshness {
            Freshness::Fresh | Freshness::Recent => view,
            Freshness::Stale => {
                if let Ok(guard) = Arc::clone(&self.refresh_gate).try_lock_owned() {
                    let coordinator = Arc::clone(self);
                    tokio::spawn(async move {
                        // failures are logged inside
                        let _ = coordinator.refresh_locked(guard).await;
                    });
                } else {
                    debug!("snapshot stale, refresh already in flight");
                }
                view
            }
            Freshness::Empty => {
                match Arc::clone(&self.refresh_gate).try_lock_owned() {
                    Ok(guard) => {
                        if self.view().freshness == Freshness::Empty {
                            // failures are logged inside
                            let _ = self.refresh_locked(guard).await;
                        }
                    }
                    Err(_) => {
                        // one attempt per wave of readers; a failed one is not retried here
                        debug!("first snapshot in flight, waiting for it");
                        drop(self.refresh_gate.lock().await);
                    }
                }
                self.view()
            }
        }
    }

    /// Recomputes and publishes a new snapshot. Returns `AlreadyRunning`
    /// without waiting when another refresh holds the gate.
    pub async fn refresh(&self) -> Result<RefreshOutcome, EngineError> {
        let Ok(guard) = Arc::clone(&self.refresh_gate).try_lock_owned() else {
            return Ok(RefreshOutcome::AlreadyRunning);
        };
        self.refresh_locked(guard).await
    }

    async fn refresh_locked(
        &self,
        _guard: OwnedMutexGuard<()>,
    ) -> Result<RefreshOutcome, EngineError> {
        let entries = match self.source.compute().await {
            Ok(entries) => entries,
            Err(error) => {
                warn!(%error, "snapshot refresh failed, serving previous snapshot");
                return Err(error);
            }
        };

        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(Snapshot {
            cycle,
            as_of: self.clock.now(),
            entries,
        });
        info!(cycle, instruments = snapshot.entries.len(), "published snapshot");
        *self
            .published
            .write()
            .expect("published snapshot lock should not be poisoned") = Some(snapshot);
        Ok(RefreshOutcome::Published { cycle })
    }
}
