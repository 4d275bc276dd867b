//! Composition root for the engine.
//!
//! Nothing in the crate is global: the [`Engine`] owns the single shared
//! [`RateBudget`], the store handle, the clock, and the snapshot cache, and
//! hands them to the components that need them.

use std::sync::Arc;

use time::UtcOffset;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backfill::{BackfillExecutor, BackfillResult, CompletionStatus};
use crate::cache::{FreshnessPolicy, RefreshOutcome, SnapshotView, UnifiedCacheCoordinator};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::domain::{Instrument, InstrumentId};
use crate::error::EngineError;
use crate::indicators::IndicatorKind;
use crate::normalizer::NormalizedSignal;
use crate::pipeline::SignalPipeline;
use crate::planner::BackfillPlanner;
use crate::provider::HistoryProvider;
use crate::rate_budget::RateBudget;
use crate::store::{BackfillAuditEntry, InMemoryObservationStore, ObservationStore};
use crate::sufficiency::{SufficiencyAssessor, SufficiencyReport};
use crate::throttling::CallPacer;

/// Builder for [`Engine`].
///
/// Defaults: in-memory store, system clock, no history provider (backfill
/// runs fail with [`EngineError::NoProvider`]).
pub struct EngineBuilder {
    config: EngineConfig,
    instruments: Vec<Instrument>,
    store: Option<Arc<dyn ObservationStore>>,
    provider: Option<Arc<dyn HistoryProvider>>,
    clock: Option<Arc<dyn Clock>>,
    pacer: Option<CallPacer>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            instruments: Vec::new(),
            store: None,
            provider: None,
            clock: None,
            pacer: None,
        }
    }

    /// Instruments covered by snapshots. Duplicates are dropped.
    pub fn instruments(mut self, instruments: impl IntoIterator<Item = Instrument>) -> Self {
        for instrument in instruments {
            if !self.instruments.contains(&instrument) {
                self.instruments.push(instrument);
            }
        }
        self
    }

    pub fn store(mut self, store: Arc<dyn ObservationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn HistoryProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replaces the pacer derived from `inter_call_delay_ms`. One pacer
    /// spaces every provider call of a run, across instruments.
    pub fn pacer(mut self, pacer: CallPacer) -> Self {
        self.pacer = Some(pacer);
        self
    }

    pub fn build(self) -> Engine {
        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let store: Arc<dyn ObservationStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryObservationStore::new()),
        };
        let today = clock.now().to_offset(UtcOffset::UTC).date();
        let used_today = match store.api_calls_recorded_on(today) {
            Ok(used) => used,
            Err(error) => {
                warn!(%error, "could not read today's provider usage, starting the budget at zero");
                0
            }
        };
        if used_today > 0 {
            debug!(used_today, "daily budget carries calls from earlier runs");
        }
        let budget = Arc::new(
            RateBudget::new(self.config.rate_limits, Arc::clone(&clock)).with_used_today(used_today),
        );

        let assessor = SufficiencyAssessor::new(Arc::clone(&store), Arc::clone(&clock));
        let planner = BackfillPlanner::new(
            assessor.clone(),
            self.config.batch_size,
            self.config.inter_call_delay_ms,
        );
        let pacer = self
            .pacer
            .unwrap_or_else(|| CallPacer::new(self.config.inter_call_delay()));
        let executor = self.provider.map(|provider| {
            BackfillExecutor::new(Arc::clone(&store), provider, Arc::clone(&budget))
                .with_fetch_timeout(self.config.fetch_timeout())
                .with_pacer(pacer)
        });

        let pipeline = Arc::new(SignalPipeline::new(
            self.instruments,
            Arc::clone(&store),
            assessor.clone(),
        ));
        let cache = Arc::new(UnifiedCacheCoordinator::new(
            pipeline.clone(),
            Arc::clone(&clock),
            FreshnessPolicy::from_minutes(self.config.fresh_minutes, self.config.stale_minutes),
        ));

        Engine {
            config: self.config,
            store,
            clock,
            budget,
            assessor,
            planner,
            executor,
            pipeline,
            cache,
        }
    }
}

/// Public facade: sufficiency reports, normalized signals, backfill runs,
/// and the unified snapshot.
pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn ObservationStore>,
    clock: Arc<dyn Clock>,
    budget: Arc<RateBudget>,
    assessor: SufficiencyAssessor,
    planner: BackfillPlanner,
    executor: Option<BackfillExecutor>,
    pipeline: Arc<SignalPipeline>,
    cache: Arc<UnifiedCacheCoordinator>,
}

impl Engine {
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn instruments(&self) -> &[Instrument] {
        self.pipeline.instruments()
    }

    /// Looks up a tracked instrument by id.
    pub fn instrument(&self, id: &InstrumentId) -> Result<&Instrument, EngineError> {
        self.instruments()
            .iter()
            .find(|instrument| instrument.id() == id)
            .ok_or_else(|| EngineError::UnknownInstrument(id.to_string()))
    }

    pub fn budget(&self) -> &Arc<RateBudget> {
        &self.budget
    }

    pub fn sufficiency_report(
        &self,
        instrument: &Instrument,
    ) -> Result<SufficiencyReport, EngineError> {
        Ok(self.assessor.assess(instrument)?)
    }

    /// Reports for every tracked instrument, in tracking order.
    pub fn sufficiency_reports(&self) -> Result<Vec<SufficiencyReport>, EngineError> {
        Ok(self.assessor.assess_all(self.instruments())?)
    }

    /// Latest reading of `indicator`, scored against its trailing window.
    /// `None` when history is too short to produce one.
    pub fn normalized_signal(
        &self,
        instrument: &Instrument,
        indicator: IndicatorKind,
    ) -> Result<Option<NormalizedSignal>, EngineError> {
        Ok(self.pipeline.signal(instrument, indicator)?)
    }

    /// Plans against the remaining daily budget, then backfills each planned
    /// instrument in priority order and records one audit entry per result.
    ///
    /// Individual failures stay on their `BackfillResult`. The run itself
    /// fails only when every planned instrument failed with errors.
    pub async fn run_backfill(
        &self,
        instruments: &[Instrument],
        target_days: usize,
    ) -> Result<Vec<BackfillResult>, EngineError> {
        let Some(executor) = &self.executor else {
            return Err(EngineError::NoProvider);
        };

        let plan = self
            .planner
            .plan(instruments, target_days, self.budget.remaining_today())?;
        let run_id = Uuid::new_v4();
        info!(
            %run_id,
            planned = plan.len(),
            candidates = instruments.len(),
            budget_remaining = self.budget.remaining_today(),
            "starting backfill run"
        );

        let mut results = Vec::with_capacity(plan.len());
        for config in &plan {
            let result = executor.execute(config).await;
            let entry = BackfillAuditEntry {
                run_id,
                recorded_at: self.clock.now(),
                result: result.clone(),
            };
            if let Err(error) = self.store.record_backfill(&entry) {
                warn!(%run_id, instrument = %result.instrument, %error, "could not record backfill audit entry");
            }
            results.push(result);
        }

        let records_added: usize = results.iter().map(|result| result.records_added).sum();
        let deferred = results.iter().filter(|result| result.deferred).count();
        info!(%run_id, records_added, deferred, "backfill run finished");

        if records_added > 0 {
            // refresh failures are logged by the coordinator
            let _ = self.cache.refresh().await;
        }

        let all_failed = !results.is_empty()
            && results
                .iter()
                .all(|result| result.status == CompletionStatus::Failed && result.has_errors());
        if all_failed {
            return Err(EngineError::BackfillRunFailed {
                attempted: results.len(),
            });
        }
        Ok(results)
    }

    /// The published snapshot, refreshed as its freshness requires.
    pub async fn unified_snapshot(&self) -> SnapshotView {
        self.cache.get_snapshot().await
    }

    /// Forces a recompute regardless of freshness.
    pub async fn refresh_snapshot(&self) -> Result<RefreshOutcome, EngineError> {
        self.cache.refresh().await
    }

    pub fn backfill_history(
        &self,
        instrument: Option<&InstrumentId>,
    ) -> Result<Vec<BackfillAuditEntry>, EngineError> {
        Ok(self.store.backfill_history(instrument)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Freshness;
    use crate::clock::ManualClock;
    use crate::domain::{AssetClass, Observation};
    use crate::provider::{InMemoryHistoryProvider, SourceError};
    use crate::rate_budget::RateLimits;
    use time::macros::{date, datetime};
    use time::Duration;

    fn config() -> EngineConfig {
        EngineConfig {
            rate_limits: RateLimits {
                per_minute: 100,
                per_day: 500,
            },
            batch_size: 20,
            inter_call_delay_ms: 0,
            ..EngineConfig::default()
        }
    }

    fn history(id: &str, days: i64) -> Vec<Observation> {
        let id = InstrumentId::parse(id).expect("id");
        (0..days)
            .map(|offset| {
                let date = date!(2025 - 07 - 21) - Duration::days(offset);
                Observation::new(id.clone(), date, 100.0 + offset as f64).expect("obs")
            })
            .collect()
    }

    #[tokio::test]
    async fn backfill_without_provider_is_rejected() {
        let engine = Engine::builder(config()).build();
        let spy = Instrument::parse("SPY", AssetClass::Etf).expect("inst");
        let error = engine.run_backfill(&[spy], 63).await.expect_err("no provider");
        assert!(matches!(error, EngineError::NoProvider));
    }

    #[tokio::test]
    async fn backfill_records_audit_entries_under_one_run_id() {
        let clock = Arc::new(ManualClock::new(datetime!(2025-07-22 12:00 UTC)));
        let provider = Arc::new(InMemoryHistoryProvider::with_observations(
            history("SPY", 80).into_iter().chain(history("QQQ", 80)),
        ));
        let spy = Instrument::parse("SPY", AssetClass::Etf).expect("inst");
        let qqq = Instrument::parse("QQQ", AssetClass::Etf).expect("inst");
        let engine = Engine::builder(config())
            .instruments([spy.clone(), qqq.clone()])
            .provider(provider)
            .clock(clock)
            .pacer(CallPacer::unpaced())
            .build();

        let results = engine
            .run_backfill(&[spy.clone(), qqq.clone()], 63)
            .await
            .expect("run");
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|result| result.records_added == 80));

        let audit = engine.backfill_history(None).expect("audit");
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].run_id, audit[1].run_id);
        assert_eq!(engine.backfill_history(Some(spy.id())).expect("audit").len(), 1);

        // the run refreshed the snapshot
        assert_eq!(engine.unified_snapshot().await.freshness, Freshness::Fresh);
    }

    #[tokio::test]
    async fn run_fails_only_when_every_instrument_failed() {
        let clock = Arc::new(ManualClock::new(datetime!(2025-07-22 12:00 UTC)));
        let provider = Arc::new(InMemoryHistoryProvider::new());
        let spy = Instrument::parse("SPY", AssetClass::Etf).expect("inst");
        provider.fail_with(spy.id().clone(), SourceError::unavailable("upstream down"));
        let engine = Engine::builder(config())
            .provider(provider)
            .clock(clock)
            .pacer(CallPacer::unpaced())
            .build();

        let error = engine.run_backfill(&[spy], 63).await.expect_err("all failed");
        assert!(matches!(error, EngineError::BackfillRunFailed { attempted: 1 }));
        let audit = engine.backfill_history(None).expect("audit");
        assert_eq!(audit.len(), 1);
        assert!(audit[0].result.has_errors());
    }

    #[tokio::test]
    async fn budget_starts_from_calls_already_recorded_today() {
        let store: Arc<dyn ObservationStore> = Arc::new(InMemoryObservationStore::new());
        let spy = Instrument::parse("SPY", AssetClass::Etf).expect("inst");
        let first = Engine::builder(config())
            .store(Arc::clone(&store))
            .provider(Arc::new(InMemoryHistoryProvider::with_observations(history("SPY", 80))))
            .clock(Arc::new(ManualClock::new(datetime!(2025-07-22 08:00 UTC))))
            .build();
        first.run_backfill(&[spy], 63).await.expect("run");
        let spent = first.budget().used_today();
        assert!(spent > 0);

        let later = Engine::builder(config())
            .store(Arc::clone(&store))
            .clock(Arc::new(ManualClock::new(datetime!(2025-07-22 18:00 UTC))))
            .build();
        assert_eq!(later.budget().used_today(), spent);

        let next_day = Engine::builder(config())
            .store(store)
            .clock(Arc::new(ManualClock::new(datetime!(2025-07-23 08:00 UTC))))
            .build();
        assert_eq!(next_day.budget().used_today(), 0);
    }

    #[test]
    fn unknown_instruments_are_reported() {
        let spy = Instrument::parse("SPY", AssetClass::Etf).expect("inst");
        let engine = Engine::builder(config()).instruments([spy.clone(), spy.clone()]).build();
        assert_eq!(engine.instruments().len(), 1);
        assert_eq!(engine.instrument(spy.id()).expect("tracked"), &spy);

        let missing = InstrumentId::parse("IWM").expect("id");
        assert!(matches!(
            engine.instrument(&missing),
            Err(EngineError::UnknownInstrument(id)) if id == "IWM"
        ));
    }
}
