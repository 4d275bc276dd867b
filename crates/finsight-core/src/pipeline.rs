use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use crate::cache::{IndicatorSnapshot, InstrumentSnapshot, SnapshotSource};
use crate::domain::{Instrument, InstrumentId, Observation};
use crate::economic::economic_metrics;
use crate::error::{EngineError, StoreError};
use crate::indicators::{compute_series, IndicatorKind};
use crate::normalizer::{NormalizedSignal, SignalNormalizer};
use crate::rolling::{RollingStatistics, RollingWindow};
use crate::store::ObservationStore;
use crate::sufficiency::SufficiencyAssessor;

/// Observations read per instrument: the longest normalization window plus
/// the slowest indicator warm-up.
const HISTORY_LIMIT: usize = 300;

/// Store → indicators → rolling windows → normalized signals, for the
/// tracked instruments.
///
/// Each indicator's latest reading is scored against the trailing window of
/// the readings before it. Windows persist between calls and only take
/// readings newer than the ones they hold; a window is rebuilt when older
/// history shows up in front of it.
pub struct SignalPipeline {
    instruments: Vec<Instrument>,
    store: Arc<dyn ObservationStore>,
    assessor: SufficiencyAssessor,
    normalizer: SignalNormalizer,
    stats: Mutex<RollingStatistics>,
}

impl SignalPipeline {
    pub fn new(
        instruments: Vec<Instrument>,
        store: Arc<dyn ObservationStore>,
        assessor: SufficiencyAssessor,
    ) -> Self {
        Self {
            instruments,
            store,
            assessor,
            normalizer: SignalNormalizer::new(),
            stats: Mutex::new(RollingStatistics::new()),
        }
    }

    pub fn instruments(&self) -> &[Instrument] {
        &self.instruments
    }

    pub fn instrument_snapshot(
        &self,
        instrument: &Instrument,
    ) -> Result<InstrumentSnapshot, StoreError> {
        let sufficiency = self.assessor.assess(instrument)?;
        let history = self.store.recent(instrument.id(), HISTORY_LIMIT)?;

        let indicators = IndicatorKind::for_class(instrument.asset_class())
            .iter()
            .filter_map(|kind| {
                self.indicator_snapshot(instrument.id(), *kind, &history, sufficiency.confidence)
            })
            .collect();

        Ok(InstrumentSnapshot {
            instrument: instrument.clone(),
            economic: economic_metrics(instrument.asset_class(), &history),
            sufficiency,
            indicators,
        })
    }

    /// The trailing window `indicator` is currently scored against.
    pub fn window(
        &self,
        instrument: &InstrumentId,
        indicator: IndicatorKind,
    ) -> Option<RollingWindow> {
        self.lock_stats().snapshot(instrument, indicator)
    }

    /// `None` when the indicator has no reading yet or fewer than two prior
    /// readings to compare against.
    pub fn signal(
        &self,
        instrument: &Instrument,
        indicator: IndicatorKind,
    ) -> Result<Option<NormalizedSignal>, StoreError> {
        let sufficiency = self.assessor.assess(instrument)?;
        let history = self.store.recent(instrument.id(), HISTORY_LIMIT)?;
        Ok(self
            .indicator_snapshot(instrument.id(), indicator, &history, sufficiency.confidence)
            .and_then(|snapshot| snapshot.signal))
    }

    fn indicator_snapshot(
        &self,
        id: &InstrumentId,
        indicator: IndicatorKind,
        history: &[Observation],
        confidence: f64,
    ) -> Option<IndicatorSnapshot> {
        let series = compute_series(indicator, history);
        let (latest, trailing) = series.split_last()?;

        let window = {
            let mut stats = self.lock_stats();
            let grew_backwards = trailing.first().is_some_and(|first| {
                stats
                    .origin(id, indicator)
                    .is_some_and(|origin| first.date < origin)
            });
            if grew_backwards {
                debug!(instrument = %id, %indicator, "older history arrived, rebuilding window");
                stats.reset(id, indicator);
            }
            for reading in trailing {
                let value = reading.reading.scalar();
                if let Err(error) = stats.observe(id, indicator, reading.date, value) {
                    warn!(instrument = %id, %indicator, date = %reading.date, %error, "skipping reading");
                }
            }
            stats.snapshot(id, indicator)
        };
        let signal = window.map(|window| {
            self.normalizer
                .normalize(latest.reading.scalar(), &window, confidence)
        });

        Some(IndicatorSnapshot {
            indicator,
            date: latest.date,
            reading: latest.reading,
            signal,
        })
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, RollingStatistics> {
        self.stats
            .lock()
            .expect("rolling statistics lock should not be poisoned")
    }
}

impl SnapshotSource for SignalPipeline {
    fn compute<'a>(
        &'a self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<InstrumentSnapshot>, EngineError>> + Send + 'a>> {
        Box::pin(async move {
            self.instruments
                .iter()
                .map(|instrument| {
                    self.instrument_snapshot(instrument)
                        .map_err(EngineError::from)
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::AssetClass;
    use crate::normalizer::Signal;
    use crate::store::InMemoryObservationStore;
    use time::macros::{date, datetime};
    use time::Duration;

    fn pipeline(instruments: Vec<Instrument>, store: Arc<InMemoryObservationStore>) -> SignalPipeline {
        let clock = Arc::new(ManualClock::new(datetime!(2025-07-22 12:00 UTC)));
        let assessor = SufficiencyAssessor::new(store.clone(), clock);
        SignalPipeline::new(instruments, store, assessor)
    }

    fn seed(store: &InMemoryObservationStore, id: &InstrumentId, values: &[f64]) {
        let last = date!(2025 - 07 - 21);
        let count = values.len() as i64;
        let batch: Vec<Observation> = values
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let date = last - Duration::days(count - 1 - i as i64);
                Observation::new(id.clone(), date, *value).expect("obs")
            })
            .collect();
        store.insert_batch_if_absent(&batch).expect("seed");
    }

    #[test]
    fn economic_level_spike_is_scored_against_prior_releases() {
        let store = Arc::new(InMemoryObservationStore::new());
        let instrument = Instrument::parse("UNRATE", AssetClass::EconomicMonthly).expect("inst");
        let mut values: Vec<f64> = (0..40).map(|i| 4.0 + f64::from(i % 3) * 0.1).collect();
        values.push(6.0);
        seed(&store, instrument.id(), &values);

        let pipeline = pipeline(vec![instrument.clone()], store);
        let signal = pipeline
            .signal(&instrument, IndicatorKind::Level)
            .expect("signal")
            .expect("enough history");
        assert_eq!(signal.raw_value, 6.0);
        assert_eq!(signal.max_std_dev, 3.0);
        assert_eq!(signal.capped_z_score, 3.0);
        assert_eq!(signal.signal, Signal::Sell);

        let snapshot = pipeline.instrument_snapshot(&instrument).expect("snapshot");
        let economic = snapshot.economic.expect("economic metrics");
        assert_eq!(economic.current, 6.0);
        assert_eq!(snapshot.indicators.len(), 1);
    }

    #[test]
    fn short_history_yields_no_signal() {
        let store = Arc::new(InMemoryObservationStore::new());
        let instrument = Instrument::parse("SPY", AssetClass::Etf).expect("inst");
        seed(&store, instrument.id(), &[500.0, 501.0, 502.0]);

        let pipeline = pipeline(vec![instrument.clone()], store);
        assert_eq!(pipeline.signal(&instrument, IndicatorKind::Rsi).expect("signal"), None);

        let snapshot = pipeline.instrument_snapshot(&instrument).expect("snapshot");
        assert!(snapshot.indicators.is_empty());
        assert!(snapshot.economic.is_none());
    }

    #[tokio::test]
    async fn computes_every_tracked_instrument() {
        let store = Arc::new(InMemoryObservationStore::new());
        let spy = Instrument::parse("SPY", AssetClass::Etf).expect("inst");
        let qqq = Instrument::parse("QQQ", AssetClass::Etf).expect("inst");
        let closes: Vec<f64> = (0..120).map(|i| 400.0 + (f64::from(i) * 0.7).sin() * 5.0).collect();
        seed(&store, spy.id(), &closes);

        let pipeline = pipeline(vec![spy.clone(), qqq.clone()], store);
        let entries = pipeline.compute().await.expect("compute");
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].indicators.len(), 4);
        assert!(entries[0].indicators.iter().all(|entry| entry.signal.is_some()));
        assert!(entries[1].indicators.is_empty());
        assert_eq!(entries[1].sufficiency.current_count, 0);
    }

    #[test]
    fn windows_carry_over_and_rebuild_when_older_history_arrives() {
        let store = Arc::new(InMemoryObservationStore::new());
        let instrument = Instrument::parse("UNRATE", AssetClass::EconomicMonthly).expect("inst");
        let id = instrument.id().clone();
        let values: Vec<f64> = (0..10).map(|i| 4.0 + f64::from(i) * 0.1).collect();
        seed(&store, &id, &values);
        let pipeline = pipeline(vec![instrument.clone()], store.clone());

        pipeline.signal(&instrument, IndicatorKind::Level).expect("signal");
        let window = pipeline.window(&id, IndicatorKind::Level).expect("window");
        assert_eq!(window.sample_size, 9);

        // one newer release: the previous latest joins the window
        let newer = Observation::new(id.clone(), date!(2025 - 07 - 22), 5.5).expect("obs");
        store.insert_if_absent(&newer).expect("insert");
        pipeline.signal(&instrument, IndicatorKind::Level).expect("signal");
        let window = pipeline.window(&id, IndicatorKind::Level).expect("window");
        assert_eq!(window.sample_size, 10);
        assert!((window.values[9] - 4.9).abs() < 1e-9);

        // backfilled releases before the window's first date force a rebuild
        let older: Vec<Observation> = (1..=20)
            .map(|back| {
                let date = date!(2025 - 07 - 12) - Duration::days(back);
                Observation::new(id.clone(), date, 3.0).expect("obs")
            })
            .collect();
        store.insert_batch_if_absent(&older).expect("backfill");
        pipeline.signal(&instrument, IndicatorKind::Level).expect("signal");
        let window = pipeline.window(&id, IndicatorKind::Level).expect("window");
        assert_eq!(window.sample_size, 30);
        assert_eq!(window.values[0], 3.0);
        assert!((window.values[29] - 4.9).abs() < 1e-9);
    }
}
