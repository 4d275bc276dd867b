use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::clock::Clock;
use crate::domain::{AssetClass, Instrument, InstrumentId};
use crate::error::StoreError;
use crate::store::ObservationStore;

/// Confidence bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReliabilityTier {
    Unreliable,
    Low,
    Medium,
    High,
}

impl ReliabilityTier {
    pub fn from_confidence(confidence: f64) -> Self {
        if confidence >= 0.8 {
            Self::High
        } else if confidence >= 0.6 {
            Self::Medium
        } else if confidence >= 0.4 {
            Self::Low
        } else {
            Self::Unreliable
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Unreliable => "unreliable",
        }
    }

    pub const fn recommendation(self) -> &'static str {
        match self {
            Self::High => "history is sufficient; derived statistics can be trusted",
            Self::Medium => "usable with caution; backfill to reach full confidence",
            Self::Low => "limited history; treat derived signals as indicative only",
            Self::Unreliable => "insufficient history; backfill before relying on any signal",
        }
    }
}

impl Display for ReliabilityTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much history an instrument has against what its class requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SufficiencyReport {
    pub instrument: InstrumentId,
    pub asset_class: AssetClass,
    pub current_count: usize,
    pub required_count: usize,
    /// `current_count / required_count`, not capped.
    pub sufficiency_ratio: f64,
    pub confidence: f64,
    pub tier: ReliabilityTier,
    pub recommendation: String,
    #[serde(with = "time::serde::rfc3339")]
    pub computed_at: OffsetDateTime,
}

/// Confidence multiplier granted when the trailing window is complete.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecencyBoost {
    pub window_days: i64,
    pub min_observations: usize,
    pub multiplier: f64,
}

impl RecencyBoost {
    pub const fn for_class(asset_class: AssetClass) -> Self {
        match asset_class {
            AssetClass::Etf => Self {
                window_days: 42,
                min_observations: 30,
                multiplier: 1.5,
            },
            AssetClass::Equity => Self {
                window_days: 42,
                min_observations: 30,
                multiplier: 1.2,
            },
            AssetClass::EconomicMonthly => Self {
                window_days: 366,
                min_observations: 11,
                multiplier: 1.1,
            },
            AssetClass::EconomicQuarterly => Self {
                window_days: 400,
                min_observations: 4,
                multiplier: 1.1,
            },
        }
    }
}

/// Confidence from the total count and the count inside the recency window.
/// Always in `[0, 1]`.
pub fn confidence_for(asset_class: AssetClass, current_count: usize, recent_count: usize) -> f64 {
    let required = asset_class.required_observations() as f64;
    let baseline = (current_count as f64 / required).min(1.0);
    let boost = RecencyBoost::for_class(asset_class);
    let boosted = if recent_count >= boost.min_observations {
        baseline * boost.multiplier
    } else {
        baseline
    };
    boosted.clamp(0.0, 1.0)
}

/// Computes sufficiency reports from the store. Read-only.
#[derive(Clone)]
pub struct SufficiencyAssessor {
    store: Arc<dyn ObservationStore>,
    clock: Arc<dyn Clock>,
}

impl SufficiencyAssessor {
    pub fn new(store: Arc<dyn ObservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub fn assess(&self, instrument: &Instrument) -> Result<SufficiencyReport, StoreError> {
        let asset_class = instrument.asset_class();
        let required_count = asset_class.required_observations();
        let current_count = self.store.count(instrument.id())?;

        let now = self.clock.now();
        let boost = RecencyBoost::for_class(asset_class);
        let window_start = (now - Duration::days(boost.window_days)).date();
        let recent_count = self.store.count_since(instrument.id(), window_start)?;

        let confidence = confidence_for(asset_class, current_count, recent_count);
        let tier = ReliabilityTier::from_confidence(confidence);

        Ok(SufficiencyReport {
            instrument: instrument.id().clone(),
            asset_class,
            current_count,
            required_count,
            sufficiency_ratio: current_count as f64 / required_count as f64,
            confidence,
            tier,
            recommendation: tier.recommendation().to_owned(),
            computed_at: now,
        })
    }

    pub fn assess_all(&self, instruments: &[Instrument]) -> Result<Vec<SufficiencyReport>, StoreError> {
        instruments
            .iter()
            .map(|instrument| self.assess(instrument))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::domain::Observation;
    use crate::store::InMemoryObservationStore;
    use time::macros::{date, datetime};
    use time::Date;

    fn seed(store: &InMemoryObservationStore, id: &str, last: Date, count: i64) {
        let id = InstrumentId::parse(id).expect("id");
        let batch: Vec<Observation> = (0..count)
            .map(|offset| {
                Observation::new(id.clone(), last - Duration::days(offset), 100.0).expect("obs")
            })
            .collect();
        store.insert_batch_if_absent(&batch).expect("seed");
    }

    fn assessor(store: Arc<InMemoryObservationStore>) -> SufficiencyAssessor {
        let clock = Arc::new(ManualClock::new(datetime!(2025-07-22 12:00 UTC)));
        SufficiencyAssessor::new(store, clock)
    }

    #[test]
    fn ten_equity_observations_are_unreliable() {
        let store = Arc::new(InMemoryObservationStore::new());
        seed(&store, "SPY", date!(2025 - 07 - 22), 10);

        let report = assessor(store)
            .assess(&Instrument::parse("SPY", AssetClass::Equity).expect("instrument"))
            .expect("report");
        assert_eq!(report.required_count, 252);
        assert_eq!(report.current_count, 10);
        assert!((report.sufficiency_ratio - 0.0397).abs() < 1e-3);
        assert_eq!(report.tier, ReliabilityTier::Unreliable);
        assert_eq!(report.recommendation, ReliabilityTier::Unreliable.recommendation());
        assert_eq!(report.computed_at, datetime!(2025-07-22 12:00 UTC));
    }

    #[test]
    fn complete_recent_window_boosts_etf_confidence() {
        let store = Arc::new(InMemoryObservationStore::new());
        seed(&store, "XLK", date!(2025 - 07 - 22), 35);

        let report = assessor(store)
            .assess(&Instrument::parse("XLK", AssetClass::Etf).expect("instrument"))
            .expect("report");
        let baseline = 35.0 / 63.0;
        assert!((report.confidence - baseline * 1.5).abs() < 1e-9);
        assert_eq!(report.tier, ReliabilityTier::High);
    }

    #[test]
    fn stale_history_gets_no_boost() {
        let store = Arc::new(InMemoryObservationStore::new());
        seed(&store, "XLK", date!(2025 - 01 - 10), 35);

        let report = assessor(store)
            .assess(&Instrument::parse("XLK", AssetClass::Etf).expect("instrument"))
            .expect("report");
        assert!((report.confidence - 35.0 / 63.0).abs() < 1e-9);
        assert_eq!(report.tier, ReliabilityTier::Low);
    }

    #[test]
    fn ratio_is_uncapped_but_confidence_is() {
        let store = Arc::new(InMemoryObservationStore::new());
        seed(&store, "CPIAUCSL", date!(2025 - 07 - 01), 72);

        let report = assessor(store)
            .assess(&Instrument::parse("CPIAUCSL", AssetClass::EconomicMonthly).expect("inst"))
            .expect("report");
        assert!((report.sufficiency_ratio - 2.0).abs() < 1e-9);
        assert_eq!(report.confidence, 1.0);
        assert_eq!(report.tier, ReliabilityTier::High);
    }

    #[test]
    fn confidence_is_monotonic_in_count() {
        for class in AssetClass::ALL {
            let boost = RecencyBoost::for_class(class);
            for recent in [0, boost.min_observations] {
                let mut previous = 0.0;
                for count in recent..600 {
                    let confidence = confidence_for(class, count, recent);
                    assert!(confidence >= previous, "{class} at {count}");
                    assert!((0.0..=1.0).contains(&confidence));
                    previous = confidence;
                }
            }
        }
    }

    #[test]
    fn tiers_follow_thresholds() {
        assert_eq!(ReliabilityTier::from_confidence(0.8), ReliabilityTier::High);
        assert_eq!(ReliabilityTier::from_confidence(0.79), ReliabilityTier::Medium);
        assert_eq!(ReliabilityTier::from_confidence(0.6), ReliabilityTier::Medium);
        assert_eq!(ReliabilityTier::from_confidence(0.4), ReliabilityTier::Low);
        assert_eq!(ReliabilityTier::from_confidence(0.39), ReliabilityTier::Unreliable);
    }
}
