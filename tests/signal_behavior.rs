//! Behavior-driven tests for sufficiency grading and signal normalization
//!
//! These tests verify HOW stored history turns into advice: how much trust an
//! instrument's history earns, and how a raw indicator value becomes a capped
//! Z-score and a BUY/SELL/HOLD call.

use std::sync::Arc;

use finsight_core::{
    confidence_for, AssetClass, Engine, EngineConfig, IndicatorKind, InMemoryObservationStore,
    Instrument, InstrumentId, ManualClock, Observation, ObservationStore, ReliabilityTier,
    RollingStatistics, Signal, SignalNormalizer,
};
use time::macros::{date, datetime};
use time::Duration;

fn engine_with(store: Arc<InMemoryObservationStore>, instruments: Vec<Instrument>) -> Engine {
    Engine::builder(EngineConfig::default())
        .instruments(instruments)
        .store(store)
        .clock(Arc::new(ManualClock::new(datetime!(2025-07-22 12:00 UTC))))
        .build()
}

fn seed(store: &InMemoryObservationStore, id: &str, values: &[f64]) {
    let id = InstrumentId::parse(id).expect("valid id");
    let newest = date!(2025 - 07 - 21);
    let count = values.len() as i64;
    let observations: Vec<Observation> = values
        .iter()
        .enumerate()
        .map(|(index, value)| {
            let date = newest - Duration::days(count - 1 - index as i64);
            Observation::new(id.clone(), date, *value).expect("observation")
        })
        .collect();
    store.insert_batch_if_absent(&observations).expect("seed");
}

fn window_of(values: &[f64]) -> finsight_core::RollingWindow {
    let id = InstrumentId::parse("SPY").expect("valid id");
    let mut stats = RollingStatistics::new();
    for value in values {
        stats.update(&id, IndicatorKind::Rsi, *value).expect("finite");
    }
    stats.snapshot(&id, IndicatorKind::Rsi).expect("at least two values")
}

// =============================================================================
// Sufficiency: Grading stored history
// =============================================================================

#[test]
fn when_an_equity_has_ten_of_252_observations_it_is_graded_unreliable() {
    // Given: SPY tracked as an equity with ten stored closes
    let store = Arc::new(InMemoryObservationStore::new());
    seed(&store, "SPY", &[500.0; 10]);
    let spy = Instrument::parse("SPY", AssetClass::Equity).expect("instrument");
    let engine = engine_with(store, vec![spy.clone()]);

    // When: The user asks for its sufficiency report
    let report = engine.sufficiency_report(&spy).expect("report");

    // Then: It needs 252, has about 4% of that, and is unreliable
    assert_eq!(report.required_count, 252);
    assert_eq!(report.current_count, 10);
    assert!((report.sufficiency_ratio - 0.04).abs() < 0.001);
    assert_eq!(report.tier, ReliabilityTier::Unreliable);
    assert!(!report.recommendation.is_empty());
}

#[test]
fn when_more_history_is_stored_confidence_never_drops() {
    // Given: Every asset class and a growing observation count
    for asset_class in [
        AssetClass::Equity,
        AssetClass::Etf,
        AssetClass::EconomicMonthly,
        AssetClass::EconomicQuarterly,
    ] {
        let mut previous = 0.0;
        for count in 0..400 {
            // When: Confidence is computed with and without recent data
            let stale = confidence_for(asset_class, count, 0);
            let recent = confidence_for(asset_class, count, count);

            // Then: It is bounded and monotonic in the count
            assert!((0.0..=1.0).contains(&stale));
            assert!(recent >= stale, "recent data never lowers confidence");
            assert!(stale >= previous, "{asset_class} at {count}");
            previous = stale;
        }
    }
}

// =============================================================================
// Normalization: Z-scores and signals
// =============================================================================

#[test]
fn when_a_reading_sits_far_above_its_window_it_is_a_sell() {
    // Given: A trailing window [10, 12, 11, 13, 12]
    let window = window_of(&[10.0, 12.0, 11.0, 13.0, 12.0]);

    // When: 15 is normalized at confidence 0.9
    let signal = SignalNormalizer::new().normalize(15.0, &window, 0.9);

    // Then: Sample std is about 1.14 and z about 2.98, inside the cap of 5
    assert!((window.standard_deviation - 1.14).abs() < 0.01);
    assert!((signal.z_score - 2.98).abs() < 0.01);
    assert_eq!(signal.max_std_dev, 5.0);
    assert_eq!(signal.capped_z_score, signal.z_score);
    assert_eq!(signal.signal, Signal::Sell);
}

#[test]
fn when_the_window_is_flat_the_z_score_is_zero_and_the_call_is_hold() {
    // Given: A window with no spread at all
    let window = window_of(&[42.0; 20]);

    // When: A very different value is normalized
    let signal = SignalNormalizer::new().normalize(1_000.0, &window, 1.0);

    // Then: No division by zero leaks out
    assert_eq!(signal.z_score, 0.0);
    assert_eq!(signal.capped_z_score, 0.0);
    assert_eq!(signal.signal, Signal::Hold);
}

#[test]
fn when_values_are_extreme_the_capped_z_score_stays_within_the_cap() {
    // Given: An ordinary window
    let window = window_of(&[1.0, 2.0, 3.0, 2.0, 1.0, 2.0]);

    for raw in [-1e12, -1e6, -50.0, 0.0, 50.0, 1e6, 1e12] {
        // When: Extreme raw values are normalized
        let signal = SignalNormalizer::new().normalize(raw, &window, 1.0);

        // Then: The cap holds and the raw z is kept for inspection
        assert!(signal.capped_z_score.abs() <= signal.max_std_dev);
        assert!(signal.z_score.is_finite());
    }
}

#[test]
fn when_confidence_is_below_the_floor_every_call_is_hold() {
    // Given: Any window
    let window = window_of(&[10.0, 12.0, 11.0, 13.0, 12.0]);

    // When: Normalizing extreme values at confidence 0.2
    for raw in [-500.0, 500.0] {
        let signal = SignalNormalizer::new().normalize(raw, &window, 0.2);

        // Then: The signal is always HOLD
        assert_eq!(signal.signal, Signal::Hold);
    }
}

// =============================================================================
// Engine: Signals from stored history
// =============================================================================

#[test]
fn when_an_economic_series_jumps_the_engine_flags_it() {
    // Given: Four years of a steady monthly series, then a jump
    let store = Arc::new(InMemoryObservationStore::new());
    let mut values: Vec<f64> = (0..48).map(|index| 4.0 + f64::from(index % 4) * 0.05).collect();
    values.push(5.5);
    seed(&store, "UNRATE", &values);
    let unrate = Instrument::parse("UNRATE", AssetClass::EconomicMonthly).expect("instrument");
    let engine = engine_with(store, vec![unrate.clone()]);

    // When: The level signal is requested
    let signal = engine
        .normalized_signal(&unrate, IndicatorKind::Level)
        .expect("store readable")
        .expect("enough history");

    // Then: The jump is scored against the prior releases and capped at 3
    assert_eq!(signal.raw_value, 5.5);
    assert_eq!(signal.sample_size, 36);
    assert_eq!(signal.capped_z_score, 3.0);
    assert_eq!(signal.signal, Signal::Sell);
}

#[test]
fn when_history_is_thin_the_same_jump_is_only_a_hold() {
    // Given: Only five releases of the same series
    let store = Arc::new(InMemoryObservationStore::new());
    seed(&store, "UNRATE", &[4.0, 4.05, 4.1, 4.0, 5.5]);
    let unrate = Instrument::parse("UNRATE", AssetClass::EconomicMonthly).expect("instrument");
    let engine = engine_with(store, vec![unrate.clone()]);

    // When: The level signal is requested
    let signal = engine
        .normalized_signal(&unrate, IndicatorKind::Level)
        .expect("store readable")
        .expect("enough history");

    // Then: Low confidence suppresses the call
    assert!(signal.confidence < 0.3);
    assert!(signal.capped_z_score > 2.0);
    assert_eq!(signal.signal, Signal::Hold);
}

#[test]
fn when_there_is_no_history_there_is_no_signal_rather_than_a_made_up_one() {
    // Given: An empty store
    let store = Arc::new(InMemoryObservationStore::new());
    let spy = Instrument::parse("SPY", AssetClass::Etf).expect("instrument");
    let engine = engine_with(store, vec![spy.clone()]);

    // When / Then: Every priced indicator is absent
    for indicator in IndicatorKind::for_class(spy.asset_class()) {
        assert_eq!(engine.normalized_signal(&spy, *indicator).expect("readable"), None);
    }
}

#[test]
fn when_serialized_signals_use_uppercase_calls() {
    // Given: A SELL signal
    let window = window_of(&[10.0, 12.0, 11.0, 13.0, 12.0]);
    let signal = SignalNormalizer::new().normalize(15.0, &window, 0.9);

    // When: It is serialized
    let value = serde_json::to_value(&signal).expect("serialize");

    // Then: Field names are snake_case and the call is uppercase
    assert_eq!(value["signal"], "SELL");
    assert_eq!(value["indicator"], "rsi");
    assert_eq!(value["instrument"], "SPY");
    assert!(value["capped_z_score"].is_number());
}
