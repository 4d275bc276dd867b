//! # Finsight Core
//!
//! Historical data sufficiency and statistical normalization engine.
//!
//! ## Overview
//!
//! For every tracked instrument the engine answers two questions: is there
//! enough stored history to trust an indicator computed from it, and how
//! extreme is the latest reading relative to its own trailing window.
//!
//! - **Sufficiency reports** grade stored history per asset class
//! - **Budgeted backfill** closes the worst gaps first without exceeding the
//!   provider's per-minute and per-day call limits
//! - **Normalized signals** turn raw indicator values into capped Z-scores and
//!   confidence-gated BUY/SELL/HOLD calls
//! - **Unified snapshot** publishes one consistent set of outputs per refresh
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`backfill`] | Budgeted, paced history fetch for one instrument |
//! | [`cache`] | Snapshot coordinator with freshness state machine |
//! | [`clock`] | Injectable time source |
//! | [`config`] | Engine tunables and `FINSIGHT_*` overlay |
//! | [`domain`] | Instruments, asset classes, observations |
//! | [`economic`] | Release metrics for economic series |
//! | [`engine`] | Composition root and public facade |
//! | [`error`] | Error types |
//! | [`indicators`] | RSI, MACD, Bollinger %B, MA gap, raw level |
//! | [`normalizer`] | Z-scores, outlier caps, signals |
//! | [`pipeline`] | Store to signals, per instrument |
//! | [`planner`] | Worst-gap-first backfill planning |
//! | [`provider`] | History provider contract |
//! | [`rate_budget`] | Rolling per-minute and per-day call allowance |
//! | [`rolling`] | Trailing-window statistics |
//! | [`store`] | Observation store contract and implementations |
//! | [`sufficiency`] | Confidence and reliability tiers |
//! | [`throttling`] | Inter-call pacing |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use finsight_core::{AssetClass, Engine, EngineConfig, Instrument, InMemoryHistoryProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let spy = Instrument::parse("SPY", AssetClass::Etf)?;
//!     let engine = Engine::builder(EngineConfig::from_env())
//!         .instruments([spy.clone()])
//!         .provider(Arc::new(InMemoryHistoryProvider::new()))
//!         .build();
//!
//!     let report = engine.sufficiency_report(&spy)?;
//!     println!("{} is {}", spy, report.tier);
//!
//!     let results = engine.run_backfill(&[spy], 252).await?;
//!     println!("{} instruments backfilled", results.len());
//!
//!     let snapshot = engine.unified_snapshot().await;
//!     println!("snapshot is {}", snapshot.freshness);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌──────────────────┐
//! │  Engine facade  │────▶│ Cache coordinator│
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Planner         │     │ Signal pipeline  │
//! │ Executor        │     │ (indicators,     │
//! │ (RateBudget,    │     │  rolling stats,  │
//! │  CallPacer)     │     │  normalizer)     │
//! └────────┬────────┘     └────────┬─────────┘
//!          │                       │
//!          ▼                       ▼
//! ┌──────────────────────────────────────────┐
//! │ ObservationStore (in-memory / DuckDB)    │
//! └──────────────────────────────────────────┘
//! ```
//!
//! ## Error Handling
//!
//! Per-instrument failures never abort a run: they land on the instrument's
//! [`BackfillResult`]. Only run-level problems surface as [`EngineError`]:
//!
//! ```rust
//! use finsight_core::EngineError;
//!
//! fn describe(error: &EngineError) -> &'static str {
//!     match error {
//!         EngineError::BackfillRunFailed { .. } => "every instrument failed",
//!         EngineError::NoProvider => "backfill not configured",
//!         _ => "other",
//!     }
//! }
//! ```

pub mod backfill;
pub mod cache;
pub mod clock;
pub mod config;
pub mod domain;
pub mod economic;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod normalizer;
pub mod pipeline;
pub mod planner;
pub mod provider;
pub mod rate_budget;
pub mod rolling;
pub mod store;
pub mod sufficiency;
pub mod throttling;

// Re-export commonly used types at crate root for convenience

// Backfill
pub use backfill::{quality_score, BackfillExecutor, BackfillResult, CompletionStatus};
pub use planner::{BackfillConfig, BackfillPlanner};

// Snapshot cache
pub use cache::{
    Freshness, FreshnessPolicy, IndicatorSnapshot, InstrumentSnapshot, RefreshOutcome, Snapshot,
    SnapshotSource, SnapshotView, UnifiedCacheCoordinator,
};
pub use pipeline::SignalPipeline;

// Clock and configuration
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;

// Domain models
pub use domain::{
    format_date, parse_date, AssetClass, DateRange, Instrument, InstrumentId, Observation,
};

// Engine facade
pub use engine::{Engine, EngineBuilder};

// Errors
pub use error::{EngineError, StoreError, ValidationError};

// Indicators and statistics
pub use economic::{economic_metrics, next_release, EconomicMetrics};
pub use indicators::{compute_series, DatedReading, IndicatorKind, IndicatorReading};
pub use normalizer::{max_std_dev_for, threshold_for, z_score, NormalizedSignal, Signal, SignalNormalizer};
pub use rolling::{RollingStatistics, RollingWindow};
pub use sufficiency::{
    confidence_for, RecencyBoost, ReliabilityTier, SufficiencyAssessor, SufficiencyReport,
};

// Provider contract
pub use provider::{
    HistoryProvider, HistoryRequest, InMemoryHistoryProvider, SourceError, SourceErrorKind,
};

// Rate limiting
pub use rate_budget::{RateBudget, RateLimits};
pub use throttling::CallPacer;

// Storage
pub use store::{BackfillAuditEntry, InMemoryObservationStore, ObservationStore};
