use thiserror::Error;

use finsight_warehouse::WarehouseError;

/// Validation and contract errors exposed by `finsight-core`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("instrument id cannot be empty")]
    EmptyInstrumentId,
    #[error("instrument id length {len} exceeds max {max}")]
    InstrumentIdTooLong { len: usize, max: usize },
    #[error("instrument id must start with an ASCII letter or '^': '{ch}'")]
    InstrumentIdInvalidStart { ch: char },
    #[error("instrument id contains invalid character '{ch}' at index {index}")]
    InstrumentIdInvalidChar { ch: char, index: usize },

    #[error(
        "invalid asset class '{value}', expected one of equity, etf, economic_monthly, economic_quarterly"
    )]
    InvalidAssetClass { value: String },
    #[error("instrument must be written as ID:asset_class, got '{value}'")]
    InvalidInstrumentSpec { value: String },

    #[error("invalid indicator '{value}', expected one of level, rsi, macd, bollinger_b, ma_gap")]
    InvalidIndicator { value: String },

    #[error("date must be YYYY-MM-DD: '{value}'")]
    InvalidDate { value: String },
    #[error("timestamp must be RFC3339: '{value}'")]
    InvalidTimestamp { value: String },

    #[error("invalid completion status '{value}', expected one of complete, partial, failed")]
    InvalidCompletionStatus { value: String },
    #[error("run id must be a UUID: '{value}'")]
    InvalidRunId { value: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },

    #[error("window capacity must be at least 2")]
    WindowTooSmall,
}

/// Errors raised by an `ObservationStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error("stored record is corrupt: {0}")]
    Corrupt(#[from] ValidationError),
}

/// Run-level engine failures.
///
/// Per-instrument problems never show up here; they are recorded on the
/// instrument's own `BackfillResult` or folded into a low-confidence signal.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("instrument '{0}' is not tracked")]
    UnknownInstrument(String),

    #[error("no history provider configured, backfill is unavailable")]
    NoProvider,

    #[error("backfill run failed for every planned instrument ({attempted} attempted)")]
    BackfillRunFailed { attempted: usize },

    #[error("snapshot refresh failed: {0}")]
    Refresh(String),
}
