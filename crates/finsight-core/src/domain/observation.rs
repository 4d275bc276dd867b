use serde::{Deserialize, Serialize};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::Date;

use finsight_warehouse::ObservationRecord;

use crate::{InstrumentId, ValidationError};

const ISO_DATE: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Result<Date, ValidationError> {
    Date::parse(value.trim(), ISO_DATE).map_err(|_| ValidationError::InvalidDate {
        value: value.to_owned(),
    })
}

/// Format a date as `YYYY-MM-DD`.
pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// One dated historical observation.
///
/// `value` is the close for priced instruments and the release reading for
/// economic series; it may be negative (e.g. a contracting GDP print).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub instrument: InstrumentId,
    pub date: Date,
    pub value: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<u64>,
}

impl Observation {
    pub fn new(instrument: InstrumentId, date: Date, value: f64) -> Result<Self, ValidationError> {
        validate_finite("value", value)?;
        Ok(Self {
            instrument,
            date,
            value,
            open: None,
            high: None,
            low: None,
            volume: None,
        })
    }

    /// Attach the optional OHLCV fields of a daily bar.
    pub fn with_bar(
        mut self,
        open: Option<f64>,
        high: Option<f64>,
        low: Option<f64>,
        volume: Option<u64>,
    ) -> Result<Self, ValidationError> {
        validate_optional_finite("open", open)?;
        validate_optional_finite("high", high)?;
        validate_optional_finite("low", low)?;
        self.open = open;
        self.high = high;
        self.low = low;
        self.volume = volume;
        Ok(self)
    }
}

impl From<&Observation> for ObservationRecord {
    fn from(value: &Observation) -> Self {
        Self {
            instrument: value.instrument.as_str().to_owned(),
            date: format_date(value.date),
            value: value.value,
            open: value.open,
            high: value.high,
            low: value.low,
            volume: value.volume,
        }
    }
}

impl TryFrom<ObservationRecord> for Observation {
    type Error = ValidationError;

    fn try_from(record: ObservationRecord) -> Result<Self, Self::Error> {
        let instrument = InstrumentId::parse(record.instrument.as_str())?;
        let date = parse_date(record.date.as_str())?;
        Observation::new(instrument, date, record.value)?.with_bar(
            record.open,
            record.high,
            record.low,
            record.volume,
        )
    }
}

/// Inclusive span of stored observation dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub first: Date,
    pub last: Date,
}

fn validate_finite(field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NonFiniteValue { field });
    }
    Ok(())
}

fn validate_optional_finite(field: &'static str, value: Option<f64>) -> Result<(), ValidationError> {
    if let Some(value) = value {
        validate_finite(field, value)?;
    }
    Ok(())
}
