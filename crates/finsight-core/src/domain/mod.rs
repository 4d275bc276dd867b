//! # Domain Models
//!
//! Canonical domain types for the sufficiency engine.
//!
//! | Type | Description |
//! |------|-------------|
//! | [`InstrumentId`] | Validated ticker or economic series id |
//! | [`AssetClass`] | Class tag that fixes the required history length |
//! | [`Instrument`] | Id plus asset class |
//! | [`Observation`] | One dated value, optionally with OHLCV fields |
//! | [`DateRange`] | First and last stored date for an instrument |
//!
//! All types validate on construction; a value that exists is a value that
//! can be stored.

mod instrument;
mod observation;

pub use instrument::{AssetClass, Instrument, InstrumentId};
pub use observation::{format_date, parse_date, DateRange, Observation};
