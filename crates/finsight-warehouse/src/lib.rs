//! # Finsight Warehouse
//!
//! DuckDB-backed persistence for historical observations and the backfill
//! audit trail.
//!
//! ## Overview
//!
//! The warehouse is deliberately dumb: it stores plain records keyed by
//! `(instrument, date)` and never overwrites an existing observation. Domain
//! validation and sufficiency logic live in `finsight-core`, which adapts
//! this crate to its `ObservationStore` contract.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use finsight_warehouse::{ObservationRecord, Warehouse};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open_default()?;
//!
//!     let inserted = warehouse.insert_observations(&[ObservationRecord {
//!         instrument: "SPY".to_string(),
//!         date: "2025-07-01".to_string(),
//!         value: 545.2,
//!         open: None,
//!         high: None,
//!         low: None,
//!         volume: None,
//!     }])?;
//!
//!     println!("inserted {inserted} new rows");
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `observations` | One row per `(instrument, date)`, insert-if-absent |
//! | `backfill_log` | One row per instrument per backfill run |
//! | `schema_migrations` | Applied migration versions |

pub mod migrations;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::{Connection, ToSql};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Audit payload could not be encoded or decoded.
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    /// A record was rejected before reaching the database.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for finsight data.
    pub finsight_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let finsight_home = resolve_finsight_home();
        let db_path = finsight_home.join("warehouse.duckdb");
        Self {
            finsight_home,
            db_path,
        }
    }
}

impl WarehouseConfig {
    /// Configuration rooted at an explicit directory.
    pub fn at(finsight_home: impl Into<PathBuf>) -> Self {
        let finsight_home = finsight_home.into();
        let db_path = finsight_home.join("warehouse.duckdb");
        Self {
            finsight_home,
            db_path,
        }
    }
}

/// A single dated observation as stored in the `observations` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationRecord {
    /// Instrument identifier (ticker or series id).
    pub instrument: String,
    /// Observation date as `YYYY-MM-DD`.
    pub date: String,
    /// Primary value (close for priced instruments, reading for series).
    pub value: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<u64>,
}

/// One row of the backfill audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillLogRecord {
    pub run_id: String,
    pub instrument: String,
    pub records_added: u64,
    pub api_calls_used: u32,
    pub remaining_gap: u64,
    pub quality_score: f64,
    pub status: String,
    pub errors: Vec<String>,
    /// The run stopped early because the rate budget was spent.
    pub deferred: bool,
    /// A later run may close the remaining gap.
    #[serde(default)]
    pub retryable: bool,
    /// RFC3339 timestamp of when the result was produced.
    pub recorded_at: String,
}

/// The main warehouse handle.
///
/// DuckDB connections are not `Sync`, so a single connection is shared behind
/// a mutex. Every public operation holds the lock for its full duration, which
/// also serializes the check-then-insert sequence used for conflict handling.
#[derive(Clone)]
pub struct Warehouse {
    db_path: Option<PathBuf>,
    connection: Arc<Mutex<Connection>>,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let connection = Connection::open(config.db_path.as_path())?;
        Self::from_connection(Some(config.db_path), connection)
    }

    /// Open a throwaway in-memory warehouse.
    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        let connection = Connection::open_in_memory()?;
        Self::from_connection(None, connection)
    }

    fn from_connection(db_path: Option<PathBuf>, connection: Connection) -> Result<Self, WarehouseError> {
        connection.execute_batch("PRAGMA disable_progress_bar;")?;
        migrations::apply_migrations(&connection)?;
        Ok(Self {
            db_path,
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Path to the database file, `None` for in-memory warehouses.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Insert observations that are not already stored.
    ///
    /// Existing `(instrument, date)` rows are never overwritten. Returns the
    /// number of rows actually inserted. The batch is applied in one
    /// transaction.
    pub fn insert_observations(&self, rows: &[ObservationRecord]) -> Result<usize, WarehouseError> {
        if rows.is_empty() {
            return Ok(0);
        }
        for row in rows {
            validate_observation(row)?;
        }

        let connection = self.lock();
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<usize, WarehouseError> {
            let mut inserted = 0;
            for row in rows {
                let key: [&dyn ToSql; 2] = [&row.instrument, &row.date];
                let existing: i64 = connection.query_row(
                    "SELECT COUNT(*) FROM observations \
                     WHERE instrument = ? AND date = TRY_CAST(? AS DATE)",
                    key.as_slice(),
                    |r| r.get(0),
                )?;
                if existing > 0 {
                    continue;
                }

                let volume = row.volume.map(|volume| volume.min(i64::MAX as u64) as i64);
                let params: [&dyn ToSql; 7] = [
                    &row.instrument,
                    &row.date,
                    &row.value,
                    &row.open,
                    &row.high,
                    &row.low,
                    &volume,
                ];
                inserted += connection.execute(
                    "INSERT OR IGNORE INTO observations \
                     (instrument, date, value, open, high, low, volume, inserted_at) \
                     VALUES (?, TRY_CAST(? AS DATE), ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
                    params.as_slice(),
                )?;
            }
            Ok(inserted)
        })();

        finalize_transaction(&connection, result)
    }

    /// Total number of stored observations for an instrument.
    pub fn count_observations(&self, instrument: &str) -> Result<usize, WarehouseError> {
        let connection = self.lock();
        let params: [&dyn ToSql; 1] = [&instrument];
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM observations WHERE instrument = ?",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Number of observations dated on or after `since` (`YYYY-MM-DD`).
    pub fn count_observations_since(
        &self,
        instrument: &str,
        since: &str,
    ) -> Result<usize, WarehouseError> {
        let connection = self.lock();
        let params: [&dyn ToSql; 2] = [&instrument, &since];
        let count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM observations \
             WHERE instrument = ? AND date >= TRY_CAST(? AS DATE)",
            params.as_slice(),
            |row| row.get(0),
        )?;
        Ok(count.max(0) as usize)
    }

    /// Earliest and latest stored dates for an instrument.
    pub fn observation_date_range(
        &self,
        instrument: &str,
    ) -> Result<Option<(String, String)>, WarehouseError> {
        let connection = self.lock();
        let params: [&dyn ToSql; 1] = [&instrument];
        let (first, last): (Option<String>, Option<String>) = connection.query_row(
            "SELECT CAST(MIN(date) AS VARCHAR), CAST(MAX(date) AS VARCHAR) \
             FROM observations WHERE instrument = ?",
            params.as_slice(),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok(first.zip(last))
    }

    /// The most recent `limit` observations, returned oldest first.
    pub fn recent_observations(
        &self,
        instrument: &str,
        limit: usize,
    ) -> Result<Vec<ObservationRecord>, WarehouseError> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let connection = self.lock();
        let limit = limit.min(i64::MAX as usize) as i64;
        let params: [&dyn ToSql; 2] = [&instrument, &limit];
        let mut statement = connection.prepare(
            "SELECT instrument, CAST(date AS VARCHAR), value, open, high, low, volume \
             FROM observations WHERE instrument = ? ORDER BY date DESC LIMIT ?",
        )?;
        let mut rows = statement.query(params.as_slice())?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let volume: Option<i64> = row.get(6)?;
            records.push(ObservationRecord {
                instrument: row.get(0)?,
                date: row.get(1)?,
                value: row.get(2)?,
                open: row.get(3)?,
                high: row.get(4)?,
                low: row.get(5)?,
                volume: volume.and_then(|volume| u64::try_from(volume).ok()),
            });
        }
        records.reverse();
        Ok(records)
    }

    /// Append one row to the backfill audit trail.
    ///
    /// Rows are keyed by `(run_id, instrument)`; a duplicate append is ignored
    /// so an audit row is never mutated after creation.
    pub fn append_backfill_log(&self, record: &BackfillLogRecord) -> Result<(), WarehouseError> {
        let errors = serde_json::to_string(&record.errors)?;
        let records_added = record.records_added.min(i64::MAX as u64) as i64;
        let api_calls_used = i64::from(record.api_calls_used);
        let remaining_gap = record.remaining_gap.min(i64::MAX as u64) as i64;

        // seq is assigned under the connection lock, so it follows append order
        let connection = self.lock();
        let params: [&dyn ToSql; 11] = [
            &record.run_id,
            &record.instrument,
            &records_added,
            &api_calls_used,
            &remaining_gap,
            &record.quality_score,
            &record.status,
            &errors,
            &record.deferred,
            &record.retryable,
            &record.recorded_at,
        ];
        connection.execute(
            "INSERT OR IGNORE INTO backfill_log \
             (run_id, instrument, records_added, api_calls_used, remaining_gap, \
              quality_score, status, errors, deferred, retryable, recorded_at, seq) \
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                    (SELECT COALESCE(MAX(seq), 0) + 1 FROM backfill_log)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Audit rows for one instrument (or all instruments), in append order.
    pub fn backfill_log(
        &self,
        instrument: Option<&str>,
    ) -> Result<Vec<BackfillLogRecord>, WarehouseError> {
        const COLUMNS: &str = "SELECT run_id, instrument, records_added, api_calls_used, \
                               remaining_gap, quality_score, status, errors, deferred, \
                               COALESCE(retryable, FALSE), recorded_at FROM backfill_log";
        const ORDER: &str = "ORDER BY COALESCE(seq, 0), recorded_at, instrument";

        let connection = self.lock();
        let (sql, params): (String, Vec<&dyn ToSql>) = match &instrument {
            Some(instrument) => (
                format!("{COLUMNS} WHERE instrument = ? {ORDER}"),
                vec![instrument as &dyn ToSql],
            ),
            None => (format!("{COLUMNS} {ORDER}"), Vec::new()),
        };
        let mut statement = connection.prepare(sql.as_str())?;
        let mut rows = statement.query(params.as_slice())?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            let records_added: i64 = row.get(2)?;
            let api_calls_used: i64 = row.get(3)?;
            let remaining_gap: i64 = row.get(4)?;
            let errors: String = row.get(7)?;
            records.push(BackfillLogRecord {
                run_id: row.get(0)?,
                instrument: row.get(1)?,
                records_added: records_added.max(0) as u64,
                api_calls_used: u32::try_from(api_calls_used.max(0)).unwrap_or(u32::MAX),
                remaining_gap: remaining_gap.max(0) as u64,
                quality_score: row.get(5)?,
                status: row.get(6)?,
                errors: serde_json::from_str(errors.as_str())?,
                deferred: row.get(8)?,
                retryable: row.get(9)?,
                recorded_at: row.get(10)?,
            });
        }
        Ok(records)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.connection
            .lock()
            .expect("warehouse connection mutex poisoned")
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

fn validate_observation(row: &ObservationRecord) -> Result<(), WarehouseError> {
    if row.instrument.trim().is_empty() {
        return Err(WarehouseError::InvalidRecord(String::from(
            "instrument must not be empty",
        )));
    }
    if !is_iso_date(row.date.as_str()) {
        return Err(WarehouseError::InvalidRecord(format!(
            "date must be YYYY-MM-DD: '{}'",
            row.date
        )));
    }
    if !row.value.is_finite() {
        return Err(WarehouseError::InvalidRecord(format!(
            "value for {} on {} must be finite",
            row.instrument, row.date
        )));
    }
    Ok(())
}

fn is_iso_date(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(index, byte)| index == 4 || index == 7 || byte.is_ascii_digit())
}

/// Resolve the finsight home directory from environment or default.
fn resolve_finsight_home() -> PathBuf {
    if let Some(path) = env::var_os("FINSIGHT_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".finsight");
    }

    PathBuf::from(".finsight")
}
