//! Observation persistence contract and its two implementations.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Date, OffsetDateTime, UtcOffset};
use uuid::Uuid;

use finsight_warehouse::{BackfillLogRecord, ObservationRecord, Warehouse};

use crate::backfill::{BackfillResult, CompletionStatus};
use crate::domain::{format_date, parse_date, DateRange, InstrumentId, Observation};
use crate::error::{StoreError, ValidationError};

/// One audit-trail row: the result of one instrument in one backfill run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillAuditEntry {
    pub run_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: OffsetDateTime,
    pub result: BackfillResult,
}

/// Append-only repository of historical observations keyed by
/// `(instrument, date)`.
///
/// Inserts never overwrite: when a date is already stored the existing row
/// wins and the insert is a no-op, so every write is safe to retry.
pub trait ObservationStore: Send + Sync {
    /// Returns the number of observations that were actually new.
    fn insert_batch_if_absent(&self, observations: &[Observation]) -> Result<usize, StoreError>;

    /// Returns `true` when the observation was new.
    fn insert_if_absent(&self, observation: &Observation) -> Result<bool, StoreError> {
        Ok(self.insert_batch_if_absent(std::slice::from_ref(observation))? == 1)
    }

    fn count(&self, instrument: &InstrumentId) -> Result<usize, StoreError>;

    /// Observations dated on or after `since`.
    fn count_since(&self, instrument: &InstrumentId, since: Date) -> Result<usize, StoreError>;

    fn date_range(&self, instrument: &InstrumentId) -> Result<Option<DateRange>, StoreError>;

    /// The latest `limit` observations, oldest first.
    fn recent(&self, instrument: &InstrumentId, limit: usize)
        -> Result<Vec<Observation>, StoreError>;

    /// Appends an audit entry. A second entry for the same run and
    /// instrument is ignored.
    fn record_backfill(&self, entry: &BackfillAuditEntry) -> Result<(), StoreError>;

    /// Audit entries for one instrument, or for all when `None`, in
    /// recording order.
    fn backfill_history(
        &self,
        instrument: Option<&InstrumentId>,
    ) -> Result<Vec<BackfillAuditEntry>, StoreError>;

    /// Provider calls the audit trail records for the UTC calendar day `day`.
    fn api_calls_recorded_on(&self, day: Date) -> Result<u32, StoreError> {
        Ok(self
            .backfill_history(None)?
            .iter()
            .filter(|entry| entry.recorded_at.to_offset(UtcOffset::UTC).date() == day)
            .fold(0u32, |acc, entry| acc.saturating_add(entry.result.api_calls_used)))
    }
}

/// Process-local store used by tests and short-lived tools.
#[derive(Debug, Default)]
pub struct InMemoryObservationStore {
    series: RwLock<HashMap<InstrumentId, BTreeMap<Date, Observation>>>,
    audit: RwLock<Vec<BackfillAuditEntry>>,
}

impl InMemoryObservationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn series(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<InstrumentId, BTreeMap<Date, Observation>>> {
        self.series
            .read()
            .expect("observation store lock should not be poisoned")
    }
}

impl ObservationStore for InMemoryObservationStore {
    fn insert_batch_if_absent(&self, observations: &[Observation]) -> Result<usize, StoreError> {
        let mut series = self
            .series
            .write()
            .expect("observation store lock should not be poisoned");
        let mut inserted = 0;
        for observation in observations {
            let dates = series.entry(observation.instrument.clone()).or_default();
            if !dates.contains_key(&observation.date) {
                dates.insert(observation.date, observation.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    fn count(&self, instrument: &InstrumentId) -> Result<usize, StoreError> {
        Ok(self.series().get(instrument).map_or(0, BTreeMap::len))
    }

    fn count_since(&self, instrument: &InstrumentId, since: Date) -> Result<usize, StoreError> {
        Ok(self
            .series()
            .get(instrument)
            .map_or(0, |dates| dates.range(since..).count()))
    }

    fn date_range(&self, instrument: &InstrumentId) -> Result<Option<DateRange>, StoreError> {
        let series = self.series();
        let Some(dates) = series.get(instrument) else {
            return Ok(None);
        };
        Ok(dates
            .keys()
            .next()
            .zip(dates.keys().next_back())
            .map(|(first, last)| DateRange {
                first: *first,
                last: *last,
            }))
    }

    fn recent(
        &self,
        instrument: &InstrumentId,
        limit: usize,
    ) -> Result<Vec<Observation>, StoreError> {
        let series = self.series();
        let Some(dates) = series.get(instrument) else {
            return Ok(Vec::new());
        };
        let mut latest: Vec<Observation> = dates.values().rev().take(limit).cloned().collect();
        latest.reverse();
        Ok(latest)
    }

    fn record_backfill(&self, entry: &BackfillAuditEntry) -> Result<(), StoreError> {
        let mut audit = self
            .audit
            .write()
            .expect("audit trail lock should not be poisoned");
        let duplicate = audit.iter().any(|existing| {
            existing.run_id == entry.run_id && existing.result.instrument == entry.result.instrument
        });
        if !duplicate {
            audit.push(entry.clone());
        }
        Ok(())
    }

    fn backfill_history(
        &self,
        instrument: Option<&InstrumentId>,
    ) -> Result<Vec<BackfillAuditEntry>, StoreError> {
        let audit = self
            .audit
            .read()
            .expect("audit trail lock should not be poisoned");
        Ok(audit
            .iter()
            .filter(|entry| instrument.map_or(true, |id| &entry.result.instrument == id))
            .cloned()
            .collect())
    }
}

impl ObservationStore for Warehouse {
    fn insert_batch_if_absent(&self, observations: &[Observation]) -> Result<usize, StoreError> {
        let records: Vec<ObservationRecord> =
            observations.iter().map(ObservationRecord::from).collect();
        Ok(self.insert_observations(&records)?)
    }

    fn count(&self, instrument: &InstrumentId) -> Result<usize, StoreError> {
        Ok(self.count_observations(instrument.as_str())?)
    }

    fn count_since(&self, instrument: &InstrumentId, since: Date) -> Result<usize, StoreError> {
        Ok(self.count_observations_since(instrument.as_str(), format_date(since).as_str())?)
    }

    fn date_range(&self, instrument: &InstrumentId) -> Result<Option<DateRange>, StoreError> {
        let Some((first, last)) = self.observation_date_range(instrument.as_str())? else {
            return Ok(None);
        };
        Ok(Some(DateRange {
            first: parse_date(first.as_str())?,
            last: parse_date(last.as_str())?,
        }))
    }

    fn recent(
        &self,
        instrument: &InstrumentId,
        limit: usize,
    ) -> Result<Vec<Observation>, StoreError> {
        self.recent_observations(instrument.as_str(), limit)?
            .into_iter()
            .map(|record| Observation::try_from(record).map_err(StoreError::from))
            .collect()
    }

    fn record_backfill(&self, entry: &BackfillAuditEntry) -> Result<(), StoreError> {
        let record = BackfillLogRecord::try_from(entry)?;
        Ok(self.append_backfill_log(&record)?)
    }

    fn backfill_history(
        &self,
        instrument: Option<&InstrumentId>,
    ) -> Result<Vec<BackfillAuditEntry>, StoreError> {
        self.backfill_log(instrument.map(InstrumentId::as_str))?
            .into_iter()
            .map(|record| BackfillAuditEntry::try_from(record).map_err(StoreError::from))
            .collect()
    }
}

impl TryFrom<&BackfillAuditEntry> for BackfillLogRecord {
    type Error = ValidationError;

    fn try_from(entry: &BackfillAuditEntry) -> Result<Self, Self::Error> {
        let recorded_at =
            entry
                .recorded_at
                .format(&Rfc3339)
                .map_err(|_| ValidationError::InvalidTimestamp {
                    value: entry.recorded_at.to_string(),
                })?;
        let result = &entry.result;
        Ok(Self {
            run_id: entry.run_id.to_string(),
            instrument: result.instrument.as_str().to_owned(),
            records_added: result.records_added as u64,
            api_calls_used: result.api_calls_used,
            remaining_gap: result.remaining_gap as u64,
            quality_score: result.quality_score,
            status: result.status.as_str().to_owned(),
            errors: result.errors.clone(),
            deferred: result.deferred,
            retryable: result.retryable,
            recorded_at,
        })
    }
}

impl TryFrom<BackfillLogRecord> for BackfillAuditEntry {
    type Error = ValidationError;

    fn try_from(record: BackfillLogRecord) -> Result<Self, Self::Error> {
        let run_id = Uuid::parse_str(record.run_id.as_str()).map_err(|_| {
            ValidationError::InvalidRunId {
                value: record.run_id.clone(),
            }
        })?;
        let recorded_at = OffsetDateTime::parse(record.recorded_at.as_str(), &Rfc3339).map_err(
            |_| ValidationError::InvalidTimestamp {
                value: record.recorded_at.clone(),
            },
        )?;
        let status: CompletionStatus = record.status.parse()?;
        Ok(Self {
            run_id,
            recorded_at,
            result: BackfillResult {
                instrument: InstrumentId::parse(record.instrument.as_str())?,
                records_added: usize::try_from(record.records_added).unwrap_or(usize::MAX),
                api_calls_used: record.api_calls_used,
                remaining_gap: usize::try_from(record.remaining_gap).unwrap_or(usize::MAX),
                quality_score: record.quality_score,
                status,
                errors: record.errors,
                deferred: record.deferred,
                retryable: record.retryable,
            },
        })
    }
}
