use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::Date;
use tracing::{debug, info, warn};

use crate::domain::{InstrumentId, Observation};
use crate::error::ValidationError;
use crate::planner::BackfillConfig;
use crate::provider::{HistoryProvider, HistoryRequest, SourceError, SourceErrorKind};
use crate::rate_budget::RateBudget;
use crate::store::ObservationStore;
use crate::throttling::CallPacer;

/// Outcome bucket of one instrument's backfill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    Complete,
    Partial,
    Failed,
}

impl CompletionStatus {
    /// Complete at 90% of the gap filled, partial at 50%.
    pub fn from_quality(quality_score: f64) -> Self {
        if quality_score >= 0.9 {
            Self::Complete
        } else if quality_score >= 0.5 {
            Self::Partial
        } else {
            Self::Failed
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

impl Display for CompletionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompletionStatus {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "complete" => Ok(Self::Complete),
            "partial" => Ok(Self::Partial),
            "failed" => Ok(Self::Failed),
            other => Err(ValidationError::InvalidCompletionStatus {
                value: other.to_owned(),
            }),
        }
    }
}

/// Outcome of backfilling one instrument. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillResult {
    pub instrument: InstrumentId,
    pub records_added: usize,
    pub api_calls_used: u32,
    pub remaining_gap: usize,
    pub quality_score: f64,
    pub status: CompletionStatus,
    pub errors: Vec<String>,
    /// Stopped early because the rate budget, or the provider itself,
    /// refused the next call.
    pub deferred: bool,
    /// The remaining gap can be retried on a later run: the instrument was
    /// deferred or stopped on a transient provider failure.
    #[serde(default)]
    pub retryable: bool,
}

impl BackfillResult {
    fn nothing_to_do(instrument: InstrumentId) -> Self {
        Self {
            instrument,
            records_added: 0,
            api_calls_used: 0,
            remaining_gap: 0,
            quality_score: 1.0,
            status: CompletionStatus::Complete,
            errors: Vec::new(),
            deferred: false,
            retryable: false,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Share of the gap that was filled, in `[0, 1]`. A zero gap counts as
/// fully filled.
pub fn quality_score(records_added: usize, gap: usize) -> f64 {
    if gap == 0 {
        return 1.0;
    }
    (records_added as f64 / gap as f64).min(1.0)
}

/// Fetches history for one instrument at a time.
///
/// Every provider call waits for the pacer and is then reserved against the
/// shared [`RateBudget`]; a denial ends the instrument's loop immediately.
/// One pacer spans every config the executor runs, so the first call of the
/// next instrument still waits out the delay after the previous one.
/// Provider errors and timeouts are recorded on the result and never
/// propagate.
#[derive(Clone)]
pub struct BackfillExecutor {
    store: Arc<dyn ObservationStore>,
    provider: Arc<dyn HistoryProvider>,
    budget: Arc<RateBudget>,
    fetch_timeout: Duration,
    pacer: CallPacer,
}

impl BackfillExecutor {
    pub fn new(
        store: Arc<dyn ObservationStore>,
        provider: Arc<dyn HistoryProvider>,
        budget: Arc<RateBudget>,
    ) -> Self {
        Self {
            store,
            provider,
            budget,
            fetch_timeout: Duration::from_secs(30),
            pacer: CallPacer::unpaced(),
        }
    }

    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }

    pub fn with_pacer(mut self, pacer: CallPacer) -> Self {
        self.pacer = pacer;
        self
    }

    pub fn budget(&self) -> &Arc<RateBudget> {
        &self.budget
    }

    pub async fn execute(&self, config: &BackfillConfig) -> BackfillResult {
        let id = config.instrument.id();
        let existing = match self.store.count(id) {
            Ok(count) => count,
            Err(error) => return store_failure(id, config.target_days, &error),
        };

        let gap = config.target_days.saturating_sub(existing);
        if gap == 0 {
            debug!(instrument = %id, existing, "no gap to fill");
            return BackfillResult::nothing_to_do(id.clone());
        }

        let mut cursor: Option<Date> = match self.store.date_range(id) {
            Ok(range) => range.map(|range| range.first),
            Err(error) => return store_failure(id, gap, &error),
        };

        let mut records_added = 0usize;
        let mut api_calls_used = 0u32;
        let mut errors = Vec::new();
        let mut deferred = false;
        let mut retryable = false;

        while records_added < gap && api_calls_used < config.max_api_calls {
            self.pacer.pace().await;
            if !self.budget.try_consume(1) {
                deferred = true;
                info!(
                    instrument = %id,
                    retry_in_secs = self.budget.time_until_next_slot().as_secs(),
                    "rate budget spent, deferring remaining backfill"
                );
                break;
            }
            api_calls_used += 1;

            let batch = match self.fetch_page(id, cursor, config.batch_size).await {
                Ok(batch) => batch,
                Err(error) if error.kind() == SourceErrorKind::RateLimited => {
                    deferred = true;
                    info!(
                        instrument = %id,
                        %error,
                        "provider is throttling, deferring remaining backfill"
                    );
                    break;
                }
                Err(error) => {
                    warn!(instrument = %id, code = error.code(), %error, "history fetch failed");
                    retryable = error.retryable();
                    errors.push(error.to_string());
                    break;
                }
            };
            if batch.is_empty() {
                debug!(instrument = %id, "provider has no older history");
                break;
            }

            let earliest = batch.iter().map(|observation| observation.date).min();
            match self.store.insert_batch_if_absent(&batch) {
                Ok(inserted) => records_added += inserted,
                Err(error) => {
                    warn!(instrument = %id, %error, "storing backfilled history failed");
                    errors.push(format!("store: {error}"));
                    break;
                }
            }

            match earliest {
                Some(date) if cursor.map_or(true, |current| date < current) => cursor = Some(date),
                _ => break,
            }
        }

        let quality = quality_score(records_added, gap);
        let status = CompletionStatus::from_quality(quality);
        info!(
            instrument = %id,
            records_added,
            api_calls_used,
            gap,
            status = status.as_str(),
            "backfill finished"
        );

        BackfillResult {
            instrument: id.clone(),
            records_added,
            api_calls_used,
            remaining_gap: gap.saturating_sub(records_added),
            quality_score: quality,
            status,
            errors,
            deferred,
            retryable: retryable || deferred,
        }
    }

    /// One page strictly older than `cursor`, restricted to `id`.
    async fn fetch_page(
        &self,
        id: &InstrumentId,
        cursor: Option<Date>,
        batch_size: usize,
    ) -> Result<Vec<Observation>, SourceError> {
        let request = HistoryRequest::new(id.clone(), cursor, batch_size)?;
        let fetched =
            match tokio::time::timeout(self.fetch_timeout, self.provider.fetch_history(&request))
                .await
            {
                Ok(result) => result?,
                Err(_) => return Err(SourceError::timeout(self.fetch_timeout.as_millis())),
            };

        Ok(fetched
            .into_iter()
            .filter(|observation| &observation.instrument == id)
            .filter(|observation| cursor.map_or(true, |before| observation.date < before))
            .take(batch_size)
            .collect())
    }
}

fn store_failure(id: &InstrumentId, gap: usize, error: &dyn std::error::Error) -> BackfillResult {
    warn!(instrument = %id, %error, "observation store unavailable");
    BackfillResult {
        instrument: id.clone(),
        records_added: 0,
        api_calls_used: 0,
        remaining_gap: gap,
        quality_score: quality_score(0, gap),
        status: CompletionStatus::from_quality(quality_score(0, gap)),
        errors: vec![format!("store: {error}")],
        deferred: false,
        retryable: false,
    }
}
