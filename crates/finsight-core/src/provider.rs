use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

use time::Date;

use crate::domain::{InstrumentId, Observation};

/// Provider failure classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    Unavailable,
    RateLimited,
    InvalidRequest,
    NotFound,
    Timeout,
}

/// Structured provider error. Always handled per instrument by the
/// backfill executor and never escalated on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    kind: SourceErrorKind,
    message: String,
    retryable: bool,
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::Unavailable,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::RateLimited,
            message: message.into(),
            retryable: true,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: SourceErrorKind::InvalidRequest,
            message: message.into(),
            retryable: false,
        }
    }

    pub fn not_found(instrument: &InstrumentId) -> Self {
        Self {
            kind: SourceErrorKind::NotFound,
            message: format!("no history available for '{instrument}'"),
            retryable: false,
        }
    }

    pub fn timeout(after_ms: u128) -> Self {
        Self {
            kind: SourceErrorKind::Timeout,
            message: format!("history fetch timed out after {after_ms}ms"),
            retryable: true,
        }
    }

    pub const fn kind(&self) -> SourceErrorKind {
        self.kind
    }

    /// Whether a later run may succeed where this one failed.
    pub const fn retryable(&self) -> bool {
        self.retryable
    }

    pub const fn code(&self) -> &'static str {
        match self.kind {
            SourceErrorKind::Unavailable => "provider.unavailable",
            SourceErrorKind::RateLimited => "provider.rate_limited",
            SourceErrorKind::InvalidRequest => "provider.invalid_request",
            SourceErrorKind::NotFound => "provider.not_found",
            SourceErrorKind::Timeout => "provider.timeout",
        }
    }
}

impl Display for SourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code())
    }
}

impl std::error::Error for SourceError {}

/// One page of history, walking backwards in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRequest {
    pub instrument: InstrumentId,
    /// Only observations strictly before this date. `None` means up to the
    /// most recent one.
    pub before: Option<Date>,
    pub limit: usize,
}

impl HistoryRequest {
    pub fn new(
        instrument: InstrumentId,
        before: Option<Date>,
        limit: usize,
    ) -> Result<Self, SourceError> {
        if limit == 0 {
            return Err(SourceError::invalid_request(
                "history request limit must be greater than zero",
            ));
        }
        Ok(Self {
            instrument,
            before,
            limit,
        })
    }
}

/// External source of historical observations.
///
/// Callers must reserve rate budget before every call.
pub trait HistoryProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Returns at most `limit` observations dated before `before`, newest
    /// page first. Order inside the page is not significant. An empty page
    /// means there is no older history.
    fn fetch_history<'a>(
        &'a self,
        request: &'a HistoryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Observation>, SourceError>> + Send + 'a>>;
}

/// Provider serving a fixed set of observations from memory.
///
/// Failures can be scripted per instrument. Every call is counted.
#[derive(Debug, Default)]
pub struct InMemoryHistoryProvider {
    series: RwLock<HashMap<InstrumentId, BTreeMap<Date, Observation>>>,
    failures: RwLock<HashMap<InstrumentId, SourceError>>,
    calls: AtomicUsize,
}

impl InMemoryHistoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observations(observations: impl IntoIterator<Item = Observation>) -> Self {
        let provider = Self::new();
        provider.extend(observations);
        provider
    }

    pub fn extend(&self, observations: impl IntoIterator<Item = Observation>) {
        let mut series = self
            .series
            .write()
            .expect("provider series lock should not be poisoned");
        for observation in observations {
            series
                .entry(observation.instrument.clone())
                .or_default()
                .insert(observation.date, observation);
        }
    }

    /// Every subsequent fetch for `instrument` fails with `error`.
    pub fn fail_with(&self, instrument: InstrumentId, error: SourceError) {
        self.failures
            .write()
            .expect("provider failure lock should not be poisoned")
            .insert(instrument, error);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn instruments(&self) -> Vec<InstrumentId> {
        let mut ids: Vec<InstrumentId> = self
            .series
            .read()
            .expect("provider series lock should not be poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn page(&self, request: &HistoryRequest) -> Result<Vec<Observation>, SourceError> {
        if let Some(error) = self
            .failures
            .read()
            .expect("provider failure lock should not be poisoned")
            .get(&request.instrument)
        {
            return Err(error.clone());
        }

        let series = self
            .series
            .read()
            .expect("provider series lock should not be poisoned");
        let Some(dates) = series.get(&request.instrument) else {
            return Err(SourceError::not_found(&request.instrument));
        };
        let page = match request.before {
            Some(before) => dates
                .range(..before)
                .rev()
                .take(request.limit)
                .map(|(_, obs)| obs.clone())
                .collect(),
            None => dates
                .values()
                .rev()
                .take(request.limit)
                .cloned()
                .collect(),
        };
        Ok(page)
    }
}

impl HistoryProvider for InMemoryHistoryProvider {
    fn name(&self) -> &str {
        "memory"
    }

    fn fetch_history<'a>(
        &'a self,
        request: &'a HistoryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Observation>, SourceError>> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.page(request)
        })
    }
}
