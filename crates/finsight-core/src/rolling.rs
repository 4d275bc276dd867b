use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use time::Date;

use crate::domain::InstrumentId;
use crate::error::ValidationError;
use crate::indicators::IndicatorKind;

/// Read-only view of one trailing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollingWindow {
    pub instrument: InstrumentId,
    pub indicator: IndicatorKind,
    /// Oldest first.
    pub values: Vec<f64>,
    pub capacity: usize,
    pub mean: f64,
    /// Sample standard deviation (N - 1).
    pub standard_deviation: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone)]
struct WindowState {
    capacity: usize,
    values: VecDeque<f64>,
    mean: f64,
    m2: f64,
    watermark: Option<Date>,
    origin: Option<Date>,
}

impl WindowState {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            values: VecDeque::with_capacity(capacity),
            mean: 0.0,
            m2: 0.0,
            watermark: None,
            origin: None,
        }
    }

    fn push(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            if let Some(oldest) = self.values.pop_front() {
                self.remove(oldest);
            }
        }
        self.values.push_back(value);
        let n = self.values.len() as f64;
        let delta = value - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (value - self.mean);
    }

    /// Reverses the Welford step for a value that already left `values`.
    fn remove(&mut self, value: f64) {
        let n = self.values.len() as f64;
        if n == 0.0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let delta = value - self.mean;
        self.mean -= delta / n;
        self.m2 -= delta * (value - self.mean);
        self.m2 = self.m2.max(0.0);
    }

    fn standard_deviation(&self) -> f64 {
        let n = self.values.len();
        if n < 2 {
            return 0.0;
        }
        (self.m2 / (n - 1) as f64).max(0.0).sqrt()
    }
}

/// Fixed-capacity trailing windows keyed by `(instrument, indicator)`.
#[derive(Debug, Clone, Default)]
pub struct RollingStatistics {
    capacity_override: Option<usize>,
    windows: HashMap<(InstrumentId, IndicatorKind), WindowState>,
}

impl RollingStatistics {
    /// Each indicator gets its default window length.
    pub fn new() -> Self {
        Self::default()
    }

    /// Same capacity for every window.
    pub fn with_capacity(capacity: usize) -> Result<Self, ValidationError> {
        if capacity < 2 {
            return Err(ValidationError::WindowTooSmall);
        }
        Ok(Self {
            capacity_override: Some(capacity),
            windows: HashMap::new(),
        })
    }

    pub fn capacity_for(&self, indicator: IndicatorKind) -> usize {
        self.capacity_override
            .unwrap_or_else(|| indicator.default_window())
    }

    /// Appends a value, evicting the oldest once the window is full.
    pub fn update(
        &mut self,
        instrument: &InstrumentId,
        indicator: IndicatorKind,
        value: f64,
    ) -> Result<(), ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "value" });
        }
        self.window_mut(instrument, indicator).push(value);
        Ok(())
    }

    /// Dated variant of [`update`](Self::update). Values dated at or before
    /// the newest date already seen are ignored. Returns whether the value
    /// was taken.
    pub fn observe(
        &mut self,
        instrument: &InstrumentId,
        indicator: IndicatorKind,
        date: Date,
        value: f64,
    ) -> Result<bool, ValidationError> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteValue { field: "value" });
        }
        let window = self.window_mut(instrument, indicator);
        if window.watermark.is_some_and(|watermark| date <= watermark) {
            return Ok(false);
        }
        window.watermark = Some(date);
        window.origin.get_or_insert(date);
        window.push(value);
        Ok(true)
    }

    /// `None` until the window holds at least two values.
    pub fn snapshot(
        &self,
        instrument: &InstrumentId,
        indicator: IndicatorKind,
    ) -> Option<RollingWindow> {
        let window = self.windows.get(&(instrument.clone(), indicator))?;
        if window.values.len() < 2 {
            return None;
        }
        Some(RollingWindow {
            instrument: instrument.clone(),
            indicator,
            values: window.values.iter().copied().collect(),
            capacity: window.capacity,
            mean: window.mean,
            standard_deviation: window.standard_deviation(),
            sample_size: window.values.len(),
        })
    }

    pub fn watermark(&self, instrument: &InstrumentId, indicator: IndicatorKind) -> Option<Date> {
        self.windows
            .get(&(instrument.clone(), indicator))
            .and_then(|window| window.watermark)
    }

    /// Date of the first dated value the window took since it was created
    /// or last reset.
    pub fn origin(&self, instrument: &InstrumentId, indicator: IndicatorKind) -> Option<Date> {
        self.windows
            .get(&(instrument.clone(), indicator))
            .and_then(|window| window.origin)
    }

    /// Drops the window so the next values rebuild it from scratch.
    pub fn reset(&mut self, instrument: &InstrumentId, indicator: IndicatorKind) {
        self.windows.remove(&(instrument.clone(), indicator));
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    fn window_mut(
        &mut self,
        instrument: &InstrumentId,
        indicator: IndicatorKind,
    ) -> &mut WindowState {
        let capacity = self.capacity_for(indicator);
        self.windows
            .entry((instrument.clone(), indicator))
            .or_insert_with(|| WindowState::new(capacity))
    }
}
