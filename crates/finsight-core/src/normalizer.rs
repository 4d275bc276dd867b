use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::domain::InstrumentId;
use crate::indicators::IndicatorKind;
use crate::rolling::RollingWindow;

/// Standard deviations at or below this count as a flat window.
const DEGENERATE_STD: f64 = 1e-12;
/// Windows shorter than this get the tighter cap.
const SHORT_WINDOW: usize = 100;
const MIN_CONFIDENCE: f64 = 0.3;
const HIGH_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

impl Display for Signal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw indicator value placed against its own trailing history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedSignal {
    pub instrument: InstrumentId,
    pub indicator: IndicatorKind,
    pub raw_value: f64,
    pub z_score: f64,
    pub capped_z_score: f64,
    pub confidence: f64,
    pub signal: Signal,
    pub max_std_dev: f64,
    pub sample_size: usize,
}

/// Outlier cap for a window of `capacity` readings.
pub const fn max_std_dev_for(capacity: usize) -> f64 {
    if capacity < SHORT_WINDOW {
        3.0
    } else {
        5.0
    }
}

/// Signal threshold at a given confidence. `None` means always hold.
pub fn threshold_for(confidence: f64) -> Option<f64> {
    if confidence < MIN_CONFIDENCE {
        None
    } else if confidence > HIGH_CONFIDENCE {
        Some(1.5)
    } else {
        Some(2.0)
    }
}

/// Converts raw values into capped Z-scores and confidence-gated signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalNormalizer;

impl SignalNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// `confidence` is the instrument's sufficiency confidence. A flat
    /// window yields a zero Z-score rather than an error.
    pub fn normalize(
        &self,
        raw_value: f64,
        window: &RollingWindow,
        confidence: f64,
    ) -> NormalizedSignal {
        let z_score = z_score(raw_value, window.mean, window.standard_deviation);
        let max_std_dev = max_std_dev_for(window.capacity);
        let capped_z_score = z_score.clamp(-max_std_dev, max_std_dev);
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };

        let signal = match threshold_for(confidence) {
            Some(threshold) if capped_z_score >= threshold => Signal::Sell,
            Some(threshold) if capped_z_score <= -threshold => Signal::Buy,
            _ => Signal::Hold,
        };

        NormalizedSignal {
            instrument: window.instrument.clone(),
            indicator: window.indicator,
            raw_value,
            z_score,
            capped_z_score,
            confidence,
            signal,
            max_std_dev,
            sample_size: window.sample_size,
        }
    }
}

/// `(value - mean) / std`, or zero when the spread is degenerate.
pub fn z_score(value: f64, mean: f64, standard_deviation: f64) -> f64 {
    if !standard_deviation.is_finite() || standard_deviation <= DEGENERATE_STD {
        return 0.0;
    }
    let z = (value - mean) / standard_deviation;
    if z.is_finite() {
        z
    } else {
        0.0
    }
}
