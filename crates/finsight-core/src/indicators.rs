//! # Indicators
//!
//! Technical indicators computed from stored closes, plus the raw level used
//! for economic series.
//!
//! | Kind | Reading | Normalized value |
//! |------|---------|------------------|
//! | `level` | raw observation | the value itself |
//! | `rsi` | RSI(14) | RSI |
//! | `macd` | MACD(12, 26, 9) | histogram |
//! | `bollinger_b` | Bollinger %B(20, 2σ) | %B |
//! | `ma_gap` | distance to SMA(50) in percent | gap |
//!
//! Every series starts only once its indicator is warmed up; shorter
//! histories produce an empty series instead of early, unstable values.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ta::indicators::{
    BollingerBands, MovingAverageConvergenceDivergence, RelativeStrengthIndex,
    SimpleMovingAverage,
};
use ta::Next;
use time::Date;

use crate::domain::{AssetClass, Observation};
use crate::error::ValidationError;

const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;
const BOLLINGER_PERIOD: usize = 20;
const BOLLINGER_WIDTH: f64 = 2.0;
const MA_GAP_PERIOD: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Level,
    Rsi,
    Macd,
    BollingerB,
    MaGap,
}

impl IndicatorKind {
    pub const ALL: [Self; 5] = [
        Self::Level,
        Self::Rsi,
        Self::Macd,
        Self::BollingerB,
        Self::MaGap,
    ];

    const PRICED: [Self; 4] = [Self::Rsi, Self::Macd, Self::BollingerB, Self::MaGap];
    const ECONOMIC: [Self; 1] = [Self::Level];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Level => "level",
            Self::Rsi => "rsi",
            Self::Macd => "macd",
            Self::BollingerB => "bollinger_b",
            Self::MaGap => "ma_gap",
        }
    }

    /// Indicators tracked for an asset class.
    pub const fn for_class(asset_class: AssetClass) -> &'static [Self] {
        if asset_class.is_economic() {
            &Self::ECONOMIC
        } else {
            &Self::PRICED
        }
    }

    /// Trailing normalization window, in readings.
    pub const fn default_window(self) -> usize {
        match self {
            Self::Rsi | Self::Macd => 252,
            Self::BollingerB | Self::MaGap => 63,
            Self::Level => 36,
        }
    }

    /// Observations needed before the first reading is produced.
    pub const fn warmup(self) -> usize {
        match self {
            Self::Level => 1,
            Self::Rsi => RSI_PERIOD + 1,
            Self::Macd => MACD_SLOW + MACD_SIGNAL - 1,
            Self::BollingerB => BOLLINGER_PERIOD,
            Self::MaGap => MA_GAP_PERIOD,
        }
    }
}

impl Display for IndicatorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndicatorKind {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "level" | "value" => Ok(Self::Level),
            "rsi" => Ok(Self::Rsi),
            "macd" => Ok(Self::Macd),
            "bollinger_b" | "bollinger" | "percent_b" => Ok(Self::BollingerB),
            "ma_gap" | "ma50_gap" => Ok(Self::MaGap),
            other => Err(ValidationError::InvalidIndicator {
                value: other.to_owned(),
            }),
        }
    }
}

/// One indicator value. Closed set, dispatched by `match`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IndicatorReading {
    Level {
        value: f64,
    },
    Rsi {
        value: f64,
    },
    Macd {
        macd: f64,
        signal: f64,
        histogram: f64,
    },
    BollingerB {
        percent_b: f64,
        upper: f64,
        lower: f64,
    },
    MaGap {
        gap_pct: f64,
        moving_average: f64,
    },
}

impl IndicatorReading {
    pub const fn kind(&self) -> IndicatorKind {
        match self {
            Self::Level { .. } => IndicatorKind::Level,
            Self::Rsi { .. } => IndicatorKind::Rsi,
            Self::Macd { .. } => IndicatorKind::Macd,
            Self::BollingerB { .. } => IndicatorKind::BollingerB,
            Self::MaGap { .. } => IndicatorKind::MaGap,
        }
    }

    /// The scalar that gets normalized against its own history.
    pub fn scalar(&self) -> f64 {
        match self {
            Self::Level { value } | Self::Rsi { value } => *value,
            Self::Macd { histogram, .. } => *histogram,
            Self::BollingerB { percent_b, .. } => *percent_b,
            Self::MaGap { gap_pct, .. } => *gap_pct,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatedReading {
    pub date: Date,
    pub reading: IndicatorReading,
}

/// Indicator series over `observations`, which must be sorted oldest first.
pub fn compute_series(kind: IndicatorKind, observations: &[Observation]) -> Vec<DatedReading> {
    if observations.len() < kind.warmup() {
        return Vec::new();
    }
    let skip = kind.warmup() - 1;

    let readings: Vec<Option<IndicatorReading>> = match kind {
        IndicatorKind::Level => observations
            .iter()
            .map(|obs| Some(IndicatorReading::Level { value: obs.value }))
            .collect(),
        IndicatorKind::Rsi => {
            let Ok(mut rsi) = RelativeStrengthIndex::new(RSI_PERIOD) else {
                return Vec::new();
            };
            observations
                .iter()
                .map(|obs| Some(IndicatorReading::Rsi { value: rsi.next(obs.value) }))
                .collect()
        }
        IndicatorKind::Macd => {
            let Ok(mut macd) =
                MovingAverageConvergenceDivergence::new(MACD_FAST, MACD_SLOW, MACD_SIGNAL)
            else {
                return Vec::new();
            };
            observations
                .iter()
                .map(|obs| {
                    let out = macd.next(obs.value);
                    Some(IndicatorReading::Macd {
                        macd: out.macd,
                        signal: out.signal,
                        histogram: out.histogram,
                    })
                })
                .collect()
        }
        IndicatorKind::BollingerB => {
            let Ok(mut bands) = BollingerBands::new(BOLLINGER_PERIOD, BOLLINGER_WIDTH) else {
                return Vec::new();
            };
            observations
                .iter()
                .map(|obs| {
                    let out = bands.next(obs.value);
                    percent_b(obs.value, out.upper, out.lower).map(|percent_b| {
                        IndicatorReading::BollingerB {
                            percent_b,
                            upper: out.upper,
                            lower: out.lower,
                        }
                    })
                })
                .collect()
        }
        IndicatorKind::MaGap => {
            let Ok(mut sma) = SimpleMovingAverage::new(MA_GAP_PERIOD) else {
                return Vec::new();
            };
            observations
                .iter()
                .map(|obs| {
                    let moving_average = sma.next(obs.value);
                    gap_pct(obs.value, moving_average).map(|gap_pct| IndicatorReading::MaGap {
                        gap_pct,
                        moving_average,
                    })
                })
                .collect()
        }
    };

    observations
        .iter()
        .zip(readings)
        .skip(skip)
        .filter_map(|(obs, reading)| {
            reading
                .filter(|reading| reading.scalar().is_finite())
                .map(|reading| DatedReading {
                    date: obs.date,
                    reading,
                })
        })
        .collect()
}

/// Position of `close` inside the band; undefined for a zero-width band.
pub fn percent_b(close: f64, upper: f64, lower: f64) -> Option<f64> {
    let width = upper - lower;
    if width.abs() <= f64::EPSILON {
        return None;
    }
    Some((close - lower) / width)
}

/// Distance from the moving average in percent; undefined when it is zero.
pub fn gap_pct(close: f64, moving_average: f64) -> Option<f64> {
    if moving_average == 0.0 {
        return None;
    }
    Some((close - moving_average) / moving_average * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstrumentId;
    use time::macros::date;
    use time::Duration;

    fn closes(values: &[f64]) -> Vec<Observation> {
        let id = InstrumentId::parse("SPY").expect("id");
        values
            .iter()
            .enumerate()
            .map(|(offset, value)| {
                Observation::new(
                    id.clone(),
                    date!(2025 - 01 - 01) + Duration::days(offset as i64),
                    *value,
                )
                .expect("obs")
            })
            .collect()
    }

    fn rising(len: usize) -> Vec<f64> {
        (0..len).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn short_history_yields_empty_series() {
        let observations = closes(&rising(10));
        assert!(compute_series(IndicatorKind::Rsi, &observations).is_empty());
        assert!(compute_series(IndicatorKind::Macd, &observations).is_empty());
        assert!(compute_series(IndicatorKind::MaGap, &observations).is_empty());
        assert_eq!(compute_series(IndicatorKind::Level, &observations).len(), 10);
    }

    #[test]
    fn series_start_after_warmup() {
        let observations = closes(&rising(60));
        let rsi = compute_series(IndicatorKind::Rsi, &observations);
        assert_eq!(rsi.len(), 60 - RSI_PERIOD);
        assert_eq!(rsi[0].date, observations[RSI_PERIOD].date);

        let gap = compute_series(IndicatorKind::MaGap, &observations);
        assert_eq!(gap.len(), 60 - MA_GAP_PERIOD + 1);
    }

    #[test]
    fn rising_closes_read_as_overbought_and_above_average() {
        let observations = closes(&rising(80));
        let rsi = compute_series(IndicatorKind::Rsi, &observations);
        let last = rsi.last().expect("rsi").reading;
        assert_eq!(last.kind(), IndicatorKind::Rsi);
        assert!(last.scalar() > 70.0);

        let gap = compute_series(IndicatorKind::MaGap, &observations);
        assert!(gap.last().expect("gap").reading.scalar() > 0.0);

        let macd = compute_series(IndicatorKind::Macd, &observations);
        match macd.last().expect("macd").reading {
            IndicatorReading::Macd { macd, .. } => assert!(macd > 0.0),
            other => panic!("unexpected reading {other:?}"),
        }
    }

    #[test]
    fn flat_closes_have_no_bollinger_reading() {
        let observations = closes(&[50.0; 30]);
        assert!(compute_series(IndicatorKind::BollingerB, &observations).is_empty());
        assert_eq!(percent_b(1.0, 2.0, 0.0), Some(0.5));
        let gap = gap_pct(110.0, 100.0).expect("gap");
        assert!((gap - 10.0).abs() < 1e-9);
        assert_eq!(gap_pct(1.0, 0.0), None);
    }

    #[test]
    fn parses_indicator_names() {
        assert_eq!("RSI".parse::<IndicatorKind>(), Ok(IndicatorKind::Rsi));
        assert_eq!("bollinger".parse::<IndicatorKind>(), Ok(IndicatorKind::BollingerB));
        assert!(matches!(
            "vwap".parse::<IndicatorKind>(),
            Err(ValidationError::InvalidIndicator { .. })
        ));
        assert_eq!(
            IndicatorKind::for_class(AssetClass::EconomicQuarterly),
            &[IndicatorKind::Level]
        );
    }
}
