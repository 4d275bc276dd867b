use serde::{Deserialize, Serialize};
use time::{Date, Duration, Month};

use crate::domain::{AssetClass, Observation};

/// Release-level summary of an economic series.
///
/// Percent fields are `None` when there is not enough history or the base
/// reading is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EconomicMetrics {
    pub current: f64,
    pub release_date: Date,
    pub prior: Option<f64>,
    pub change_vs_prior: Option<f64>,
    pub year_over_year_pct: Option<f64>,
    /// Change over the last three periods, compounded to a yearly rate.
    pub annualized_rate_pct: Option<f64>,
    pub next_release: Option<Date>,
}

const fn periods_per_year(asset_class: AssetClass) -> Option<usize> {
    match asset_class {
        AssetClass::EconomicMonthly => Some(12),
        AssetClass::EconomicQuarterly => Some(4),
        AssetClass::Equity | AssetClass::Etf => None,
    }
}

/// Metrics from releases sorted oldest first. `None` for priced asset
/// classes or an empty series.
pub fn economic_metrics(
    asset_class: AssetClass,
    observations: &[Observation],
) -> Option<EconomicMetrics> {
    let per_year = periods_per_year(asset_class)?;
    let latest = observations.last()?;
    let current = latest.value;
    let back = |periods: usize| {
        observations
            .len()
            .checked_sub(periods + 1)
            .map(|index| observations[index].value)
    };

    let prior = back(1);
    let year_over_year_pct = back(per_year).and_then(|base| pct_change(current, base));
    let annualized_rate_pct = back(3).and_then(|base| {
        let ratio = current / base;
        if base == 0.0 || ratio <= 0.0 {
            return None;
        }
        let exponent = per_year as f64 / 3.0;
        Some((ratio.powf(exponent) - 1.0) * 100.0).filter(|rate| rate.is_finite())
    });

    Some(EconomicMetrics {
        current,
        release_date: latest.date,
        prior,
        change_vs_prior: prior.map(|prior| current - prior),
        year_over_year_pct,
        annualized_rate_pct,
        next_release: next_release(asset_class, latest.date),
    })
}

/// Monthly series: the 15th of the following month. Quarterly: 90 days on.
pub fn next_release(asset_class: AssetClass, last_release: Date) -> Option<Date> {
    match asset_class {
        AssetClass::EconomicMonthly => {
            let month = last_release.month().next();
            let year = if month == Month::January {
                last_release.year() + 1
            } else {
                last_release.year()
            };
            Date::from_calendar_date(year, month, 15).ok()
        }
        AssetClass::EconomicQuarterly => last_release.checked_add(Duration::days(90)),
        AssetClass::Equity | AssetClass::Etf => None,
    }
}

fn pct_change(current: f64, base: f64) -> Option<f64> {
    if base == 0.0 {
        return None;
    }
    Some((current / base - 1.0) * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstrumentId;
    use time::macros::date;

    fn monthly(values: &[f64]) -> Vec<Observation> {
        let id = InstrumentId::parse("CPIAUCSL").expect("id");
        let mut date = date!(2023 - 01 - 01);
        values
            .iter()
            .map(|value| {
                let obs = Observation::new(id.clone(), date, *value).expect("obs");
                date = next_release(AssetClass::EconomicMonthly, date)
                    .and_then(|d| d.replace_day(1).ok())
                    .expect("next month");
                obs
            })
            .collect()
    }

    #[test]
    fn monthly_metrics() {
        // 13 releases: 100, 101, ..., 112
        let values: Vec<f64> = (0..13).map(|i| 100.0 + i as f64).collect();
        let metrics =
            economic_metrics(AssetClass::EconomicMonthly, &monthly(&values)).expect("metrics");

        assert_eq!(metrics.current, 112.0);
        assert_eq!(metrics.prior, Some(111.0));
        assert_eq!(metrics.change_vs_prior, Some(1.0));
        assert!((metrics.year_over_year_pct.expect("yoy") - 12.0).abs() < 1e-9);
        let expected = ((112.0f64 / 109.0).powi(4) - 1.0) * 100.0;
        assert!((metrics.annualized_rate_pct.expect("annualized") - expected).abs() < 1e-9);
        assert_eq!(metrics.release_date, date!(2024 - 01 - 01));
        assert_eq!(metrics.next_release, Some(date!(2024 - 02 - 15)));
    }

    #[test]
    fn short_series_leave_gaps_as_none() {
        let metrics =
            economic_metrics(AssetClass::EconomicMonthly, &monthly(&[3.9, 4.1])).expect("metrics");
        assert_eq!(metrics.prior, Some(3.9));
        assert_eq!(metrics.year_over_year_pct, None);
        assert_eq!(metrics.annualized_rate_pct, None);

        assert!(economic_metrics(AssetClass::EconomicMonthly, &[]).is_none());
        assert!(economic_metrics(AssetClass::Etf, &monthly(&[1.0, 2.0])).is_none());
    }

    #[test]
    fn next_release_rolls_over_year_end() {
        assert_eq!(
            next_release(AssetClass::EconomicMonthly, date!(2024 - 12 - 31)),
            Some(date!(2025 - 01 - 15))
        );
        assert_eq!(
            next_release(AssetClass::EconomicQuarterly, date!(2025 - 04 - 01)),
            Some(date!(2025 - 06 - 30))
        );
    }
}
