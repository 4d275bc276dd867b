use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::Instrument;
use crate::error::StoreError;
use crate::sufficiency::{ReliabilityTier, SufficiencyAssessor, SufficiencyReport};

/// Work order for one instrument in a backfill run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillConfig {
    pub instrument: Instrument,
    /// Observations missing against `target_days` when the plan was made.
    pub target_gap: usize,
    pub target_days: usize,
    pub max_api_calls: u32,
    pub batch_size: usize,
    /// Delay the run's shared pacer keeps between provider calls.
    pub inter_call_delay_ms: u64,
}

/// Orders instruments worst gap first and shares the remaining daily
/// budget between them.
#[derive(Clone)]
pub struct BackfillPlanner {
    assessor: SufficiencyAssessor,
    batch_size: usize,
    inter_call_delay_ms: u64,
}

impl BackfillPlanner {
    pub fn new(assessor: SufficiencyAssessor, batch_size: usize, inter_call_delay_ms: u64) -> Self {
        Self {
            assessor,
            batch_size: batch_size.max(1),
            inter_call_delay_ms,
        }
    }

    pub fn plan(
        &self,
        instruments: &[Instrument],
        target_days: usize,
        daily_budget_remaining: u32,
    ) -> Result<Vec<BackfillConfig>, StoreError> {
        let reports = self.assessor.assess_all(instruments)?;
        let mut ranked: Vec<(&Instrument, SufficiencyReport)> =
            instruments.iter().zip(reports).collect();
        ranked.sort_by(|(_, left), (_, right)| {
            left.sufficiency_ratio
                .total_cmp(&right.sufficiency_ratio)
                .then_with(|| left.instrument.cmp(&right.instrument))
        });

        let mut remaining = daily_budget_remaining;
        let mut plan = Vec::new();
        for (instrument, report) in ranked {
            if remaining == 0 {
                break;
            }
            if report.tier == ReliabilityTier::High {
                debug!(instrument = %instrument, "skipping instrument with high reliability");
                continue;
            }

            let target_gap = target_days.saturating_sub(report.current_count);
            let requested = calls_for_gap(target_gap, self.batch_size);
            if requested == 0 {
                continue;
            }

            let max_api_calls = remaining.min(requested);
            remaining -= max_api_calls;
            plan.push(BackfillConfig {
                instrument: instrument.clone(),
                target_gap,
                target_days,
                max_api_calls,
                batch_size: self.batch_size,
                inter_call_delay_ms: self.inter_call_delay_ms,
            });
        }
        Ok(plan)
    }
}

fn calls_for_gap(gap: usize, batch_size: usize) -> u32 {
    u32::try_from(gap.div_ceil(batch_size)).unwrap_or(u32::MAX)
}
