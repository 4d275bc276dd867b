use finsight_core::{EngineBuilder, ReliabilityTier};

use crate::cli::SufficiencyArgs;
use crate::error::CliError;
use crate::output::Envelope;

pub fn run(args: &SufficiencyArgs, builder: EngineBuilder) -> Result<Envelope, CliError> {
    let engine = builder.instruments(args.instruments.iter().cloned()).build();
    let reports = engine.sufficiency_reports()?;

    let warnings = reports
        .iter()
        .filter(|report| report.tier <= ReliabilityTier::Low)
        .map(|report| format!("{} is {}: {}", report.instrument, report.tier, report.recommendation))
        .collect();

    Ok(Envelope::new("sufficiency", serde_json::to_value(&reports)?).with_warnings(warnings))
}
