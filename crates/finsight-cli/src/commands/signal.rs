use finsight_core::{EngineBuilder, IndicatorKind};
use serde::Serialize;

use crate::cli::SignalArgs;
use crate::error::CliError;
use crate::output::Envelope;

#[derive(Debug, Serialize)]
struct SignalRow {
    indicator: IndicatorKind,
    signal: Option<finsight_core::NormalizedSignal>,
}

pub fn run(args: &SignalArgs, builder: EngineBuilder) -> Result<Envelope, CliError> {
    let engine = builder.instruments([args.instrument.clone()]).build();
    let indicators = match args.indicator {
        Some(indicator) => vec![indicator],
        None => IndicatorKind::for_class(args.instrument.asset_class()).to_vec(),
    };

    let mut rows = Vec::with_capacity(indicators.len());
    let mut warnings = Vec::new();
    for indicator in indicators {
        let signal = engine.normalized_signal(&args.instrument, indicator)?;
        if signal.is_none() {
            warnings.push(format!("{indicator}: not enough history for a signal"));
        }
        rows.push(SignalRow { indicator, signal });
    }

    Ok(Envelope::new("signal", serde_json::to_value(&rows)?).with_warnings(warnings))
}
