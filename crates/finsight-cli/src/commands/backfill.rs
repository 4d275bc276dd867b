use std::sync::Arc;

use finsight_core::{CallPacer, EngineBuilder};
use serde_json::json;

use crate::cli::BackfillArgs;
use crate::error::CliError;
use crate::history_files::load_history_dir;
use crate::output::Envelope;

pub async fn run(args: &BackfillArgs, builder: EngineBuilder) -> Result<Envelope, CliError> {
    if !args.history_dir.is_dir() {
        return Err(CliError::Command(format!(
            "history directory '{}' does not exist",
            args.history_dir.display()
        )));
    }
    let target_days = match args.target_days {
        Some(0) => return Err(CliError::Command(String::from("target days must be positive"))),
        Some(days) => days,
        None => args
            .instruments
            .iter()
            .map(|instrument| instrument.asset_class().required_observations())
            .max()
            .unwrap_or(0),
    };

    let provider = load_history_dir(&args.history_dir, &args.instruments)?;
    let mut builder = builder
        .instruments(args.instruments.iter().cloned())
        .provider(Arc::new(provider));
    if let Some(delay_ms) = args.call_delay_ms {
        builder = builder.pacer(CallPacer::from_millis(delay_ms));
    }
    let engine = builder.build();

    let results = engine.run_backfill(&args.instruments, target_days).await?;

    let warnings = results
        .iter()
        .filter_map(|result| {
            if result.deferred {
                Some(format!("{}: deferred, provider calls refused for now", result.instrument))
            } else if result.retryable {
                Some(format!("{}: transient provider failure, rerun later", result.instrument))
            } else {
                None
            }
        })
        .collect();
    let errors = results
        .iter()
        .flat_map(|result| {
            result
                .errors
                .iter()
                .map(move |error| format!("{}: {error}", result.instrument))
        })
        .collect();

    let data = json!({
        "target_days": target_days,
        "budget_used_today": engine.budget().used_today(),
        "results": results,
    });
    Ok(Envelope::new("backfill", data)
        .with_warnings(warnings)
        .with_errors(errors))
}
