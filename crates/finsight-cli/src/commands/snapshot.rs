use finsight_core::{EngineBuilder, Freshness};

use crate::cli::SnapshotArgs;
use crate::error::CliError;
use crate::output::Envelope;

pub async fn run(args: &SnapshotArgs, builder: EngineBuilder) -> Result<Envelope, CliError> {
    let engine = builder.instruments(args.instruments.iter().cloned()).build();
    let view = engine.unified_snapshot().await;

    let mut warnings = Vec::new();
    if view.freshness == Freshness::Empty {
        warnings.push(String::from("snapshot refresh failed, nothing published"));
    }

    Ok(Envelope::new("snapshot", serde_json::to_value(&view)?).with_warnings(warnings))
}
