use finsight_core::{EngineBuilder, InstrumentId};

use crate::cli::AuditArgs;
use crate::error::CliError;
use crate::output::Envelope;

pub fn run(args: &AuditArgs, builder: EngineBuilder) -> Result<Envelope, CliError> {
    let instrument = args
        .instrument
        .as_deref()
        .map(InstrumentId::parse)
        .transpose()?;
    let entries = builder.build().backfill_history(instrument.as_ref())?;
    Ok(Envelope::new("audit", serde_json::to_value(&entries)?))
}
