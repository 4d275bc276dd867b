mod audit;
mod backfill;
mod signal;
mod snapshot;
mod sufficiency;

use std::sync::Arc;

use finsight_core::{EngineBuilder, EngineConfig, ObservationStore};
use finsight_warehouse::{Warehouse, WarehouseConfig};

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::Envelope;

pub async fn run(cli: &Cli) -> Result<Envelope, CliError> {
    let store = open_store(cli)?;
    let config = EngineConfig::from_env();

    match &cli.command {
        Command::Sufficiency(args) => sufficiency::run(args, engine(config, store)),
        Command::Backfill(args) => backfill::run(args, engine(config, store)).await,
        Command::Signal(args) => signal::run(args, engine(config, store)),
        Command::Snapshot(args) => snapshot::run(args, engine(config, store)).await,
        Command::Audit(args) => audit::run(args, engine(config, store)),
    }
}

fn open_store(cli: &Cli) -> Result<Arc<dyn ObservationStore>, CliError> {
    let config = match &cli.home {
        Some(home) => WarehouseConfig::at(home),
        None => WarehouseConfig::default(),
    };
    let warehouse = Warehouse::open(config)?;
    Ok(Arc::new(warehouse))
}

fn engine(config: EngineConfig, store: Arc<dyn ObservationStore>) -> EngineBuilder {
    EngineBuilder::new(config).store(store)
}
