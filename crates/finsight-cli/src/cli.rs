//! CLI argument definitions for finsight.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sufficiency` | Grade stored history per instrument |
//! | `backfill` | Close history gaps from a directory of CSV files |
//! | `signal` | Normalized signal for one instrument |
//! | `snapshot` | Unified snapshot of every given instrument |
//! | `audit` | Backfill audit trail |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--home` | `$FINSIGHT_HOME` or `~/.finsight` | Data directory |
//!
//! # Examples
//!
//! ```bash
//! finsight sufficiency SPY:etf UNRATE:economic_monthly --pretty
//! finsight backfill SPY:etf QQQ:etf --history-dir ./history --target-days 252
//! finsight signal SPY:etf --indicator rsi
//! finsight audit --instrument SPY
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use finsight_core::{IndicatorKind, Instrument};

/// Historical data sufficiency and signal normalization.
///
/// Instruments are written as `ID:asset_class`, where the class is one of
/// equity, etf, economic_monthly, economic_quarterly.
#[derive(Debug, Parser)]
#[command(name = "finsight", author, version, about = "Data sufficiency and signal CLI")]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Data directory holding the DuckDB warehouse.
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Grade stored history and recommend what to do about it.
    ///
    /// # Examples
    ///
    ///   finsight sufficiency SPY:etf
    ///   finsight sufficiency AAPL:equity CPIAUCSL:economic_monthly --pretty
    Sufficiency(SufficiencyArgs),

    /// Backfill the worst gaps first within the provider call budget.
    ///
    /// History is read from `<history-dir>/<ID>.csv` with rows of
    /// `date,value[,open,high,low,volume]`.
    ///
    /// # Examples
    ///
    ///   finsight backfill SPY:etf IWM:etf --history-dir ./history
    Backfill(BackfillArgs),

    /// Score the latest indicator readings against their trailing windows.
    ///
    /// # Examples
    ///
    ///   finsight signal SPY:etf
    ///   finsight signal SPY:etf --indicator macd
    Signal(SignalArgs),

    /// Publish and print one consistent snapshot for the given instruments.
    Snapshot(SnapshotArgs),

    /// Show recorded backfill results.
    Audit(AuditArgs),
}

#[derive(Debug, Args)]
pub struct SufficiencyArgs {
    /// One or more instruments (e.g., SPY:etf).
    #[arg(required = true, num_args = 1..)]
    pub instruments: Vec<Instrument>,
}

#[derive(Debug, Args)]
pub struct BackfillArgs {
    #[arg(required = true, num_args = 1..)]
    pub instruments: Vec<Instrument>,

    /// Directory of `<ID>.csv` history files.
    #[arg(long)]
    pub history_dir: PathBuf,

    /// Observations to hold per instrument. Defaults to the largest
    /// required count among the given asset classes.
    #[arg(long)]
    pub target_days: Option<usize>,

    /// Delay between provider calls, overriding FINSIGHT_CALL_DELAY_MS.
    #[arg(long)]
    pub call_delay_ms: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SignalArgs {
    pub instrument: Instrument,

    /// rsi, macd, bollinger_b, ma_gap or level. All applicable when omitted.
    #[arg(long)]
    pub indicator: Option<IndicatorKind>,
}

#[derive(Debug, Args)]
pub struct SnapshotArgs {
    #[arg(required = true, num_args = 1..)]
    pub instruments: Vec<Instrument>,
}

#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Restrict to one instrument id.
    #[arg(long)]
    pub instrument: Option<String>,
}
