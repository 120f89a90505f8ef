use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(about = "Tally chain-state indexer", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml", env = "TALLY_CONFIG")]
    pub config: PathBuf,

    /// Path to the data directory
    #[arg(short, long, value_name = "DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Follow the node and keep the ledger in sync (default)
    Run,
    /// Catch up with the node once and exit
    SyncOnce,
    /// Print node height, ledger tip and mempool size
    Status,
    /// Recompute every balance from unspent outputs and report mismatches
    Verify,
}
