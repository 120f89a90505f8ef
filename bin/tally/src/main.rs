mod cli;
mod config_loader;

use anyhow::{anyhow, bail, Context};
use clap::Parser;
use tally_common::utils::logging::init_logging;
use tally_node::IndexerService;
use tally_storage::LedgerStore;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Parse CLI
    let args = cli::Cli::parse();

    // 2. Load Config
    let config = config_loader::load_indexer_config(&args.config, args.data_dir)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    // 3. Setup Logging; the guard flushes the file writer on drop
    let _guard = init_logging(&config.logging).map_err(|e| anyhow!("Failed to initialize logging: {}", e))?;
    info!("Loaded config from {:?}", args.config);

    match args.command.unwrap_or(cli::Commands::Run) {
        cli::Commands::Run => {
            let service = IndexerService::new(config)?;
            service.start().await?;
        }
        cli::Commands::SyncOnce => {
            let service = IndexerService::new(config)?;
            let report = service.sync_once().await?;
            info!(
                "Sync finished: tip {} at height {}, node height {}, applied {}, unwound {}",
                report.tip.hash, report.tip.height, report.node_height, report.applied, report.unwound
            );
            if !report.caught_up() {
                warn!("Ledger is still {} blocks behind the node", report.node_height.saturating_sub(report.tip.height));
            }
        }
        cli::Commands::Status => {
            let service = IndexerService::new(config)?;
            let status = service.status().await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        cli::Commands::Verify => {
            let store = LedgerStore::open(config.data_dir.join("ledger"))
                .with_context(|| format!("Failed to open ledger in {:?}", config.data_dir))?;
            let mismatches = store.verify_balances()?;
            if !mismatches.is_empty() {
                for mismatch in &mismatches {
                    error!(
                        "Balance mismatch for {} {}: recorded {}, expected {}",
                        mismatch.address, mismatch.currency, mismatch.recorded, mismatch.expected
                    );
                }
                bail!("{} balance rows disagree with the unspent outputs", mismatches.len());
            }
            info!("All balances match their unspent outputs");
        }
    }

    Ok(())
}
