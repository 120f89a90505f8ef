use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;
use tally_common::traits::NodeSource;
use tally_common::types::ChainTip;
use tally_storage::LedgerStore;
use tokio::signal;
use tracing::{error, info, warn};

use crate::config::IndexerConfig;
use crate::metrics::MetricsCollector;
use crate::metrics_server::MetricsServer;
use crate::rpc_client::NodeRpcClient;
use crate::syncer::{node_call, BlockSyncer, SyncReport};

/// Snapshot of how far the ledger trails the node
#[derive(Debug, Clone, Serialize)]
pub struct IndexerStatus {
    pub node_height: u64,
    pub ledger_tip: Option<ChainTip>,
    pub mempool_size: usize,
}

impl IndexerStatus {
    pub fn blocks_behind(&self) -> u64 {
        let ledger_height = self.ledger_tip.map(|tip| tip.height).unwrap_or(0);
        self.node_height.saturating_sub(ledger_height)
    }
}

pub struct IndexerService {
    config: IndexerConfig,
    node: Arc<NodeRpcClient>,
    store: LedgerStore,
    syncer: Arc<BlockSyncer<NodeRpcClient>>,
    metrics: MetricsCollector,
}

impl IndexerService {
    pub fn new(config: IndexerConfig) -> Result<Self> {
        let store = LedgerStore::open(config.data_dir.join("ledger"))
            .with_context(|| format!("Failed to open ledger in {:?}", config.data_dir))?;
        let node = Arc::new(NodeRpcClient::new(&config.node)?);
        let syncer = Arc::new(BlockSyncer::new(node.clone(), store.clone(), config.sync_options())?);

        Ok(Self {
            config,
            node,
            store,
            syncer,
            metrics: MetricsCollector::new(),
        })
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    /// Runs the sync loop until Ctrl-C or a fatal ledger error.
    pub async fn start(self) -> Result<()> {
        info!("Starting Tally indexer against {}", self.config.node.rpc_url);

        if self.config.metrics.enabled {
            let server = MetricsServer::new(self.metrics.clone(), self.config.metrics.bind_address.clone());
            tokio::spawn(async move {
                if let Err(e) = server.start().await {
                    error!("Metrics server failed: {}", e);
                }
            });
        }

        let syncer = self.syncer.clone();
        let mut sync_task = tokio::spawn(async move { syncer.run().await });

        tokio::select! {
            result = &mut sync_task => {
                result??;
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                self.syncer.request_stop();
                if let Err(e) = sync_task.await? {
                    warn!("Sync loop ended with error during shutdown: {}", e);
                }
            }
        }

        info!("Indexer stopped at {:?}", self.store.tip()?);
        Ok(())
    }

    /// Single catch-up pass, used by the `sync-once` command.
    pub async fn sync_once(&self) -> Result<SyncReport> {
        Ok(self.syncer.sync_once().await?)
    }

    pub async fn status(&self) -> Result<IndexerStatus> {
        let timeout = self.config.node.request_timeout();
        let node_height = node_call(timeout, "getblockcount", self.node.get_current_height()).await?;
        let mempool = node_call(timeout, "getrawmempool", self.node.get_mempool()).await?;

        Ok(IndexerStatus {
            node_height,
            ledger_tip: self.store.tip()?,
            mempool_size: mempool.len(),
        })
    }
}
