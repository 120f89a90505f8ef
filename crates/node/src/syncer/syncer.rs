use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tally_common::error::{ErrorClass, NodeError};
use tally_common::traits::NodeSource;
use tally_common::types::{ChainTip, NodeBlock};
use tally_storage::LedgerStore;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::applier::{apply_block, ApplyOutcome, BlockBundle};
use super::error::SyncError;
use super::reorg_handler::ReorgHandler;
use super::{blocking_write, node_call};
use crate::metrics;

/// Forks met while applying that one cycle will resolve before giving up.
const MAX_FORKS_PER_CYCLE: u32 = 3;

/// 同步配置
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub interval: Duration,
    pub request_timeout: Duration,
    pub index_genesis_transactions: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            request_timeout: Duration::from_secs(30),
            index_genesis_transactions: false,
        }
    }
}

/// 同步状态. Owned by whoever holds the cycle lock.
#[derive(Debug, Default)]
struct SyncState {
    /// Last committed block, `None` until genesis is seeded.
    tip: Option<ChainTip>,
}

/// Summary of one completed sync cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub node_height: u64,
    pub tip: ChainTip,
    pub seeded: bool,
    pub unwound: u64,
    pub applied: u64,
    /// Forks found while applying, each resolved by another rewind.
    pub forks_resolved: u32,
    /// A stop was requested before the ledger caught up.
    pub interrupted: bool,
}

impl SyncReport {
    pub fn caught_up(&self) -> bool {
        self.tip.height == self.node_height
    }
}

/// Drives the ledger towards the node's tip, one block per atomic write.
pub struct BlockSyncer<N> {
    node: Arc<N>,
    store: LedgerStore,
    reorg: ReorgHandler<N>,
    options: SyncOptions,
    state: Mutex<SyncState>,
    halted: AtomicBool,
    stopping: AtomicBool,
    stop_notify: Notify,
}

impl<N: NodeSource + 'static> BlockSyncer<N> {
    pub fn new(node: Arc<N>, store: LedgerStore, options: SyncOptions) -> Result<Self, SyncError> {
        let tip = store.tip()?;
        let reorg = ReorgHandler::new(node.clone(), store.clone(), options.request_timeout);
        Ok(Self {
            node,
            store,
            reorg,
            options,
            state: Mutex::new(SyncState { tip }),
            halted: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            stop_notify: Notify::new(),
        })
    }

    pub fn store(&self) -> &LedgerStore {
        &self.store
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Ends `run` at the next block boundary.
    pub fn request_stop(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    /// Runs sync cycles on a fixed cadence until stopped or a fatal error occurs.
    pub async fn run(&self) -> Result<(), SyncError> {
        let mut interval = tokio::time::interval(self.options.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Sync loop started, interval {:?}", self.options.interval);

        loop {
            if self.is_stopping() {
                break;
            }
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.stop_notify.notified() => break,
            }
            self.tick().await?;
        }

        info!("Sync loop stopped");
        Ok(())
    }

    /// One scheduled invocation. Skips when a cycle is already running and
    /// swallows transient failures; only fatal errors are returned.
    pub async fn tick(&self) -> Result<Option<SyncReport>, SyncError> {
        let started = Instant::now();
        let Ok(mut state) = self.state.try_lock() else {
            debug!("Previous sync cycle still running, skipping tick");
            metrics::record_cycle("skipped", 0.0);
            return Ok(None);
        };

        let result = self.run_cycle(&mut state).await;
        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(report) => {
                metrics::record_cycle("ok", elapsed);
                Ok(Some(report))
            }
            Err(err) => {
                let class = err.class();
                metrics::record_cycle(class.as_str(), elapsed);
                match class {
                    ErrorClass::Transient => {
                        warn!("Sync cycle aborted, retrying next tick: {}", err);
                        Ok(None)
                    }
                    ErrorClass::Fatal => {
                        error!("Sync halted: {}", err);
                        Err(err)
                    }
                }
            }
        }
    }

    /// Runs one full cycle, waiting for any cycle already in flight.
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        let mut state = self.state.lock().await;
        self.run_cycle(&mut state).await
    }

    async fn run_cycle(&self, state: &mut SyncState) -> Result<SyncReport, SyncError> {
        if self.is_halted() {
            return Err(SyncError::Halted);
        }
        let result = self.cycle(state).await;
        if let Err(err) = &result {
            if err.is_fatal() {
                self.halted.store(true, Ordering::SeqCst);
            }
        }
        result
    }

    async fn cycle(&self, state: &mut SyncState) -> Result<SyncReport, SyncError> {
        let node_height = node_call(
            self.options.request_timeout,
            "getblockcount",
            self.node.get_current_height(),
        )
        .await?;

        let mut seeded = false;
        let tip = match state.tip.as_mut() {
            Some(tip) => tip,
            None => {
                let genesis = self.seed_genesis().await?;
                seeded = true;
                state.tip.insert(genesis)
            }
        };
        info!("Current node height: {}, ledger height: {}", node_height, tip.height);

        let reorg = self.reorg.rewind(tip, node_height).await?;
        if reorg.is_reorg() {
            metrics::record_reorg(reorg.reverted_count);
        }

        let mut report = SyncReport {
            node_height,
            tip: *tip,
            seeded,
            unwound: reorg.reverted_count,
            applied: 0,
            forks_resolved: 0,
            interrupted: false,
        };

        let mut node_height = node_height;
        while tip.height < node_height {
            if self.is_stopping() {
                report.interrupted = true;
                break;
            }

            let bundle = self.fetch_bundle(tip.height + 1).await?;
            if bundle.block.previous != Some(tip.hash) {
                if report.forks_resolved >= MAX_FORKS_PER_CYCLE {
                    return Err(SyncError::UnstableChain {
                        height: bundle.block.height,
                        forks: report.forks_resolved,
                    });
                }
                warn!(
                    "Block {} at height {} does not extend tip {}, rewinding",
                    bundle.block.hash, bundle.block.height, tip.hash
                );
                report.forks_resolved += 1;
                node_height = node_call(
                    self.options.request_timeout,
                    "getblockcount",
                    self.node.get_current_height(),
                )
                .await?;
                report.node_height = node_height;
                let reorg = self.reorg.rewind(tip, node_height).await?;
                if reorg.is_reorg() {
                    metrics::record_reorg(reorg.reverted_count);
                }
                report.unwound += reorg.reverted_count;
                continue;
            }

            if let ApplyOutcome::Applied { tip: new_tip, .. } = self.commit(bundle, "New block").await? {
                *tip = new_tip;
            }
            report.applied += 1;
            metrics::record_applied(1);
            metrics::set_heights(tip.height, node_height);
        }

        report.tip = *tip;
        metrics::set_heights(tip.height, node_height);
        Ok(report)
    }

    async fn seed_genesis(&self) -> Result<ChainTip, SyncError> {
        let bundle = if self.options.index_genesis_transactions {
            self.fetch_bundle(0).await?
        } else {
            BlockBundle::header_only(self.fetch_block(0).await?)
        };
        let fallback = bundle.block.tip();
        match self.commit(bundle, "Genesis block").await? {
            ApplyOutcome::Applied { tip, .. } => Ok(tip),
            ApplyOutcome::AlreadyApplied => Ok(fallback),
        }
    }

    async fn fetch_block(&self, height: u64) -> Result<NodeBlock, SyncError> {
        let block = node_call(self.options.request_timeout, "getblock", self.node.get_block(height)).await?;
        if block.height != height {
            return Err(NodeError::malformed(
                "getblock",
                format!("asked for height {}, got {}", height, block.height),
            )
            .into());
        }
        Ok(block)
    }

    async fn fetch_bundle(&self, height: u64) -> Result<BlockBundle, SyncError> {
        let block = self.fetch_block(height).await?;
        let mut transactions = Vec::with_capacity(block.tx.len());
        for (position, txid) in block.indexed_transactions() {
            let tx = node_call(
                self.options.request_timeout,
                "getrawtransaction",
                self.node.get_transaction(txid),
            )
            .await?;
            transactions.push((position, tx));
        }
        Ok(BlockBundle { block, transactions })
    }

    async fn commit(&self, bundle: BlockBundle, label: &str) -> Result<ApplyOutcome, SyncError> {
        let (hash, height, time) = (bundle.block.hash, bundle.block.height, bundle.block.time);
        let count = bundle.block.tx.len();
        let outcome = blocking_write(&self.store, move |txn| apply_block(txn, &bundle)).await?;

        let date = chrono::DateTime::from_timestamp(time, 0)
            .map(|date| date.to_rfc3339())
            .unwrap_or_else(|| time.to_string());
        match outcome {
            ApplyOutcome::Applied { .. } => {
                info!("{}: {} at height {} with {} transactions ({})", label, hash, height, count, date)
            }
            ApplyOutcome::AlreadyApplied => {
                debug!("{} {} at height {} already applied", label, hash, height)
            }
        }
        Ok(outcome)
    }
}
