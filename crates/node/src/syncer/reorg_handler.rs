//! Chain reorganization handler
//!
//! Detects when the stored tip is no longer on the node's canonical chain and
//! unwinds blocks until the ledger and the node agree again.

use std::sync::Arc;
use std::time::Duration;
use tally_common::traits::NodeSource;
use tally_common::types::{ChainTip, Hash};
use tally_storage::LedgerStore;
use tracing::{debug, info, warn};

use super::error::SyncError;
use super::unwinder::unwind_tip;
use super::{blocking_write, node_call};

/// Reorganization result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorgResult {
    /// Tip before the rewind
    pub old_tip: ChainTip,
    /// Tip after the rewind; agrees with the node
    pub new_tip: ChainTip,
    /// Number of blocks unwound
    pub reverted_count: u64,
}

impl ReorgResult {
    pub fn is_reorg(&self) -> bool {
        self.reverted_count > 0
    }
}

/// Reorganization handler for chain forks
pub struct ReorgHandler<N> {
    node: Arc<N>,
    store: LedgerStore,
    request_timeout: Duration,
}

impl<N: NodeSource + 'static> ReorgHandler<N> {
    pub fn new(node: Arc<N>, store: LedgerStore, request_timeout: Duration) -> Self {
        Self {
            node,
            store,
            request_timeout,
        }
    }

    /// Hash the node currently considers canonical at `height`.
    pub async fn canonical_hash(&self, height: u64) -> Result<Hash, SyncError> {
        let hash = node_call(
            self.request_timeout,
            "getblockhash",
            self.node.get_block_hash(height),
        )
        .await?;
        Ok(hash)
    }

    /// Unwinds stale blocks until the tip agrees with the node.
    ///
    /// `tip` is updated after every committed unwind, so it always matches the
    /// ledger even when this returns an error part way. A tip above
    /// `node_height` is stale without asking the node about it.
    pub async fn rewind(&self, tip: &mut ChainTip, node_height: u64) -> Result<ReorgResult, SyncError> {
        let old_tip = *tip;
        let mut reverted_count = 0u64;

        loop {
            if tip.height <= node_height {
                let canonical = self.canonical_hash(tip.height).await?;
                if canonical == tip.hash {
                    break;
                }
                if tip.height == 0 {
                    return Err(SyncError::GenesisNotCanonical {
                        stored: tip.hash,
                        canonical,
                    });
                }
                warn!(
                    "Found reorg at height {}: stored {}, canonical {}",
                    tip.height, tip.hash, canonical
                );
            } else {
                warn!(
                    "Ledger tip {} is above node height {}, unwinding",
                    tip.height, node_height
                );
            }

            let expected = *tip;
            let outcome = blocking_write(&self.store, move |txn| unwind_tip(txn, &expected)).await?;
            info!(
                "Unwound block {} at height {} ({} transactions)",
                outcome.removed.hash, outcome.removed.height, outcome.transactions
            );
            *tip = outcome.new_tip;
            reverted_count += 1;
        }

        if reverted_count > 0 {
            info!(
                "Chain reorganization resolved: unwound {} blocks, tip now {} at height {}",
                reverted_count, tip.hash, tip.height
            );
        } else {
            debug!("Tip {} at height {} is canonical", tip.hash, tip.height);
        }

        Ok(ReorgResult {
            old_tip,
            new_tip: *tip,
            reverted_count,
        })
    }
}
