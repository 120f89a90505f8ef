//! Syncer module
//!
//! Keeps the ledger in step with the node: detects reorgs, unwinds stale
//! blocks and applies new ones.

pub mod applier;
pub mod error;
pub mod reorg_handler;
pub mod syncer;
pub mod unwinder;

pub use applier::{apply_block, ApplyOutcome, BlockBundle};
pub use error::SyncError;
pub use reorg_handler::{ReorgHandler, ReorgResult};
pub use syncer::{BlockSyncer, SyncOptions, SyncReport};
pub use unwinder::{unwind_tip, UnwindOutcome};

use std::future::Future;
use std::time::Duration;
use tally_common::error::NodeError;
use tally_storage::{LedgerError, LedgerStore, LedgerTxn};

/// Bounds a node request; expiry counts as a transient node failure.
pub(crate) async fn node_call<T, F>(timeout: Duration, method: &str, call: F) -> Result<T, NodeError>
where
    F: Future<Output = Result<T, NodeError>>,
{
    tokio::time::timeout(timeout, call)
        .await
        .map_err(|_| NodeError::Timeout {
            method: method.to_string(),
        })?
}

/// Runs one atomic ledger write on the blocking pool.
pub(crate) async fn blocking_write<T, F>(store: &LedgerStore, f: F) -> Result<T, SyncError>
where
    T: Send + 'static,
    F: Fn(&LedgerTxn<'_>) -> Result<T, LedgerError> + Send + 'static,
{
    let store = store.clone();
    let value = tokio::task::spawn_blocking(move || store.write(f)).await??;
    Ok(value)
}
