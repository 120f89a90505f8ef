use tally_common::error::{ConsistencyError, ErrorClass, NodeError};
use tally_common::types::Hash;
use tally_storage::LedgerError;
use thiserror::Error;

/// Why a sync cycle ended early
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Ledger task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Stored genesis {stored} is not canonical, node reports {canonical}")]
    GenesisNotCanonical { stored: Hash, canonical: Hash },

    #[error("Chain kept reorganizing at height {height} after {forks} rewinds")]
    UnstableChain { height: u64, forks: u32 },

    #[error("Sync halted by an earlier fatal error")]
    Halted,
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Node(_) | SyncError::UnstableChain { .. } => ErrorClass::Transient,
            SyncError::Ledger(err) => err.class(),
            SyncError::Join(_) | SyncError::GenesisNotCanonical { .. } | SyncError::Halted => ErrorClass::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    pub fn as_consistency(&self) -> Option<&ConsistencyError> {
        match self {
            SyncError::Ledger(err) => err.as_consistency(),
            _ => None,
        }
    }
}
