use sled::transaction::{ConflictableTransactionError, TransactionError, UnabortableTransactionError};
use tally_common::error::{ConsistencyError, ErrorClass};
use thiserror::Error;

/// Ledger store errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    /// Raised by reads and writes inside a sled transaction; sled retries the
    /// whole unit when this escapes the closure.
    #[error("Transaction conflict: {0}")]
    Conflict(#[from] UnabortableTransactionError),
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Database(_) | LedgerError::Conflict(_) => ErrorClass::Transient,
            LedgerError::Codec(_) | LedgerError::Consistency(_) => ErrorClass::Fatal,
        }
    }

    pub fn as_consistency(&self) -> Option<&ConsistencyError> {
        match self {
            LedgerError::Consistency(err) => Some(err),
            _ => None,
        }
    }

    pub(crate) fn into_conflictable(self) -> ConflictableTransactionError<LedgerError> {
        match self {
            LedgerError::Conflict(err) => err.into(),
            other => ConflictableTransactionError::Abort(other),
        }
    }

    pub(crate) fn from_transaction(err: TransactionError<LedgerError>) -> Self {
        match err {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => LedgerError::Database(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
