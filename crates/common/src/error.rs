use thiserror::Error;

use crate::types::{Currency, Hash, OutPoint};

/// How the sync loop reacts to a failed cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried on the next scheduled cycle; the ledger is untouched.
    Transient,
    /// The node and the ledger disagree about history; needs an operator.
    Fatal,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
        }
    }
}

/// Errors talking to the upstream node
#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {method}")]
    Timeout { method: String },

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed response to {method}: {reason}")]
    Malformed { method: String, reason: String },
}

impl NodeError {
    pub fn malformed(method: &str, reason: impl Into<String>) -> Self {
        NodeError::Malformed {
            method: method.to_string(),
            reason: reason.into(),
        }
    }
}

/// Ledger state contradicts the data being written or removed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConsistencyError {
    #[error("Referenced output not found: {0}")]
    MissingOutput(OutPoint),

    #[error("Output {outpoint} already spent by {spent_by}")]
    DoubleSpend { outpoint: OutPoint, spent_by: Hash },

    #[error("No balance row for {address} in {currency}")]
    MissingBalance { address: String, currency: Currency },

    #[error("No address row for {0}")]
    MissingAddress(String),

    #[error("Balance of {address} in {currency} would go negative")]
    BalanceUnderflow { address: String, currency: Currency },

    #[error("Amount overflow for {address} in {currency}")]
    AmountOverflow { address: String, currency: Currency },

    #[error("Transaction {0} already stored in another block")]
    DuplicateTransaction(Hash),

    #[error("Output {0} already exists")]
    DuplicateOutput(OutPoint),

    #[error("Height {height} already holds block {existing}")]
    HeightConflict { height: u64, existing: Hash },

    #[error("Block at height {height} does not extend tip at height {tip_height}")]
    NonContiguous { height: u64, tip_height: u64 },

    #[error("Block {block} has parent {parent:?}, tip is {tip}")]
    ParentMismatch {
        block: Hash,
        parent: Option<Hash>,
        tip: Hash,
    },

    #[error("Transaction {txid} does not belong to block {block}")]
    UnexpectedTransaction { block: Hash, txid: Hash },

    #[error("Block not found: {0}")]
    MissingBlock(Hash),

    #[error("Transaction not found: {0}")]
    MissingTransaction(Hash),

    #[error("Input {vin} of transaction {txid} not found")]
    MissingInput { txid: Hash, vin: u32 },

    #[error("Output {outpoint} is still spent by {spent_by}")]
    OutputStillSpent { outpoint: OutPoint, spent_by: Hash },

    #[error("Stored tip {stored} does not match expected {expected}")]
    TipMismatch { stored: Hash, expected: Hash },

    #[error("Refusing to unwind the genesis block")]
    GenesisUnwind,
}
