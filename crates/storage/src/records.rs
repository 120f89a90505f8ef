//! Persisted entities of the ledger.

use serde::{Deserialize, Serialize};
use tally_common::types::{Amount, ChainTip, Currency, Hash, NodeBlock, OutPoint, Timelock};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub hash: Hash,
    pub height: u64,
    pub previous: Option<Hash>,
    pub time: i64,
    pub merkleroot: String,
    pub chainwork: String,
    pub version: i64,
    pub weight: u64,
    pub bits: String,
    pub nonce: u64,
    pub size: u64,
    pub reward: Amount,
    pub stake: bool,
    pub signature: Option<String>,
    /// Indexed transactions in block order.
    pub txids: Vec<Hash>,
}

impl BlockRecord {
    pub fn from_node(block: &NodeBlock, txids: Vec<Hash>) -> Self {
        Self {
            hash: block.hash,
            height: block.height,
            previous: block.previous,
            time: block.time,
            merkleroot: block.merkleroot.clone(),
            chainwork: block.chainwork.clone(),
            version: block.version,
            weight: block.weight,
            bits: block.bits.clone(),
            nonce: block.nonce,
            size: block.size,
            reward: block.reward,
            stake: block.stake,
            signature: block.signature.clone(),
            txids,
        }
    }

    pub fn tip(&self) -> ChainTip {
        ChainTip {
            height: self.height,
            hash: self.hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Surrogate id; orders transactions by creation.
    pub id: u64,
    pub txid: Hash,
    pub block_height: u64,
    pub block_hash: Hash,
    pub position: u32,
    pub time: Option<i64>,
    pub locktime: u32,
    pub size: u64,
    pub amount: Amount,
    pub coinbase: bool,
    pub coinstake: bool,
    /// `vin` positions that spent an output.
    pub inputs: Vec<u32>,
    /// `n` of every recorded output.
    pub outputs: Vec<u32>,
    /// Currencies with a transaction index row.
    pub currencies: Vec<Currency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpentBy {
    pub txid: Hash,
    pub vin: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub outpoint: OutPoint,
    pub tx_id: u64,
    pub block_height: u64,
    pub address: String,
    pub currency: Currency,
    pub amount: Amount,
    pub timelock: Timelock,
    pub script_type: String,
    pub script_hex: String,
    pub spent_by: Option<SpentBy>,
}

impl OutputRecord {
    pub fn is_spent(&self) -> bool {
        self.spent_by.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub txid: Hash,
    pub vin: u32,
    pub prevout: OutPoint,
    pub sequence: u64,
    pub address: String,
    pub currency: Currency,
    pub amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    pub address: String,
    pub first_seen: u64,
    /// Live output rows paying this address; the row goes away at zero.
    pub outputs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub address: String,
    pub currency: Currency,
    pub amount: Amount,
    pub outputs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxIndexRecord {
    pub tx_id: u64,
    pub txid: Hash,
    pub currency: Currency,
    pub amount: Amount,
    pub block_height: u64,
}

/// Unspent output as seen from its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub outpoint: OutPoint,
    pub address: String,
    pub currency: Currency,
    pub amount: Amount,
    pub timelock: Timelock,
    pub block_height: u64,
}

impl From<&OutputRecord> for UtxoEntry {
    fn from(output: &OutputRecord) -> Self {
        Self {
            outpoint: output.outpoint,
            address: output.address.clone(),
            currency: output.currency.clone(),
            amount: output.amount,
            timelock: output.timelock,
            block_height: output.block_height,
        }
    }
}
