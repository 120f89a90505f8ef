#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tally_common::error::NodeError;
use tally_common::traits::NodeSource;
use tally_common::types::{
    Amount, Currency, Hash, NodeBlock, NodeInput, NodeOutput, NodeTransaction, OutPoint, OutputValue, Timelock, COIN,
};
use tally_node::syncer::{BlockSyncer, SyncOptions};
use tally_storage::LedgerStore;
use tempfile::TempDir;

/// Deterministic hash for a short tag, e.g. `hash_of("h2'")`.
pub fn hash_of(tag: &str) -> Hash {
    assert!(tag.len() <= 32, "tag too long: {}", tag);
    let mut bytes = [0u8; 32];
    bytes[..tag.len()].copy_from_slice(tag.as_bytes());
    Hash(bytes)
}

pub fn coins(n: u64) -> Amount {
    Amount(n * COIN)
}

pub fn native(address: &str, amount: Amount) -> (String, OutputValue) {
    (address.to_string(), OutputValue::Native { amount })
}

pub fn token(address: &str, name: &str, amount: Amount, timelock: u64) -> (String, OutputValue) {
    (
        address.to_string(),
        OutputValue::Token {
            name: Currency::from(name),
            amount,
            timelock: Timelock(timelock),
        },
    )
}

fn outputs(values: Vec<(String, OutputValue)>) -> Vec<NodeOutput> {
    values
        .into_iter()
        .enumerate()
        .map(|(n, (address, value))| NodeOutput {
            n: n as u32,
            script_type: "pubkeyhash".to_string(),
            script_hex: "76a914".to_string(),
            addresses: vec![address],
            value,
            timelock: None,
        })
        .collect()
}

pub fn coinbase(tag: &str, values: Vec<(String, OutputValue)>) -> NodeTransaction {
    NodeTransaction {
        txid: hash_of(tag),
        time: Some(1_700_000_000),
        locktime: 0,
        size: 120,
        amount: Amount::ZERO,
        inputs: vec![NodeInput::Coinbase],
        outputs: outputs(values),
    }
}

pub fn transfer(tag: &str, spends: &[OutPoint], values: Vec<(String, OutputValue)>) -> NodeTransaction {
    NodeTransaction {
        txid: hash_of(tag),
        time: Some(1_700_000_000),
        locktime: 0,
        size: 250,
        amount: Amount::ZERO,
        inputs: spends
            .iter()
            .map(|prevout| NodeInput::Spend {
                prevout: *prevout,
                sequence: u32::MAX as u64,
            })
            .collect(),
        outputs: outputs(values),
    }
}

/// Block `tag` at `height` on top of `parent`, listing `txids` in order.
pub fn block(tag: &str, height: u64, parent: Option<&str>, txids: Vec<Hash>) -> NodeBlock {
    NodeBlock {
        hash: hash_of(tag),
        height,
        previous: parent.map(hash_of),
        time: 1_700_000_000 + height as i64 * 60,
        merkleroot: format!("merkle-{}", tag),
        chainwork: format!("{:064x}", height + 1),
        version: 4,
        weight: 800,
        bits: "1e0ffff0".to_string(),
        nonce: height,
        size: 200,
        reward: coins(10),
        stake: false,
        signature: None,
        tx: txids,
    }
}

/// Block whose transactions are all registered with the node.
pub fn block_with(tag: &str, height: u64, parent: Option<&str>, txs: Vec<NodeTransaction>) -> (NodeBlock, Vec<NodeTransaction>) {
    let txids = txs.iter().map(|tx| tx.txid).collect();
    (block(tag, height, parent, txids), txs)
}

#[derive(Default)]
struct MockChain {
    blocks: Vec<NodeBlock>,
    txs: HashMap<Hash, NodeTransaction>,
    fail_calls: usize,
    failing_txids: Vec<Hash>,
    block_fetches: usize,
    pending_fork: Option<PendingFork>,
}

struct PendingFork {
    after_fetches: usize,
    keep_height: u64,
    blocks: Vec<(NodeBlock, Vec<NodeTransaction>)>,
}

impl MockChain {
    fn push(&mut self, block: NodeBlock, txs: Vec<NodeTransaction>) {
        assert_eq!(block.height as usize, self.blocks.len(), "blocks must be pushed in height order");
        for tx in txs {
            self.txs.insert(tx.txid, tx);
        }
        self.blocks.push(block);
    }

    fn replace_above(&mut self, keep_height: u64, blocks: Vec<(NodeBlock, Vec<NodeTransaction>)>) {
        self.blocks.truncate(keep_height as usize + 1);
        for (block, txs) in blocks {
            self.push(block, txs);
        }
    }

    fn check_failure(&mut self) -> Result<(), NodeError> {
        if self.fail_calls > 0 {
            self.fail_calls -= 1;
            return Err(NodeError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}

/// Scripted in-memory node. Transactions stay queryable after the block that
/// carried them is replaced, as they would on a real node.
#[derive(Default)]
pub struct MockNode {
    chain: Mutex<MockChain>,
}

impl MockNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_block(&self, block: NodeBlock, txs: Vec<NodeTransaction>) {
        self.chain.lock().unwrap().push(block, txs);
    }

    pub fn push(&self, (block, txs): (NodeBlock, Vec<NodeTransaction>)) {
        self.push_block(block, txs);
    }

    /// Drops every block above `keep_height` and appends `blocks`.
    pub fn reorganize(&self, keep_height: u64, blocks: Vec<(NodeBlock, Vec<NodeTransaction>)>) {
        self.chain.lock().unwrap().replace_above(keep_height, blocks);
    }

    /// Replaces the whole chain, genesis included.
    pub fn replace_chain(&self, blocks: Vec<(NodeBlock, Vec<NodeTransaction>)>) {
        let mut chain = self.chain.lock().unwrap();
        chain.blocks.clear();
        for (block, txs) in blocks {
            chain.push(block, txs);
        }
    }

    /// Performs [`reorganize`](Self::reorganize) right after the next `fetches` block downloads.
    pub fn reorganize_after_fetches(
        &self,
        fetches: usize,
        keep_height: u64,
        blocks: Vec<(NodeBlock, Vec<NodeTransaction>)>,
    ) {
        let mut chain = self.chain.lock().unwrap();
        let after_fetches = chain.block_fetches + fetches;
        chain.pending_fork = Some(PendingFork {
            after_fetches,
            keep_height,
            blocks,
        });
    }

    /// The next `n` calls of any kind fail with a transport error.
    pub fn fail_next_calls(&self, n: usize) {
        self.chain.lock().unwrap().fail_calls = n;
    }

    pub fn fail_transaction(&self, txid: Hash) {
        self.chain.lock().unwrap().failing_txids.push(txid);
    }

    pub fn heal(&self) {
        let mut chain = self.chain.lock().unwrap();
        chain.fail_calls = 0;
        chain.failing_txids.clear();
    }

    pub fn height(&self) -> u64 {
        self.chain.lock().unwrap().blocks.len() as u64 - 1
    }

    pub fn hash_at(&self, height: u64) -> Hash {
        self.chain.lock().unwrap().blocks[height as usize].hash
    }
}

#[async_trait]
impl NodeSource for MockNode {
    async fn get_current_height(&self) -> Result<u64, NodeError> {
        let mut chain = self.chain.lock().unwrap();
        chain.check_failure()?;
        Ok(chain.blocks.len() as u64 - 1)
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash, NodeError> {
        let mut chain = self.chain.lock().unwrap();
        chain.check_failure()?;
        chain
            .blocks
            .get(height as usize)
            .map(|block| block.hash)
            .ok_or_else(|| NodeError::Rpc {
                code: -8,
                message: "Block height out of range".to_string(),
            })
    }

    async fn get_block(&self, height: u64) -> Result<NodeBlock, NodeError> {
        let mut chain = self.chain.lock().unwrap();
        chain.check_failure()?;
        let block = chain.blocks.get(height as usize).cloned().ok_or_else(|| NodeError::Rpc {
            code: -8,
            message: "Block height out of range".to_string(),
        })?;

        chain.block_fetches += 1;
        let due = matches!(&chain.pending_fork, Some(fork) if fork.after_fetches == chain.block_fetches);
        if due {
            if let Some(fork) = chain.pending_fork.take() {
                chain.replace_above(fork.keep_height, fork.blocks);
            }
        }
        Ok(block)
    }

    async fn get_transaction(&self, txid: &Hash) -> Result<NodeTransaction, NodeError> {
        let mut chain = self.chain.lock().unwrap();
        chain.check_failure()?;
        if chain.failing_txids.contains(txid) {
            return Err(NodeError::Transport("connection reset".to_string()));
        }
        chain.txs.get(txid).cloned().ok_or_else(|| NodeError::Rpc {
            code: -5,
            message: "No such mempool or blockchain transaction".to_string(),
        })
    }

    async fn get_mempool(&self) -> Result<Vec<Hash>, NodeError> {
        let mut chain = self.chain.lock().unwrap();
        chain.check_failure()?;
        Ok(Vec::new())
    }
}

pub fn options() -> SyncOptions {
    SyncOptions {
        interval: Duration::from_millis(10),
        request_timeout: Duration::from_secs(5),
        index_genesis_transactions: false,
    }
}

pub struct Harness {
    pub temp_dir: TempDir,
    pub node: Arc<MockNode>,
    pub store: LedgerStore,
    pub syncer: BlockSyncer<MockNode>,
}

impl Harness {
    pub fn new(node: Arc<MockNode>) -> Self {
        Self::with_options(node, options())
    }

    pub fn with_options(node: Arc<MockNode>, options: SyncOptions) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let store = LedgerStore::open(temp_dir.path().join("ledger")).unwrap();
        let syncer = BlockSyncer::new(node.clone(), store.clone(), options).unwrap();
        Self {
            temp_dir,
            node,
            store,
            syncer,
        }
    }

    /// Every balance row agrees with the unspent outputs behind it.
    pub fn assert_conserved(&self) {
        let mismatches = self.store.verify_balances().unwrap();
        assert!(mismatches.is_empty(), "balance mismatches: {:?}", mismatches);
    }

    pub fn total(&self, address: &str, currency: &Currency) -> Amount {
        self.store
            .address_balances(address)
            .unwrap()
            .into_iter()
            .find(|view| &view.currency == currency)
            .map(|view| view.total)
            .unwrap_or(Amount::ZERO)
    }
}

/// Genesis plus one block paying 100 coins to `A`.
pub fn funded_chain() -> Arc<MockNode> {
    let node = MockNode::new();
    node.push_block(block("g", 0, None, vec![hash_of("cb0")]), vec![]);
    node.push(block_with("h1", 1, Some("g"), vec![coinbase("cb1", vec![native("A", coins(100))])]));
    node
}
