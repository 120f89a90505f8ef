use async_trait::async_trait;

use crate::error::NodeError;
use crate::types::{Hash, NodeBlock, NodeTransaction};

/// Request/response view of the upstream full node.
#[async_trait]
pub trait NodeSource: Send + Sync {
    async fn get_current_height(&self) -> Result<u64, NodeError>;
    async fn get_block_hash(&self, height: u64) -> Result<Hash, NodeError>;
    async fn get_block(&self, height: u64) -> Result<NodeBlock, NodeError>;
    async fn get_transaction(&self, txid: &Hash) -> Result<NodeTransaction, NodeError>;
    async fn get_mempool(&self) -> Result<Vec<Hash>, NodeError>;
}
