use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::time::Duration;
use tally_common::error::NodeError;
use tally_common::traits::NodeSource;
use tally_common::types::{Hash, NodeBlock, NodeTransaction};
use tracing::trace;

use crate::config::NodeRpcConfig;
use crate::rpc_types::{RpcBlock, RpcTransaction, GET_BLOCK, GET_RAW_TRANSACTION};

/// JSON-RPC client for the upstream full node
pub struct NodeRpcClient {
    rpc_url: String,
    credentials: Option<(String, Option<String>)>,
    client: reqwest::Client,
    timeout: Duration,
}

impl NodeRpcClient {
    pub fn new(config: &NodeRpcConfig) -> Result<Self, NodeError> {
        let timeout = config.request_timeout();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NodeError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            rpc_url: config.rpc_url.clone(),
            credentials: config
                .rpc_user
                .clone()
                .map(|user| (user, config.rpc_password.clone())),
            client,
            timeout,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, NodeError> {
        let payload = json!({
            "jsonrpc": "1.0",
            "id": "tally",
            "method": method,
            "params": params
        });
        trace!(method, %params, "node request");

        let mut request = self.client.post(&self.rpc_url).json(&payload);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        let send = async {
            let response = request.send().await.map_err(|e| transport_error(method, e))?;
            response
                .json::<Value>()
                .await
                .map_err(|e| NodeError::malformed(method, format!("Invalid response: {}", e)))
        };
        let json = tokio::time::timeout(self.timeout, send)
            .await
            .map_err(|_| NodeError::Timeout {
                method: method.to_string(),
            })??;

        match json.get("error") {
            Some(Value::Null) | None => {}
            Some(error) => {
                return Err(NodeError::Rpc {
                    code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
                    message: error
                        .get("message")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| error.to_string()),
                })
            }
        }

        Ok(json.get("result").cloned().unwrap_or(Value::Null))
    }

    async fn call_as<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, NodeError> {
        let result = self.call(method, params).await?;
        serde_json::from_value(result).map_err(|e| NodeError::malformed(method, e.to_string()))
    }
}

fn transport_error(method: &str, err: reqwest::Error) -> NodeError {
    if err.is_timeout() {
        NodeError::Timeout {
            method: method.to_string(),
        }
    } else {
        NodeError::Transport(format!("{} request failed: {}", method, err))
    }
}

#[async_trait]
impl NodeSource for NodeRpcClient {
    async fn get_current_height(&self) -> Result<u64, NodeError> {
        self.call_as("getblockcount", json!([])).await
    }

    async fn get_block_hash(&self, height: u64) -> Result<Hash, NodeError> {
        self.call_as("getblockhash", json!([height])).await
    }

    async fn get_block(&self, height: u64) -> Result<NodeBlock, NodeError> {
        let hash = self.get_block_hash(height).await?;
        let block: RpcBlock = self.call_as(GET_BLOCK, json!([hash.to_string(), 1])).await?;
        if block.height != height || block.hash != hash {
            return Err(NodeError::malformed(
                GET_BLOCK,
                format!("asked for {} at height {}, got {} at {}", hash, height, block.hash, block.height),
            ));
        }
        Ok(block.into())
    }

    async fn get_transaction(&self, txid: &Hash) -> Result<NodeTransaction, NodeError> {
        let tx: RpcTransaction = self
            .call_as(GET_RAW_TRANSACTION, json!([txid.to_string(), true]))
            .await?;
        if tx.txid != *txid {
            return Err(NodeError::malformed(
                GET_RAW_TRANSACTION,
                format!("asked for {}, got {}", txid, tx.txid),
            ));
        }
        NodeTransaction::try_from(tx)
    }

    async fn get_mempool(&self) -> Result<Vec<Hash>, NodeError> {
        self.call_as("getrawmempool", json!([])).await
    }
}
