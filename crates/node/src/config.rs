use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tally_common::utils::logging::LoggingConfig;

use crate::syncer::SyncOptions;

#[derive(Debug, Deserialize, Clone)]
pub struct IndexerConfig {
    pub data_dir: PathBuf,
    pub node: NodeRpcConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl IndexerConfig {
    pub fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            interval: self.sync.interval(),
            request_timeout: self.node.request_timeout(),
            index_genesis_transactions: self.sync.index_genesis_transactions,
        }
    }
}

/// Connection to the upstream node's JSON-RPC endpoint
#[derive(Debug, Deserialize, Clone)]
pub struct NodeRpcConfig {
    pub rpc_url: String,
    #[serde(default)]
    pub rpc_user: Option<String>,
    #[serde(default)]
    pub rpc_password: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl NodeRpcConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    /// Seconds between sync cycles
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Index the genesis block's transactions instead of storing its header only
    #[serde(default)]
    pub index_genesis_transactions: bool,
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            index_genesis_transactions: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_bind_address")]
    pub bind_address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: default_metrics_bind_address(),
        }
    }
}

fn default_request_timeout_secs() -> u64 { 30 }
fn default_interval_secs() -> u64 { 5 }
fn default_metrics_bind_address() -> String { "0.0.0.0:9090".to_string() }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: IndexerConfig = serde_json::from_str(
            r#"{"data_dir": "data", "node": {"rpc_url": "http://127.0.0.1:9332"}}"#,
        )
        .unwrap();

        assert_eq!(config.node.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.sync.interval(), Duration::from_secs(5));
        assert!(!config.sync.index_genesis_transactions);
        assert!(!config.metrics.enabled);
        assert_eq!(config.metrics.bind_address, "0.0.0.0:9090");
        assert_eq!(config.logging.level, "info");

        let options = config.sync_options();
        assert_eq!(options.interval, Duration::from_secs(5));
        assert_eq!(options.request_timeout, Duration::from_secs(30));
    }
}
