pub mod config;
pub mod metrics;
pub mod metrics_server;
pub mod rpc_client;
pub mod rpc_types;
pub mod service;
pub mod syncer;

pub use config::IndexerConfig;
pub use service::{IndexerService, IndexerStatus};
