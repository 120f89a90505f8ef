use anyhow::Result;
use std::path::{Path, PathBuf};
use tally_common::utils::config::load_config;
use tally_node::IndexerConfig;

/// Environment variables starting with this prefix override file values.
pub const ENV_PREFIX: &str = "TALLY";

pub fn load_indexer_config<P: AsRef<Path>>(path: P, data_dir_override: Option<PathBuf>) -> Result<IndexerConfig> {
    let mut config: IndexerConfig = load_config(path, ENV_PREFIX)?;

    if let Some(dd) = data_dir_override {
        config.data_dir = dd;
    }

    Ok(config)
}
