//! Peer Configuration

use anyhow::Context;
use mcast_node::NodeConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default seconds between stats log lines
pub const STATS_INTERVAL_SECS: u64 = 30;

/// Peer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// Replication settings
    pub node: NodeConfig,
    /// Seconds between stats log lines (0 = never)
    pub stats_interval_secs: u64,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            stats_interval_secs: STATS_INTERVAL_SECS,
        }
    }
}

impl PeerConfig {
    /// Load from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid config file {:?}", path))?;
        Ok(config)
    }
}
