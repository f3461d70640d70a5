/// Peer sync configuration.
///
/// Operational parameters for synchronization: intervals, batch sizes and
/// filter gating. Every field has a default so a partial YAML file is enough.
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use containers::MAX_INV_PER_MSG;
use serde::Deserialize;

/// Interval at which the dispatch loop checks whether sync has stalled.
pub const STALL_SAMPLE_INTERVAL_SECS: u64 = 300;

/// Maximum orphan parents requested in a single get-blocks request.
pub const MAX_BLOCKS_PER_REQUEST: usize = 64;

/// Main-height lead of the sync target above which the node is in
/// long-sync mode.
pub const LONG_SYNC_THRESHOLD: u64 = 1_000;

/// Lowest protocol version allowed to send bloom filter messages.
pub const BLOOM_FILTER_PROTOCOL_VERSION: u32 = 11;

/// How long to wait for a peer's graph state answer.
pub const GRAPH_STATE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub stall_sample_interval_secs: u64,
    pub max_blocks_per_request: usize,
    pub max_inv_per_msg: usize,
    pub long_sync_threshold: u64,
    /// Whether this node serves bloom filtered peers.
    pub enable_bloom_filters: bool,
    pub bloom_filter_protocol_version: u32,
    pub graph_state_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stall_sample_interval_secs: STALL_SAMPLE_INTERVAL_SECS,
            max_blocks_per_request: MAX_BLOCKS_PER_REQUEST,
            max_inv_per_msg: MAX_INV_PER_MSG,
            long_sync_threshold: LONG_SYNC_THRESHOLD,
            enable_bloom_filters: true,
            bloom_filter_protocol_version: BLOOM_FILTER_PROTOCOL_VERSION,
            graph_state_timeout_secs: GRAPH_STATE_TIMEOUT_SECS,
        }
    }
}

impl SyncConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: SyncConfig = serde_yaml::from_str(yaml).context("invalid sync config")?;
        Ok(config.sanitized())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read sync config {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    pub fn stall_sample_interval(&self) -> Duration {
        Duration::from_secs(self.stall_sample_interval_secs)
    }

    pub fn graph_state_timeout(&self) -> Duration {
        Duration::from_secs(self.graph_state_timeout_secs)
    }

    /// Clamp values the dispatch loop cannot run with.
    pub(crate) fn sanitized(mut self) -> Self {
        self.stall_sample_interval_secs = self.stall_sample_interval_secs.max(1);
        self.graph_state_timeout_secs = self.graph_state_timeout_secs.max(1);
        self.max_blocks_per_request = self.max_blocks_per_request.max(1);
        self.max_inv_per_msg = self.max_inv_per_msg.clamp(1, MAX_INV_PER_MSG);
        self
    }
}
