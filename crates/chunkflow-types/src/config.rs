//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `config.toml` that controls
//! fan-out concurrency, deadlines, paging and keep-alive cadence.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the chunked workflow engine.
///
/// Loaded from `~/.chunkflow/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum chunks executed concurrently within one shard call.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for a single step callback, in seconds.
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,

    /// Deadline for a batch cache fill, in seconds.
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,

    /// Page size used when a start request does not specify one.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,

    /// Interval between keep-alive signals during auto-complete runs.
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// Maximum preview rows returned from `start`.
    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,
}

fn default_max_concurrency() -> usize {
    4
}

fn default_step_timeout_secs() -> u64 {
    300
}

fn default_fetch_timeout_secs() -> u64 {
    60
}

fn default_batch_size() -> usize {
    25
}

fn default_heartbeat_interval_secs() -> u64 {
    15
}

fn default_preview_limit() -> usize {
    5
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            step_timeout_secs: default_step_timeout_secs(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            default_batch_size: default_batch_size(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            preview_limit: default_preview_limit(),
        }
    }
}

impl EngineConfig {
    /// Clamp every field to its minimum usable value.
    pub fn normalized(mut self) -> Self {
        self.max_concurrency = self.max_concurrency.max(1);
        self.step_timeout_secs = self.step_timeout_secs.max(1);
        self.fetch_timeout_secs = self.fetch_timeout_secs.max(1);
        self.default_batch_size = self.default_batch_size.max(1);
        self.heartbeat_interval_secs = self.heartbeat_interval_secs.max(1);
        self
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}
