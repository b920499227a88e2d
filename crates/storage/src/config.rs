//! Storage engine configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// What to do with a detached batch when its flush write fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushFailurePolicy {
    /// Drop the batch and log loudly. Messages of that tick are lost.
    #[default]
    Discard,
    /// Put the batch back at the front of the pending buffer and retry on
    /// the next tick.
    Retain,
}

/// Storage engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for partition files; must already exist.
    #[serde(default = "default_commit_dir")]
    pub commit_dir: PathBuf,
    /// Partition flush tick in milliseconds.
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Behaviour when a flush write fails.
    #[serde(default)]
    pub on_flush_error: FlushFailurePolicy,
}

fn default_commit_dir() -> PathBuf {
    PathBuf::from("./commitlog")
}

fn default_flush_interval_ms() -> u64 {
    300
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            commit_dir: default_commit_dir(),
            flush_interval_ms: default_flush_interval_ms(),
            on_flush_error: FlushFailurePolicy::default(),
        }
    }
}

impl StorageConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}
