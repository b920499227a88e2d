//! Broker configuration.

use broker_core::Offset;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Broker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Consumer poll tick in milliseconds.
    #[serde(default = "default_reclaim_interval_ms")]
    pub reclaim_interval_ms: u64,
    /// Max messages a consumer polls per partition per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: Offset,
    /// How often a topic's rebalancer verifies the topic still exists in
    /// storage, in milliseconds.
    #[serde(default = "default_resource_sweep_interval_ms")]
    pub resource_sweep_interval_ms: u64,
    /// Hard deadline for graceful shutdown, in milliseconds.
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_reclaim_interval_ms() -> u64 {
    150
}

fn default_batch_size() -> Offset {
    15
}

fn default_resource_sweep_interval_ms() -> u64 {
    10_000
}

fn default_shutdown_timeout_ms() -> u64 {
    5_000
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            reclaim_interval_ms: default_reclaim_interval_ms(),
            batch_size: default_batch_size(),
            resource_sweep_interval_ms: default_resource_sweep_interval_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl BrokerConfig {
    pub fn reclaim_interval(&self) -> Duration {
        Duration::from_millis(self.reclaim_interval_ms)
    }

    pub fn resource_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.resource_sweep_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
