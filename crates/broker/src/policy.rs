//! Partition routing for published messages.

use broker_core::Partition;
use std::sync::atomic::{AtomicU64, Ordering};

/// Assigns an incoming message to one partition of its topic.
pub trait WritePolicy: Send + Sync {
    fn partition(&self) -> Partition;
}

/// Cycles through the topic's partitions in order.
///
/// Concurrent callers observe distinct, strictly successive partitions
/// modulo the partition count.
pub struct RoundRobinWritePolicy {
    partitions: Vec<Partition>,
    next: AtomicU64,
}

impl RoundRobinWritePolicy {
    pub fn new(partitions: usize) -> Self {
        Self {
            partitions: (1..=partitions).collect(),
            next: AtomicU64::new(0),
        }
    }
}

impl WritePolicy for RoundRobinWritePolicy {
    fn partition(&self) -> Partition {
        let n = self.next.fetch_add(1, Ordering::Relaxed) as usize;
        self.partitions[n % self.partitions.len()]
    }
}
