//! Authoritative membership state for all topics and consumer groups.
//!
//! One readers-writer lock guards the three maps (assignments, offsets,
//! rebalance barriers). Consumers take the read lock to snapshot their
//! assignment and the write lock to merge advanced offsets; the rebalancer
//! is the only writer of assignments. Nobody holds the lock across storage
//! calls or user callbacks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;

use broker_core::{ConsumerId, Group, Offset, Partition, Topic};

/// A membership event observed by a topic's rebalancer.
#[derive(Debug, Clone)]
pub enum MembershipChange {
    Join {
        topic: Topic,
        group: Group,
        consumer: ConsumerId,
    },
    Leave {
        topic: Topic,
        group: Group,
        consumer: ConsumerId,
    },
}

impl MembershipChange {
    pub fn group(&self) -> &str {
        match self {
            Self::Join { group, .. } | Self::Leave { group, .. } => group,
        }
    }

    pub fn consumer(&self) -> ConsumerId {
        match self {
            Self::Join { consumer, .. } | Self::Leave { consumer, .. } => *consumer,
        }
    }
}

/// Counter that is non-zero while a rebalance is in progress.
///
/// The rebalancer raises it before mutating assignments and lowers it
/// after; consumers wait for it to fall to zero before snapshotting their
/// assignment, so they never observe a half-updated one.
pub struct RebalanceBarrier {
    count: watch::Sender<u32>,
}

impl RebalanceBarrier {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self { count }
    }

    pub fn raise(&self) {
        self.count.send_modify(|c| *c += 1);
    }

    pub fn lower(&self) {
        self.count.send_modify(|c| *c = c.saturating_sub(1));
    }

    /// Waits until no rebalance is in progress.
    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        loop {
            if *rx.borrow_and_update() == 0 {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for RebalanceBarrier {
    fn default() -> Self {
        Self::new()
    }
}

/// Partition assignment of one consumer group, keyed by consumer id.
/// BTreeMap keeps rebalancing iteration order deterministic.
pub type GroupMembers = BTreeMap<ConsumerId, Vec<Partition>>;

#[derive(Default)]
struct StateInner {
    consumers: HashMap<Topic, HashMap<Group, GroupMembers>>,
    offsets: HashMap<Topic, HashMap<Group, HashMap<Partition, Offset>>>,
    barriers: HashMap<Topic, HashMap<Group, Arc<RebalanceBarrier>>>,
}

/// Process-wide membership state: `{topic → group → consumer → partitions}`,
/// `{topic → group → partition → offset}` and the per-group rebalance
/// barriers.
#[derive(Default)]
pub struct MembershipState {
    inner: RwLock<StateInner>,
}

impl MembershipState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_topic(&self, topic: &str) {
        let mut inner = self.inner.write();
        inner.consumers.entry(topic.to_string()).or_default();
        inner.offsets.entry(topic.to_string()).or_default();
        inner.barriers.entry(topic.to_string()).or_default();
    }

    pub fn remove_topic(&self, topic: &str) {
        let mut inner = self.inner.write();
        inner.consumers.remove(topic);
        inner.offsets.remove(topic);
        inner.barriers.remove(topic);
    }

    /// Creates the group's assignment, offsets and barrier entries if
    /// absent and returns the barrier.
    pub fn ensure_group(&self, topic: &str, group: &str) -> Arc<RebalanceBarrier> {
        let mut inner = self.inner.write();
        inner
            .consumers
            .entry(topic.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default();
        inner
            .offsets
            .entry(topic.to_string())
            .or_default()
            .entry(group.to_string())
            .or_default();
        inner
            .barriers
            .entry(topic.to_string())
            .or_default()
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(RebalanceBarrier::new()))
            .clone()
    }

    pub fn remove_group(&self, topic: &str, group: &str) {
        let mut inner = self.inner.write();
        if let Some(groups) = inner.consumers.get_mut(topic) {
            groups.remove(group);
        }
        if let Some(groups) = inner.offsets.get_mut(topic) {
            groups.remove(group);
        }
        if let Some(groups) = inner.barriers.get_mut(topic) {
            groups.remove(group);
        }
    }

    pub fn barrier(&self, topic: &str, group: &str) -> Option<Arc<RebalanceBarrier>> {
        let inner = self.inner.read();
        inner.barriers.get(topic)?.get(group).cloned()
    }

    pub fn snapshot_group(&self, topic: &str, group: &str) -> Option<GroupMembers> {
        let inner = self.inner.read();
        inner.consumers.get(topic)?.get(group).cloned()
    }

    pub fn replace_group(&self, topic: &str, group: &str, members: GroupMembers) {
        let mut inner = self.inner.write();
        if let Some(groups) = inner.consumers.get_mut(topic) {
            groups.insert(group.to_string(), members);
        }
    }

    /// Snapshot of one consumer's assigned partitions and their committed
    /// offsets.
    pub fn assignment(
        &self,
        topic: &str,
        group: &str,
        consumer: ConsumerId,
    ) -> (Vec<Partition>, HashMap<Partition, Offset>) {
        let inner = self.inner.read();
        let partitions = inner
            .consumers
            .get(topic)
            .and_then(|groups| groups.get(group))
            .and_then(|members| members.get(&consumer))
            .cloned()
            .unwrap_or_default();

        let committed = inner
            .offsets
            .get(topic)
            .and_then(|groups| groups.get(group));
        let offsets = partitions
            .iter()
            .map(|p| {
                let offset = committed.and_then(|o| o.get(p)).copied().unwrap_or(0);
                (*p, offset)
            })
            .collect();

        (partitions, offsets)
    }

    /// Merges advanced offsets back. Committed offsets never move backwards.
    pub fn commit_offsets(&self, topic: &str, group: &str, updates: &HashMap<Partition, Offset>) {
        let mut inner = self.inner.write();
        let Some(offsets) = inner
            .offsets
            .get_mut(topic)
            .and_then(|groups| groups.get_mut(group))
        else {
            return;
        };

        for (&partition, &offset) in updates {
            let committed = offsets.entry(partition).or_insert(0);
            if offset > *committed {
                *committed = offset;
            }
        }
    }
}
