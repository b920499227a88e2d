//! Per-topic rebalancer.
//!
//! Serialises membership changes for its topic: every join or leave raises
//! the group's barrier, recomputes the partition-to-consumer assignment and
//! lowers the barrier again. A heartbeat verifies the topic still exists in
//! storage; if not, the rebalancer exits and releases the topic's state and
//! its ingress channel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use broker_core::Topic;
use storage::Storage;
use telemetry::metrics;

use crate::broker::TopicHandle;
use crate::state::{GroupMembers, MembershipChange, MembershipState};

pub(crate) struct Rebalancer {
    topic: Topic,
    partitions: usize,
    storage: Arc<dyn Storage>,
    state: Arc<MembershipState>,
    topics: Arc<RwLock<HashMap<Topic, TopicHandle>>>,
    heartbeat: Duration,
    cancel: CancellationToken,
}

impl Rebalancer {
    pub(crate) fn new(
        topic: impl Into<Topic>,
        partitions: usize,
        storage: Arc<dyn Storage>,
        state: Arc<MembershipState>,
        topics: Arc<RwLock<HashMap<Topic, TopicHandle>>>,
        heartbeat: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            topic: topic.into(),
            partitions,
            storage,
            state,
            topics,
            heartbeat,
            cancel,
        }
    }

    pub(crate) async fn run(self, mut changes: mpsc::Receiver<MembershipChange>) {
        let mut heartbeat = tokio::time::interval(self.heartbeat);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                change = changes.recv() => match change {
                    Some(change) => self.rebalance(&change),
                    None => break,
                },
                _ = heartbeat.tick() => {
                    if !self.storage.has_topic(&self.topic) {
                        debug!(topic = %self.topic, "topic gone from storage");
                        break;
                    }
                }
            }
        }

        // Release the topic's resources: membership entries, the broker
        // handle holding the ingress sender, and the listener via the
        // topic token.
        self.state.remove_topic(&self.topic);
        self.topics.write().remove(&self.topic);
        self.cancel.cancel();
        debug!(topic = %self.topic, "rebalancer stopped");
    }

    fn rebalance(&self, change: &MembershipChange) {
        let group = change.group();
        let barrier = self.state.ensure_group(&self.topic, group);
        barrier.raise();

        let mut members = self
            .state
            .snapshot_group(&self.topic, group)
            .unwrap_or_default();

        match change {
            MembershipChange::Join { consumer, .. } => {
                members.insert(*consumer, Vec::new());
            }
            MembershipChange::Leave { consumer, .. } => {
                members.remove(consumer);
                if members.is_empty() {
                    barrier.lower();
                    self.state.remove_group(&self.topic, group);
                    debug!(topic = %self.topic, group, "last member left, group removed");
                    return;
                }
            }
        }

        assign_partitions(&mut members, self.partitions);
        self.state.replace_group(&self.topic, group, members);
        barrier.lower();

        metrics().rebalances.inc();
        debug!(
            topic = %self.topic,
            group,
            consumer = change.consumer(),
            "assignment recomputed"
        );
    }
}

/// How many partitions each member may own after a rebalance.
fn partitions_per_consumer(partitions: usize, consumers: usize) -> usize {
    let per = partitions as f64 / consumers as f64;
    (per + 0.49).round() as usize
}

/// Recomputes the assignment from scratch: members in ascending id order
/// each take their quota of free partitions in ascending partition order.
/// When there are more members than partitions the tail members end up
/// with an empty assignment.
fn assign_partitions(members: &mut GroupMembers, partitions: usize) {
    if members.is_empty() {
        return;
    }

    let quota = partitions_per_consumer(partitions, members.len());
    let mut free = 1..=partitions;
    for assigned in members.values_mut() {
        assigned.clear();
        assigned.extend(free.by_ref().take(quota));
    }
}
