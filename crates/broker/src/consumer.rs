//! Consumer poll and delivery loops.
//!
//! Each subscription runs two tasks. The poll task waits out any rebalance
//! in progress, snapshots its assigned partitions and committed offsets,
//! reads one bounded batch per partition from storage and merges the
//! advanced offsets back. The delivery task owns the user callback and
//! receives batches over a bounded intra-consumer channel, so ordering
//! within a partition is preserved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use broker_core::{ConsumerId, Group, Message, Offset, Partition, Topic};
use storage::Storage;
use telemetry::metrics;

use crate::state::{MembershipChange, MembershipState};

/// Callback invoked with each delivered batch of messages.
pub type MessageCallback = Box<dyn FnMut(Vec<Message>) + Send>;

/// Handle owned by the subscriber. Unsubscribing (or dropping the handle)
/// cancels both consumer tasks; the poll task emits the `Leave` event on
/// its way out.
#[derive(Debug)]
pub struct Subscription {
    cancel: CancellationToken,
}

impl Subscription {
    pub(crate) fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Draws a fresh random 63-bit consumer id from the OS CSPRNG.
pub(crate) fn next_consumer_id() -> ConsumerId {
    use rand::Rng;
    rand::rngs::OsRng.gen_range(1..ConsumerId::MAX)
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn poll_loop(
    storage: Arc<dyn Storage>,
    state: Arc<MembershipState>,
    topic: Topic,
    group: Group,
    consumer: ConsumerId,
    changes: mpsc::Sender<MembershipChange>,
    deliveries: mpsc::Sender<Vec<Message>>,
    batch_size: Offset,
    reclaim_interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(reclaim_interval);

    'poll: loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Wait out any rebalance in progress before trusting the
        // assignment snapshot.
        let Some(barrier) = state.barrier(&topic, &group) else {
            continue;
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = barrier.wait_idle() => {}
        }

        let (partitions, offsets) = state.assignment(&topic, &group, consumer);
        if partitions.is_empty() {
            continue;
        }

        let mut advanced: HashMap<Partition, Offset> = HashMap::new();
        for partition in partitions {
            let committed = offsets.get(&partition).copied().unwrap_or(0);
            let messages = match storage
                .read(&topic, partition, committed + 1, committed + batch_size)
                .await
            {
                Ok(messages) => messages,
                Err(e) => {
                    warn!(
                        topic = %topic,
                        partition,
                        error = %e,
                        "partition read failed, skipped for this tick"
                    );
                    continue;
                }
            };

            if messages.is_empty() {
                continue;
            }

            let next = committed + messages.len() as Offset;
            if deliveries.send(messages).await.is_err() {
                break 'poll;
            }
            advanced.insert(partition, next);
        }

        if !advanced.is_empty() {
            state.commit_offsets(&topic, &group, &advanced);
        }
    }

    let _ = changes
        .send(MembershipChange::Leave {
            topic: topic.clone(),
            group: group.clone(),
            consumer,
        })
        .await;

    metrics().consumers_active.dec();
    debug!(topic = %topic, group = %group, consumer, "consumer poll loop stopped");
}

pub(crate) async fn delivery_loop(
    mut deliveries: mpsc::Receiver<Vec<Message>>,
    mut callback: MessageCallback,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            batch = deliveries.recv() => match batch {
                Some(batch) => {
                    metrics().messages_delivered.inc_by(batch.len() as u64);
                    callback(batch);
                }
                None => break,
            }
        }
    }
}
