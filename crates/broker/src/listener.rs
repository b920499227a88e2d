//! Per-topic ingress listener.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use broker_core::{Message, Topic};
use storage::Storage;
use telemetry::metrics;

use crate::policy::WritePolicy;

/// Drains a topic's ingress channel and forwards each message through the
/// write policy into storage. Storage writes are buffer appends, so the
/// listener never blocks on I/O.
pub(crate) struct TopicListener {
    topic: Topic,
    storage: Arc<dyn Storage>,
    policy: Box<dyn WritePolicy>,
    cancel: CancellationToken,
}

impl TopicListener {
    pub(crate) fn new(
        topic: impl Into<Topic>,
        storage: Arc<dyn Storage>,
        policy: Box<dyn WritePolicy>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            topic: topic.into(),
            storage,
            policy,
            cancel,
        }
    }

    pub(crate) async fn run(self, mut ingress: mpsc::Receiver<Message>) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                message = ingress.recv() => match message {
                    Some(message) => {
                        metrics().messages_published.inc();
                        let partition = self.policy.partition();
                        self.storage.write(&self.topic, partition, message);
                    }
                    None => break,
                }
            }
        }
        debug!(topic = %self.topic, "topic listener stopped");
    }
}
