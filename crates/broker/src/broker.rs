//! Broker façade: topic lifecycle, publishing and subscriptions.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use broker_core::{Error, Message, Result, Topic};
use storage::Storage;
use telemetry::metrics;

use crate::config::BrokerConfig;
use crate::consumer::{self, MessageCallback, Subscription};
use crate::listener::TopicListener;
use crate::policy::RoundRobinWritePolicy;
use crate::rebalancer::Rebalancer;
use crate::state::{MembershipChange, MembershipState};

/// Ingress is deliberately tight: publishers feel backpressure as soon as
/// the listener falls behind.
const INGRESS_CAPACITY: usize = 1;
const CHANGES_CAPACITY: usize = 16;
const DELIVERY_CAPACITY: usize = 1;

/// Per-topic channel endpoints and cancellation scope.
pub(crate) struct TopicHandle {
    pub(crate) ingress: mpsc::Sender<Message>,
    pub(crate) changes: mpsc::Sender<MembershipChange>,
    pub(crate) cancel: CancellationToken,
}

/// Deposits messages into one topic's ingress channel.
#[derive(Debug)]
pub struct Publisher {
    topic: Topic,
    ingress: mpsc::Sender<Message>,
}

impl Publisher {
    /// Sends one message. A message for a topic that has since been
    /// deleted is dropped silently (logged at debug).
    pub async fn send(&self, message: impl Into<Message>) {
        if self.ingress.send(message.into()).await.is_err() {
            debug!(topic = %self.topic, "ingress closed, message dropped");
        }
    }
}

/// In-process partitioned publish/subscribe broker.
pub struct Broker {
    storage: Arc<dyn Storage>,
    config: BrokerConfig,
    state: Arc<MembershipState>,
    topics: Arc<RwLock<HashMap<Topic, TopicHandle>>>,
    root: CancellationToken,
    tasks: TaskTracker,
}

impl Broker {
    pub fn new(storage: Arc<dyn Storage>, config: BrokerConfig) -> Self {
        Self {
            storage,
            config,
            state: Arc::new(MembershipState::new()),
            topics: Arc::new(RwLock::new(HashMap::new())),
            root: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Creates a topic with the given partition count and starts its
    /// rebalancer and ingress listener. A partition count of zero is
    /// normalised to one.
    pub async fn create_topic(&self, topic: &str, partitions: usize) -> Result<()> {
        if topic.is_empty() {
            return Err(Error::validation("topic name can not be empty"));
        }
        let partitions = if partitions == 0 { 1 } else { partitions };

        self.storage.new_topic(topic, partitions).await?;
        self.state.register_topic(topic);

        let (ingress_tx, ingress_rx) = mpsc::channel(INGRESS_CAPACITY);
        let (changes_tx, changes_rx) = mpsc::channel(CHANGES_CAPACITY);
        let cancel = self.root.child_token();

        self.topics.write().insert(
            topic.to_string(),
            TopicHandle {
                ingress: ingress_tx,
                changes: changes_tx,
                cancel: cancel.clone(),
            },
        );

        let rebalancer = Rebalancer::new(
            topic,
            partitions,
            self.storage.clone(),
            self.state.clone(),
            self.topics.clone(),
            self.config.resource_sweep_interval(),
            cancel.clone(),
        );
        self.tasks.spawn(rebalancer.run(changes_rx));

        let listener = TopicListener::new(
            topic,
            self.storage.clone(),
            Box::new(RoundRobinWritePolicy::new(partitions)),
            cancel,
        );
        self.tasks.spawn(listener.run(ingress_rx));

        debug!(topic, partitions, "topic registered");
        Ok(())
    }

    /// Deletes a topic: closes its ingress channel, stops its listener,
    /// rebalancer and flush loops. Partition files stay on disk.
    pub fn delete_topic(&self, topic: &str) -> Result<()> {
        if let Some(handle) = self.topics.write().remove(topic) {
            handle.cancel.cancel();
        }
        self.storage.delete_topic(topic)
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.storage.has_topic(topic)
    }

    /// Returns a handle that deposits messages into the topic's ingress
    /// channel.
    pub fn publish(&self, topic: &str) -> Result<Publisher> {
        let topics = self.topics.read();
        let handle = topics
            .get(topic)
            .ok_or_else(|| Error::topic_not_found(topic))?;

        Ok(Publisher {
            topic: topic.to_string(),
            ingress: handle.ingress.clone(),
        })
    }

    /// Convenience for a one-off publish. Unknown topics are logged and
    /// the message dropped.
    pub async fn write(&self, topic: &str, message: impl Into<Message>) {
        let sender = self.topics.read().get(topic).map(|h| h.ingress.clone());
        match sender {
            Some(sender) => {
                if sender.send(message.into()).await.is_err() {
                    debug!(topic, "ingress closed, message dropped");
                }
            }
            None => warn!(topic, "write to unknown topic dropped"),
        }
    }

    /// Joins `group` on `topic` and starts delivering batches to the
    /// callback. The returned handle unsubscribes when invoked or dropped.
    pub async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        callback: MessageCallback,
    ) -> Result<Subscription> {
        let changes = self
            .topics
            .read()
            .get(topic)
            .map(|h| h.changes.clone())
            .ok_or_else(|| Error::topic_not_found(topic))?;

        let consumer = consumer::next_consumer_id();
        changes
            .send(MembershipChange::Join {
                topic: topic.to_string(),
                group: group.to_string(),
                consumer,
            })
            .await
            .map_err(|_| Error::topic_not_found(topic))?;

        let cancel = self.root.child_token();
        let (delivery_tx, delivery_rx) = mpsc::channel(DELIVERY_CAPACITY);

        self.tasks
            .spawn(consumer::delivery_loop(delivery_rx, callback, cancel.clone()));
        self.tasks.spawn(consumer::poll_loop(
            self.storage.clone(),
            self.state.clone(),
            topic.to_string(),
            group.to_string(),
            consumer,
            changes,
            delivery_tx,
            self.config.batch_size,
            self.config.reclaim_interval(),
            cancel.clone(),
        ));

        metrics().consumers_active.inc();
        debug!(topic, group, consumer, "consumer subscribed");
        Ok(Subscription::new(cancel))
    }

    /// Cancels every topic, consumer and flush loop and waits for them,
    /// bounded by the configured shutdown timeout.
    pub async fn shutdown(&self) -> Result<()> {
        info!("broker shutting down");
        self.root.cancel();
        self.topics.write().clear();
        self.tasks.close();

        let graceful = async {
            self.tasks.wait().await;
            self.storage.close().await
        };

        match tokio::time::timeout(self.config.shutdown_timeout(), graceful).await {
            Ok(result) => {
                info!("broker shutdown complete");
                result
            }
            Err(_) => Err(Error::ShutdownTimeout),
        }
    }
}
