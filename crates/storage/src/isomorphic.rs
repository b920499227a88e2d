//! The "isomorphic" memory+file storage engine.
//!
//! Hot writes land in per-partition pending buffers; a flush loop per
//! partition detaches the buffer on every tick and appends it to the
//! partition file as one newline-terminated block. Reads scan the file by
//! line number, so consumers only ever observe persisted messages.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use broker_core::{Error, Message, Offset, Partition, Result, Topic};
use telemetry::metrics;

use crate::config::{FlushFailurePolicy, StorageConfig};
use crate::{file, Storage};

/// Append-only state for one (topic, partition).
///
/// The pending buffer is guarded by the engine-wide lock; the backing file
/// is owned by the partition's flush loop, readers re-open it by path.
struct PartitionLog {
    pending: Vec<Message>,
    path: PathBuf,
}

struct TopicState {
    cancel: CancellationToken,
    partitions: HashMap<Partition, PartitionLog>,
}

struct Inner {
    config: StorageConfig,
    topics: RwLock<HashMap<Topic, TopicState>>,
    root: CancellationToken,
    flushers: TaskTracker,
}

/// Memory+file storage engine.
pub struct IsomorphicStorage {
    inner: Arc<Inner>,
}

impl IsomorphicStorage {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                topics: RwLock::new(HashMap::new()),
                root: CancellationToken::new(),
                flushers: TaskTracker::new(),
            }),
        }
    }
}

#[async_trait]
impl Storage for IsomorphicStorage {
    fn write(&self, topic: &str, partition: Partition, message: Message) {
        let mut topics = self.inner.topics.write();
        match topics
            .get_mut(topic)
            .and_then(|t| t.partitions.get_mut(&partition))
        {
            Some(log) => {
                log.pending.push(message);
                metrics().messages_written.inc();
            }
            None => {
                debug!(topic, partition, "write to unknown topic/partition dropped");
            }
        }
    }

    async fn new_topic(&self, topic: &str, partitions: usize) -> Result<()> {
        // Reserve the topic entry up front so concurrent creates are rejected.
        let cancel = {
            let mut topics = self.inner.topics.write();
            if topics.contains_key(topic) {
                return Err(Error::topic_already_exists(topic));
            }
            let cancel = self.inner.root.child_token();
            topics.insert(
                topic.to_string(),
                TopicState {
                    cancel: cancel.clone(),
                    partitions: HashMap::new(),
                },
            );
            cancel
        };

        let commit_dir = self.inner.config.commit_dir.clone();
        let owned_topic = topic.to_string();
        let opened =
            tokio::task::spawn_blocking(move || open_partition_files(&commit_dir, &owned_topic, partitions))
                .await
                .map_err(|e| Error::internal(format!("partition open task failed: {e}")))?;

        let files = match opened {
            Ok(files) => files,
            Err(e) => {
                self.inner.topics.write().remove(topic);
                return Err(e.into());
            }
        };

        {
            let mut topics = self.inner.topics.write();
            let state = topics
                .get_mut(topic)
                .ok_or_else(|| Error::topic_not_found(topic))?;
            for (partition, _, path) in &files {
                state.partitions.insert(
                    *partition,
                    PartitionLog {
                        pending: Vec::new(),
                        path: path.clone(),
                    },
                );
            }
        }

        for (partition, file, _) in files {
            self.inner.flushers.spawn(flush_loop(
                self.inner.clone(),
                topic.to_string(),
                partition,
                file,
                cancel.clone(),
            ));
        }

        metrics().topics_active.inc();
        info!(topic, partitions, "topic created");
        Ok(())
    }

    fn has_topic(&self, topic: &str) -> bool {
        self.inner.topics.read().contains_key(topic)
    }

    fn delete_topic(&self, topic: &str) -> Result<()> {
        let state = self
            .inner
            .topics
            .write()
            .remove(topic)
            .ok_or_else(|| Error::topic_not_found(topic))?;

        state.cancel.cancel();
        metrics().topics_active.dec();
        info!(topic, "topic deleted, partition files retained on disk");
        Ok(())
    }

    async fn read(
        &self,
        topic: &str,
        partition: Partition,
        from: Offset,
        to: Offset,
    ) -> Result<Vec<Message>> {
        let path = {
            let topics = self.inner.topics.read();
            topics
                .get(topic)
                .and_then(|t| t.partitions.get(&partition))
                .map(|log| log.path.clone())
                .ok_or_else(|| Error::topic_not_found(topic))?
        };

        let start = Instant::now();
        let scanned = tokio::task::spawn_blocking(move || file::read_range_at(&path, from, to))
            .await
            .map_err(|e| Error::internal(format!("partition read task failed: {e}")))?;

        match scanned {
            Ok(messages) => {
                metrics().read_latency_ms.observe(start.elapsed().as_millis() as u64);
                Ok(messages)
            }
            Err(e) => {
                metrics().read_errors.inc();
                Err(e.into())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.inner.root.cancel();
        self.inner.flushers.close();
        self.inner.flushers.wait().await;

        let mut topics = self.inner.topics.write();
        metrics().topics_active.set(0);
        topics.clear();
        debug!("storage closed");
        Ok(())
    }
}

fn open_partition_files(
    commit_dir: &Path,
    topic: &str,
    partitions: usize,
) -> io::Result<Vec<(Partition, File, PathBuf)>> {
    let meta = std::fs::metadata(commit_dir)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "commit directory is not a directory",
        ));
    }

    let topic_dir = commit_dir.join(topic);
    if !topic_dir.exists() {
        std::fs::create_dir(&topic_dir)?;
    }

    let mut opened = Vec::with_capacity(partitions);
    for partition in 1..=partitions {
        let path = topic_dir.join(format!("{partition}.log"));
        let file = File::create(&path)?;
        opened.push((partition, file, path));
    }

    Ok(opened)
}

/// One flush loop per partition: detach the pending buffer on each tick and
/// append it to the partition file. A final flush runs on cancellation
/// before the file handle drops.
async fn flush_loop(
    inner: Arc<Inner>,
    topic: Topic,
    partition: Partition,
    file: File,
    cancel: CancellationToken,
) {
    let mut writer = BufWriter::new(file);
    let mut ticker = tokio::time::interval(inner.config.flush_interval());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => flush_pending(&inner, &topic, partition, &mut writer),
        }
    }

    flush_pending(&inner, &topic, partition, &mut writer);
    debug!(topic = %topic, partition, "partition flush loop stopped");
}

fn flush_pending(inner: &Inner, topic: &str, partition: Partition, writer: &mut BufWriter<File>) {
    let batch = {
        let mut topics = inner.topics.write();
        match topics
            .get_mut(topic)
            .and_then(|t| t.partitions.get_mut(&partition))
        {
            Some(log) if !log.pending.is_empty() => std::mem::take(&mut log.pending),
            _ => return,
        }
    };

    let start = Instant::now();
    if let Err(e) = append_batch(writer, &batch) {
        metrics().flush_errors.inc();
        match inner.config.on_flush_error {
            FlushFailurePolicy::Discard => {
                error!(
                    topic,
                    partition,
                    count = batch.len(),
                    error = %e,
                    "flush failed, batch dropped"
                );
            }
            FlushFailurePolicy::Retain => {
                warn!(
                    topic,
                    partition,
                    count = batch.len(),
                    error = %e,
                    "flush failed, batch requeued"
                );
                let mut topics = inner.topics.write();
                if let Some(log) = topics
                    .get_mut(topic)
                    .and_then(|t| t.partitions.get_mut(&partition))
                {
                    let newer = std::mem::take(&mut log.pending);
                    log.pending = batch;
                    log.pending.extend(newer);
                }
            }
        }
        return;
    }

    metrics().messages_flushed.inc_by(batch.len() as u64);
    metrics().flush_latency_ms.observe(start.elapsed().as_millis() as u64);
}

fn append_batch(writer: &mut BufWriter<File>, batch: &[Message]) -> io::Result<()> {
    for message in batch {
        writer.write_all(message.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}
