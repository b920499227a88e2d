//! Write-back storage engine for the trellis broker.
//!
//! Messages are absorbed into per-partition in-memory buffers and
//! periodically flushed as ordered, newline-terminated blocks to
//! `<commit_dir>/<topic>/<partition>.log`. Reads scan those files by
//! 1-based line number, so a message becomes readable only after the flush
//! tick that persisted it.

pub mod config;
pub mod file;
pub mod isomorphic;

pub use config::{FlushFailurePolicy, StorageConfig};
pub use isomorphic::IsomorphicStorage;

use async_trait::async_trait;
use broker_core::{Message, Offset, Partition, Result};

/// Storage surface consumed by the broker.
///
/// `write`, `has_topic` and `delete_topic` only touch in-memory state and
/// are synchronous; topic creation, reads and shutdown do filesystem work.
#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Appends a message to the topic/partition's pending buffer.
    /// Never blocks on I/O.
    fn write(&self, topic: &str, partition: Partition, message: Message);

    /// Creates the topic's directory and partition files and starts one
    /// flush loop per partition.
    async fn new_topic(&self, topic: &str, partitions: usize) -> Result<()>;

    fn has_topic(&self, topic: &str) -> bool;

    /// Stops the topic's flush loops and forgets its in-memory state.
    /// Partition files on disk are retained.
    fn delete_topic(&self, topic: &str) -> Result<()>;

    /// Returns the messages whose line numbers fall in `[from, to]`.
    async fn read(
        &self,
        topic: &str,
        partition: Partition,
        from: Offset,
        to: Offset,
    ) -> Result<Vec<Message>>;

    /// Stops all flush loops, waits for their final flush, clears state.
    async fn close(&self) -> Result<()>;
}
