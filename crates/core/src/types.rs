//! Shared aliases for the broker's vocabulary.
//!
//! Messages are opaque to the broker; they must not contain `\n` because the
//! storage engine persists one message per newline-terminated line.

/// A named channel holding a fixed number of partitions.
pub type Topic = String;

/// A consumer group identifier, scoped within a topic.
pub type Group = String;

/// An opaque message payload.
pub type Message = String;

/// A 1-based partition number within its topic.
pub type Partition = usize;

/// A 1-based line number in a partition file. Zero means nothing consumed.
pub type Offset = i64;

/// A random 63-bit subscription identifier.
pub type ConsumerId = i64;
