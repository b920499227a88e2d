//! Unified error types for the broker.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the broker and its storage engine.
#[derive(Debug, Error)]
pub enum Error {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("storage i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("shutdown completed without graceful completion")]
    ShutdownTimeout,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn topic_not_found(topic: impl Into<String>) -> Self {
        Self::TopicNotFound(topic.into())
    }

    pub fn topic_already_exists(topic: impl Into<String>) -> Self {
        Self::TopicAlreadyExists(topic.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
