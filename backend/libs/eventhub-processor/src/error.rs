//! Error types for the event processor library

use thiserror::Error;

/// Result type for event processor operations
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Errors raised while receiving events or managing checkpoints
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// Kafka client operation failed (create, subscribe, receive, seek, store offset)
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// HTTP transport to the checkpoint blob container failed
    #[error("Checkpoint storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Checkpoint storage answered with an unexpected status or payload
    #[error("Checkpoint storage error: {0}")]
    Checkpoint(String),

    /// Connection string is missing a required key or is malformed
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    /// Configured names disagree with each other (e.g. EntityPath vs event hub)
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    /// The source has no more events to deliver
    #[error("Event source closed")]
    SourceClosed,

    /// A blocking source operation panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// Error raised by user event handler code
    #[error("Event handler failed: {0}")]
    Handler(String),
}
