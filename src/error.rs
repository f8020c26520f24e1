//! # Error Handling
//!
//! Error types for the publish/consume pipeline.
//!
//! ## Overview
//!
//! - **PartitioningError**: the topic's partition count does not match the
//!   configured count. Raised before any record is sent.
//! - **BrokerError**: failures surfaced by a broker client (unknown topic,
//!   lost connection, undecodable payload). Never retried by the pipeline.
//! - **PipelineError**: what `Publisher` and `ConsumerSupervisor` return to
//!   their caller.
//!
//! ## Example
//!
//! ```rust
//! use shardweave::error::{PartitioningError, PipelineError};
//!
//! let err = PipelineError::from(PartitioningError::new("numbers", 2, 3));
//! assert_eq!(
//!   err.to_string(),
//!   "Topic numbers should have 2 partition(s), but it has 3 partition(s)."
//! );
//! ```

use crate::shard_consumer::ShardId;

/// A topic has a different number of partitions than the pipeline expects.
///
/// This indicates an operator error (the topic was created with the wrong
/// partition count) and is never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Topic {topic} should have {expected} partition(s), but it has {actual} partition(s).")]
pub struct PartitioningError {
  /// Name of the offending topic.
  pub topic: String,
  /// Partition count the pipeline was configured for.
  pub expected: usize,
  /// Partition count the broker reported.
  pub actual: usize,
}

impl PartitioningError {
  /// Creates a new partitioning error.
  pub fn new(topic: impl Into<String>, expected: usize, actual: usize) -> Self {
    Self {
      topic: topic.into(),
      expected,
      actual,
    }
  }
}

/// Errors surfaced by a broker client.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
  /// The broker has no topic with this name.
  #[error("Unknown topic: {0}")]
  UnknownTopic(String),

  /// The topic exists but has no partition with this id.
  #[error("Topic {topic} has no partition {partition}")]
  UnknownPartition {
    /// Topic that was addressed.
    topic: String,
    /// Partition id that does not exist.
    partition: i32,
  },

  /// `poll` was called before `subscribe`.
  #[error("Client is not subscribed to any topic")]
  NotSubscribed,

  /// A connection could not be established.
  #[error("Failed to connect to broker: {0}")]
  ConnectFailed(String),

  /// The connection was lost or already closed.
  #[error("Broker connection lost: {0}")]
  Disconnected(String),

  /// A record payload could not be decoded into a value.
  #[error("Failed to decode record payload: expected {expected} bytes, got {actual}")]
  Decode {
    /// Payload length the codec requires.
    expected: usize,
    /// Payload length actually received.
    actual: usize,
  },

  /// A broker operation did not complete in time.
  #[error("Broker operation timed out: {0}")]
  Timeout(String),

  /// Error reported by the Kafka client library.
  #[cfg(feature = "kafka")]
  #[error("Kafka error: {0}")]
  Transport(#[from] rdkafka::error::KafkaError),
}

/// Errors returned by the publisher and the consumer supervisor.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
  /// The topic failed shard-count validation.
  #[error(transparent)]
  Partitioning(#[from] PartitioningError),

  /// A broker operation failed.
  #[error(transparent)]
  Broker(#[from] BrokerError),

  /// The pipeline configuration is inconsistent.
  #[error("Invalid configuration: {0}")]
  Config(String),

  /// The task running the consumer supervisor panicked or was aborted.
  #[error("Consumer supervisor did not complete: {0}")]
  SupervisorTask(String),

  /// A shard worker could not be started.
  #[error("Failed to start worker for shard {shard}: {source}")]
  Startup {
    /// Worker that failed to start.
    shard: ShardId,
    /// Underlying broker failure.
    #[source]
    source: BrokerError,
  },
}

impl PipelineError {
  /// Returns the partitioning error, if this is one.
  pub fn as_partitioning(&self) -> Option<&PartitioningError> {
    match self {
      PipelineError::Partitioning(err) => Some(err),
      _ => None,
    }
  }
}
