//! # Broker Clients
//!
//! The pipeline talks to the message broker only through the capability set
//! defined here:
//!
//! - partition metadata lookup by topic name
//! - fire-and-forget publish of `(topic, partition, key, value)`
//! - subscribe, then poll for a batch of records within a bounded wait
//! - close
//!
//! A [`BrokerConnector`] opens one [`BrokerClient`] per logical connection.
//! The publisher opens one, the supervisor opens one for metadata and then
//! one per shard consumer.
//!
//! Two implementations ship with the crate: [`memory::InMemoryBroker`], which
//! runs in-process and backs the tests and the `demo` command, and
//! `kafka::KafkaConnector` (cargo feature `kafka`), built on rdkafka.

use crate::error::BrokerError;
use async_trait::async_trait;
use bytes::Bytes;
use std::time::Duration;
use tracing::warn;

#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;

/// What a connection will be used for. Implementations may configure the
/// underlying client differently per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientRole {
  /// Metadata lookups and publishes.
  Producer,
  /// Subscribe and poll.
  Consumer,
}

/// A request to append one value to one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
  /// Target topic.
  pub topic: String,
  /// Target partition id, as reported by the broker's metadata.
  pub partition: i32,
  /// Record key. The pipeline never sets one.
  pub key: Option<Bytes>,
  /// The value to publish.
  pub value: f64,
}

impl PublishRequest {
  /// Creates a keyless publish request.
  pub fn new(topic: impl Into<String>, partition: i32, value: f64) -> Self {
    Self {
      topic: topic.into(),
      partition,
      key: None,
      value,
    }
  }
}

/// A record delivered by a poll.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
  /// Topic the record was read from.
  pub topic: String,
  /// Partition the record was read from.
  pub partition: i32,
  /// Offset within the partition.
  pub offset: i64,
  /// Record key, if any.
  pub key: Option<Bytes>,
  /// Decoded value.
  pub value: f64,
  /// Broker timestamp in milliseconds since the Unix epoch, if known.
  pub timestamp_ms: Option<i64>,
}

/// One connection to the broker.
///
/// A client is owned by exactly one task. Callers must `close` it on every
/// exit path; implementations also release what they can on drop.
#[async_trait]
pub trait BrokerClient: Send + 'static {
  /// Returns the ordered partition ids of `topic`.
  async fn partitions_for(&mut self, topic: &str) -> Result<Vec<i32>, BrokerError>;

  /// Enqueues a publish without waiting for the broker's acknowledgement.
  async fn send(&mut self, request: PublishRequest) -> Result<(), BrokerError>;

  /// Joins the consumer group for `topic`. The broker decides which
  /// partitions this client receives.
  async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError>;

  /// Waits up to `timeout` for records. An empty batch means the wait
  /// expired.
  async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>, BrokerError>;

  /// Releases the connection. Closing twice is a no-op.
  async fn close(&mut self) -> Result<(), BrokerError>;
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync + 'static {
  /// The client type this connector opens.
  type Client: BrokerClient;

  /// Opens a new connection for `role`.
  async fn connect(&self, role: ClientRole) -> Result<Self::Client, BrokerError>;
}

/// Closes `client` and folds the close result into `outcome`.
///
/// The outcome of the work done on the connection wins: a close failure is
/// only returned when the work itself succeeded, otherwise it is logged.
pub(crate) async fn close_with<C, T, E>(
  client: &mut C,
  outcome: Result<T, E>,
  component: &str,
) -> Result<T, E>
where
  C: BrokerClient,
  E: From<BrokerError>,
{
  let closed = client.close().await;
  match (outcome, closed) {
    (Ok(value), Ok(())) => Ok(value),
    (Ok(_), Err(close_err)) => Err(close_err.into()),
    (Err(err), Ok(())) => Err(err),
    (Err(err), Err(close_err)) => {
      warn!(
        component = %component,
        error = %close_err,
        "Failed to close broker connection after an earlier error"
      );
      Err(err)
    }
  }
}
