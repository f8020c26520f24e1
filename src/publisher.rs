//! # Publisher
//!
//! Generates values, routes each one to a partition, and hands it to the
//! broker without waiting for an acknowledgement. Durability is left to the
//! broker client's acknowledgement setting (`acks = "all"` by default).
//!
//! Before anything is sent the topic's partition count is checked against
//! the expected count. A mismatch is an operator error: the publisher fails
//! with [`PartitioningError`] and sends nothing.

use crate::broker::{close_with, BrokerClient, BrokerConnector, ClientRole, PublishRequest};
use crate::config::PipelineConfig;
use crate::error::{PartitioningError, PipelineError};
use crate::partitioner::RangePartitioner;
use crate::value_source::{SeededValueSource, ValueSource};
use tracing::{debug, info, warn};

/// Publishes values from a [`ValueSource`] to a partitioned topic.
///
/// # Example
///
/// ```rust
/// use shardweave::broker::memory::InMemoryBroker;
/// use shardweave::config::PipelineConfig;
/// use shardweave::publisher::Publisher;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let broker = InMemoryBroker::new();
/// broker.create_topic("numbers", 2);
///
/// let mut publisher = Publisher::from_config(broker.clone(), &PipelineConfig::default());
/// let sent = publisher.produce("numbers", 10, 2).await.unwrap();
/// assert_eq!(sent, 10);
/// assert_eq!(broker.sent_count(), 10);
/// # }
/// ```
pub struct Publisher<C, S = SeededValueSource>
where
  C: BrokerConnector,
  S: ValueSource,
{
  connector: C,
  source: S,
  partitioner: RangePartitioner,
  name: String,
}

impl<C> Publisher<C, SeededValueSource>
where
  C: BrokerConnector,
{
  /// Creates a publisher with the configured seed and boundaries.
  pub fn from_config(connector: C, config: &PipelineConfig) -> Self {
    Self::new(
      connector,
      SeededValueSource::new(config.seed),
      config.partitioner(),
    )
  }
}

impl<C, S> Publisher<C, S>
where
  C: BrokerConnector,
  S: ValueSource,
{
  /// Creates a publisher from its parts.
  pub fn new(connector: C, source: S, partitioner: RangePartitioner) -> Self {
    Self {
      connector,
      source,
      partitioner,
      name: "publisher".to_string(),
    }
  }

  /// Sets the name used in log output.
  #[must_use]
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  /// The partitioner used to route values.
  pub fn partitioner(&self) -> &RangePartitioner {
    &self.partitioner
  }

  /// Publishes `count` values to `topic` and returns how many were sent.
  ///
  /// Fails with [`PipelineError::Partitioning`] before sending anything if
  /// the topic does not have exactly `expected_partitions` partitions. Fewer
  /// than `count` values are sent only if the value source runs dry.
  ///
  /// The broker connection is closed on every path, including failures.
  pub async fn produce(
    &mut self,
    topic: &str,
    count: usize,
    expected_partitions: usize,
  ) -> Result<usize, PipelineError> {
    if self.partitioner.partition_count() != expected_partitions {
      return Err(PipelineError::Config(format!(
        "partitioner splits values into {} partitions but {} are expected",
        self.partitioner.partition_count(),
        expected_partitions
      )));
    }

    let mut client = self.connector.connect(ClientRole::Producer).await?;
    let outcome = self
      .publish(&mut client, topic, count, expected_partitions)
      .await;
    close_with(&mut client, outcome, &self.name).await
  }

  async fn publish(
    &mut self,
    client: &mut C::Client,
    topic: &str,
    count: usize,
    expected_partitions: usize,
  ) -> Result<usize, PipelineError> {
    let partitions = client.partitions_for(topic).await?;
    if partitions.len() != expected_partitions {
      debug!(
        component = %self.name,
        topic = %topic,
        expected = expected_partitions,
        actual = partitions.len(),
        "Rejecting topic with wrong partition count"
      );
      return Err(PartitioningError::new(topic, expected_partitions, partitions.len()).into());
    }

    let mut sent = 0;
    while sent < count {
      let Some(value) = self.source.next_value() else {
        warn!(
          component = %self.name,
          topic = %topic,
          sent,
          requested = count,
          "Value source exhausted before reaching the requested count"
        );
        break;
      };
      let partition = self.partitioner.choose(value, &partitions);
      client
        .send(PublishRequest::new(topic, partition, value))
        .await?;
      debug!(
        component = %self.name,
        topic = %topic,
        partition,
        value,
        "Sent value"
      );
      sent += 1;
    }

    info!(
      component = %self.name,
      topic = %topic,
      sent,
      "Finished publishing"
    );
    Ok(sent)
  }
}
