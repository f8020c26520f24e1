//! Kafka broker client built on rdkafka.
//!
//! Producer connections use `acks` and `linger.ms` from the pipeline
//! configuration. Consumer connections join the configured group with
//! auto-commit enabled, so Kafka's group coordinator decides which partitions
//! each shard consumer reads.

use super::{BrokerClient, BrokerConnector, ClientRole, PublishRequest, Record};
use crate::codec::{decode_value, encode_value};
use crate::config::PipelineConfig;
use crate::error::BrokerError;
use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::{
  config::{ClientConfig, RDKafkaLogLevel},
  consumer::{Consumer, StreamConsumer},
  message::{BorrowedMessage, Message},
  metadata::Metadata,
  producer::{FutureProducer, FutureRecord, Producer},
  util::Timeout,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const METADATA_TIMEOUT: Duration = Duration::from_secs(10);
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens rdkafka producers and consumers.
#[derive(Debug, Clone)]
pub struct KafkaConnector {
  config: PipelineConfig,
}

impl KafkaConnector {
  /// Creates a connector for the configured cluster.
  pub fn new(config: PipelineConfig) -> Self {
    Self { config }
  }

  fn producer_config(&self) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &self.config.bootstrap_servers);
    client_config.set("acks", &self.config.acks);
    client_config.set("linger.ms", self.config.linger_ms.to_string());
    client_config.set_log_level(RDKafkaLogLevel::Warning);
    client_config
  }

  fn consumer_config(&self) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &self.config.bootstrap_servers);
    client_config.set("group.id", &self.config.group_id);
    client_config.set("enable.auto.commit", "true");
    client_config.set(
      "auto.commit.interval.ms",
      self.config.auto_commit_interval_ms.to_string(),
    );
    client_config.set("enable.partition.eof", "false");
    client_config.set_log_level(RDKafkaLogLevel::Warning);
    client_config
  }
}

#[async_trait]
impl BrokerConnector for KafkaConnector {
  type Client = KafkaClient;

  async fn connect(&self, role: ClientRole) -> Result<KafkaClient, BrokerError> {
    let connection = match role {
      ClientRole::Producer => Connection::Producer(self.producer_config().create()?),
      ClientRole::Consumer => Connection::Consumer(Arc::new(self.consumer_config().create()?)),
    };
    debug!(
      role = ?role,
      bootstrap_servers = %self.config.bootstrap_servers,
      "Created Kafka client"
    );
    Ok(KafkaClient {
      connection,
      max_poll_records: self.config.max_poll_records.max(1),
      deferred_error: None,
    })
  }
}

enum Connection {
  Producer(FutureProducer),
  Consumer(Arc<StreamConsumer>),
  Closed,
}

/// A single rdkafka producer or consumer.
pub struct KafkaClient {
  connection: Connection,
  max_poll_records: usize,
  /// Failure hit while draining a batch that already held records; raised
  /// by the next poll.
  deferred_error: Option<BrokerError>,
}

/// Blocking metadata lookup that owns a handle to its client.
type MetadataLookup = Box<dyn FnOnce(&str) -> Result<Metadata, BrokerError> + Send>;

impl KafkaClient {
  fn metadata_lookup(&self) -> Result<MetadataLookup, BrokerError> {
    match &self.connection {
      Connection::Producer(producer) => {
        let producer = producer.clone();
        Ok(Box::new(move |topic: &str| -> Result<Metadata, BrokerError> {
          Ok(producer.client().fetch_metadata(Some(topic), METADATA_TIMEOUT)?)
        }))
      }
      Connection::Consumer(consumer) => {
        let consumer = Arc::clone(consumer);
        Ok(Box::new(move |topic: &str| -> Result<Metadata, BrokerError> {
          Ok(consumer.fetch_metadata(Some(topic), METADATA_TIMEOUT)?)
        }))
      }
      Connection::Closed => Err(closed()),
    }
  }
}

fn partition_ids(metadata: &Metadata, topic: &str) -> Result<Vec<i32>, BrokerError> {
  let topic_metadata = metadata
    .topics()
    .iter()
    .find(|t| t.name() == topic)
    .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
  if topic_metadata.error().is_some() {
    return Err(BrokerError::UnknownTopic(topic.to_string()));
  }
  let mut ids: Vec<i32> = topic_metadata.partitions().iter().map(|p| p.id()).collect();
  ids.sort_unstable();
  Ok(ids)
}

fn closed() -> BrokerError {
  BrokerError::Disconnected("connection closed".to_string())
}

fn convert_message(message: &BorrowedMessage<'_>) -> Result<Record, BrokerError> {
  Ok(Record {
    topic: message.topic().to_string(),
    partition: message.partition(),
    offset: message.offset(),
    key: message.key().map(Bytes::copy_from_slice),
    value: decode_value(message.payload().unwrap_or_default())?,
    timestamp_ms: message.timestamp().to_millis(),
  })
}

#[async_trait]
impl BrokerClient for KafkaClient {
  async fn partitions_for(&mut self, topic: &str) -> Result<Vec<i32>, BrokerError> {
    // rdkafka's metadata call blocks until the broker answers, so it runs on
    // the blocking pool.
    let lookup = self.metadata_lookup()?;
    let topic = topic.to_string();
    tokio::task::spawn_blocking(move || {
      let metadata = lookup(&topic)?;
      partition_ids(&metadata, &topic)
    })
    .await
    .map_err(|err| BrokerError::Disconnected(format!("metadata lookup did not complete: {}", err)))?
  }

  async fn send(&mut self, request: PublishRequest) -> Result<(), BrokerError> {
    let producer = match &self.connection {
      Connection::Producer(producer) => producer,
      Connection::Consumer(_) => {
        return Err(BrokerError::Disconnected(
          "consumer connections cannot publish".to_string(),
        ))
      }
      Connection::Closed => return Err(closed()),
    };
    let payload = encode_value(request.value);
    let mut record: FutureRecord<'_, [u8], [u8]> = FutureRecord::to(&request.topic)
      .partition(request.partition)
      .payload(&payload[..]);
    if let Some(key) = request.key.as_deref() {
      record = record.key(key);
    }
    // Dropping the delivery future does not cancel delivery.
    producer
      .send_result(record)
      .map(drop)
      .map_err(|(err, _record)| BrokerError::from(err))
  }

  async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
    match &self.connection {
      Connection::Consumer(consumer) => Ok(consumer.subscribe(&[topic])?),
      Connection::Producer(_) => Err(BrokerError::Disconnected(
        "producer connections cannot subscribe".to_string(),
      )),
      Connection::Closed => Err(closed()),
    }
  }

  async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>, BrokerError> {
    if let Some(err) = self.deferred_error.take() {
      return Err(err);
    }
    let consumer = match &self.connection {
      Connection::Consumer(consumer) => Arc::clone(consumer),
      Connection::Producer(_) => return Err(BrokerError::NotSubscribed),
      Connection::Closed => return Err(closed()),
    };
    let mut batch = match tokio::time::timeout(timeout, consumer.recv()).await {
      Err(_) => return Ok(Vec::new()),
      Ok(message) => vec![convert_message(&message?)?],
    };
    // Drain whatever is already buffered without waiting again. rdkafka has
    // already advanced past every message it handed out, so a failure here
    // must not discard the records collected so far.
    while batch.len() < self.max_poll_records {
      let next = match tokio::time::timeout(Duration::ZERO, consumer.recv()).await {
        Ok(Ok(message)) => convert_message(&message),
        Ok(Err(err)) => Err(err.into()),
        Err(_) => break,
      };
      match next {
        Ok(record) => batch.push(record),
        Err(err) => {
          warn!(error = %err, delivered = batch.len(), "Stopping batch early, failing the next poll");
          self.deferred_error = Some(err);
          break;
        }
      }
    }
    Ok(batch)
  }

  async fn close(&mut self) -> Result<(), BrokerError> {
    match std::mem::replace(&mut self.connection, Connection::Closed) {
      Connection::Producer(producer) => producer.flush(Timeout::After(FLUSH_TIMEOUT))?,
      Connection::Consumer(consumer) => consumer.unsubscribe(),
      Connection::Closed => {}
    }
    Ok(())
  }
}
