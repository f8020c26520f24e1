//! In-process broker.
//!
//! Keeps an append-only log per partition and balances partitions across the
//! members of a consumer group the way a Kafka group coordinator does: every
//! subscribed client is a member, and member `r` of `m` owns the partitions
//! whose index `i` satisfies `i % m == r`. Membership changes take effect on
//! the next poll. Read positions belong to the group, so a partition that
//! moves to another member continues where the previous owner stopped.
//!
//! Payloads are stored encoded, exactly as they would travel over the wire.

use super::{BrokerClient, BrokerConnector, ClientRole, PublishRequest, Record};
use crate::codec::{decode_value, encode_value};
use crate::error::BrokerError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

const DEFAULT_GROUP_ID: &str = "PrimaryWorkers";
const DEFAULT_MAX_POLL_RECORDS: usize = 500;

#[derive(Debug, Clone)]
struct StoredRecord {
  key: Option<Bytes>,
  payload: Bytes,
  timestamp_ms: i64,
}

#[derive(Debug)]
struct PartitionLog {
  id: i32,
  records: Vec<StoredRecord>,
}

#[derive(Debug, Default)]
struct Group {
  members: Vec<u64>,
  positions: HashMap<i32, usize>,
}

#[derive(Debug, Default)]
struct BrokerState {
  topics: HashMap<String, Vec<PartitionLog>>,
  groups: HashMap<String, Group>,
  publish_log: Vec<PublishRequest>,
  next_connection_id: u64,
  open_connections: usize,
  connections_opened: usize,
  connects_before_failure: Option<usize>,
  disconnected: bool,
}

impl BrokerState {
  fn leave_group(&mut self, topic: &str, connection_id: u64) {
    if let Some(group) = self.groups.get_mut(topic) {
      group.members.retain(|member| *member != connection_id);
    }
  }

  fn check_connected(&self) -> Result<(), BrokerError> {
    if self.disconnected {
      Err(BrokerError::Disconnected("broker unavailable".to_string()))
    } else {
      Ok(())
    }
  }
}

#[derive(Debug)]
struct Shared {
  state: Mutex<BrokerState>,
  records_available: Notify,
  group_id: String,
  max_poll_records: usize,
}

impl Shared {
  fn lock(&self) -> MutexGuard<'_, BrokerState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

/// A broker that lives inside the current process.
///
/// Cloning is cheap and every clone shares the same topics.
///
/// # Example
///
/// ```rust
/// use shardweave::broker::memory::InMemoryBroker;
///
/// let broker = InMemoryBroker::new();
/// broker.create_topic("numbers", 2);
/// assert_eq!(broker.partition_ids("numbers"), Some(vec![0, 1]));
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
  shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
  fn default() -> Self {
    Self::new()
  }
}

impl InMemoryBroker {
  /// Creates an empty broker with the default consumer group.
  pub fn new() -> Self {
    Self::with_options(DEFAULT_GROUP_ID, DEFAULT_MAX_POLL_RECORDS)
  }

  /// Creates an empty broker with an explicit group id and poll batch limit.
  pub fn with_options(group_id: impl Into<String>, max_poll_records: usize) -> Self {
    Self {
      shared: Arc::new(Shared {
        state: Mutex::new(BrokerState::default()),
        records_available: Notify::new(),
        group_id: group_id.into(),
        max_poll_records: max_poll_records.max(1),
      }),
    }
  }

  /// Creates `topic` with partitions `0..partitions`. An existing topic is
  /// left untouched.
  pub fn create_topic(&self, topic: &str, partitions: usize) {
    self.create_topic_with_ids(topic, (0..partitions as i32).collect());
  }

  /// Creates `topic` with the given partition ids, in that order.
  pub fn create_topic_with_ids(&self, topic: &str, ids: Vec<i32>) {
    let mut state = self.shared.lock();
    state.topics.entry(topic.to_string()).or_insert_with(|| {
      ids
        .into_iter()
        .map(|id| PartitionLog {
          id,
          records: Vec::new(),
        })
        .collect()
    });
  }

  /// Partition ids of `topic`, if it exists.
  pub fn partition_ids(&self, topic: &str) -> Option<Vec<i32>> {
    let state = self.shared.lock();
    state
      .topics
      .get(topic)
      .map(|partitions| partitions.iter().map(|p| p.id).collect())
  }

  /// Appends raw payloads to one partition, bypassing any client.
  pub fn append_raw(
    &self,
    topic: &str,
    partition: i32,
    payloads: impl IntoIterator<Item = Bytes>,
  ) -> Result<(), BrokerError> {
    {
      let mut state = self.shared.lock();
      let log = find_partition(&mut state, topic, partition)?;
      let timestamp_ms = chrono::Utc::now().timestamp_millis();
      log.records.extend(payloads.into_iter().map(|payload| StoredRecord {
        key: None,
        payload,
        timestamp_ms,
      }));
    }
    self.shared.records_available.notify_waiters();
    Ok(())
  }

  /// Appends values to one partition, bypassing any client.
  pub fn append(
    &self,
    topic: &str,
    partition: i32,
    values: impl IntoIterator<Item = f64>,
  ) -> Result<(), BrokerError> {
    self.append_raw(topic, partition, values.into_iter().map(encode_value))
  }

  /// Every publish request accepted so far, in order.
  pub fn publish_log(&self) -> Vec<PublishRequest> {
    self.shared.lock().publish_log.clone()
  }

  /// Number of publish requests accepted so far.
  pub fn sent_count(&self) -> usize {
    self.shared.lock().publish_log.len()
  }

  /// Number of records stored in one partition.
  pub fn partition_len(&self, topic: &str, partition: i32) -> usize {
    let state = self.shared.lock();
    state
      .topics
      .get(topic)
      .and_then(|partitions| partitions.iter().find(|p| p.id == partition))
      .map_or(0, |p| p.records.len())
  }

  /// How far the consumer group has read into one partition.
  pub fn committed_position(&self, topic: &str, partition: i32) -> usize {
    let state = self.shared.lock();
    state
      .groups
      .get(topic)
      .and_then(|group| group.positions.get(&partition).copied())
      .unwrap_or(0)
  }

  /// Returns `true` once the group has read every record of `topic`.
  pub fn is_drained(&self, topic: &str) -> bool {
    let state = self.shared.lock();
    let Some(partitions) = state.topics.get(topic) else {
      return true;
    };
    let group = state.groups.get(topic);
    partitions.iter().all(|p| {
      let position = group
        .and_then(|g| g.positions.get(&p.id).copied())
        .unwrap_or(0);
      position >= p.records.len()
    })
  }

  /// Number of clients currently subscribed to `topic`.
  pub fn group_size(&self, topic: &str) -> usize {
    let state = self.shared.lock();
    state.groups.get(topic).map_or(0, |g| g.members.len())
  }

  /// Connections opened and not yet closed.
  pub fn open_connections(&self) -> usize {
    self.shared.lock().open_connections
  }

  /// Connections opened over the broker's lifetime.
  pub fn connections_opened(&self) -> usize {
    self.shared.lock().connections_opened
  }

  /// Lets `successes` more connects through, then fails the next one.
  pub fn fail_connects_after(&self, successes: usize) {
    self.shared.lock().connects_before_failure = Some(successes);
  }

  /// Fails the next connect.
  pub fn fail_next_connect(&self) {
    self.fail_connects_after(0);
  }

  /// Simulates losing the broker: every later metadata lookup, send and
  /// poll fails, and waiting polls wake up to observe the failure.
  pub fn disconnect(&self) {
    self.shared.lock().disconnected = true;
    self.shared.records_available.notify_waiters();
  }
}

fn find_partition<'a>(
  state: &'a mut BrokerState,
  topic: &str,
  partition: i32,
) -> Result<&'a mut PartitionLog, BrokerError> {
  let partitions = state
    .topics
    .get_mut(topic)
    .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
  partitions
    .iter_mut()
    .find(|p| p.id == partition)
    .ok_or_else(|| BrokerError::UnknownPartition {
      topic: topic.to_string(),
      partition,
    })
}

#[async_trait]
impl BrokerConnector for InMemoryBroker {
  type Client = InMemoryClient;

  async fn connect(&self, role: ClientRole) -> Result<InMemoryClient, BrokerError> {
    let mut state = self.shared.lock();
    if let Some(remaining) = state.connects_before_failure {
      if remaining == 0 {
        state.connects_before_failure = None;
        return Err(BrokerError::ConnectFailed(
          "connection refused".to_string(),
        ));
      }
      state.connects_before_failure = Some(remaining - 1);
    }
    state.next_connection_id += 1;
    state.open_connections += 1;
    state.connections_opened += 1;
    let id = state.next_connection_id;
    debug!(connection = id, role = ?role, "Opened in-memory broker connection");
    Ok(InMemoryClient {
      shared: Arc::clone(&self.shared),
      id,
      subscription: None,
      closed: false,
    })
  }
}

/// A connection to an [`InMemoryBroker`].
#[derive(Debug)]
pub struct InMemoryClient {
  shared: Arc<Shared>,
  id: u64,
  subscription: Option<String>,
  closed: bool,
}

impl InMemoryClient {
  fn ensure_open(&self) -> Result<(), BrokerError> {
    if self.closed {
      Err(BrokerError::Disconnected("connection closed".to_string()))
    } else {
      Ok(())
    }
  }

  fn release(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    let mut state = self.shared.lock();
    if let Some(topic) = self.subscription.take() {
      state.leave_group(&topic, self.id);
    }
    state.open_connections = state.open_connections.saturating_sub(1);
    debug!(connection = self.id, "Closed in-memory broker connection");
  }

  /// Reads the next batch for this member and advances the group positions.
  ///
  /// A position only moves past a record once its payload has decoded. An
  /// undecodable payload ends the batch early; it fails the fetch only when
  /// nothing was read before it, so records already read are never lost.
  fn fetch(&self, topic: &str) -> Result<Vec<Record>, BrokerError> {
    let mut guard = self.shared.lock();
    let state = &mut *guard;
    state.check_connected()?;
    let partitions = state
      .topics
      .get(topic)
      .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))?;
    let group = state.groups.entry(topic.to_string()).or_default();
    let Some(rank) = group.members.iter().position(|member| *member == self.id) else {
      return Ok(Vec::new());
    };
    let members = group.members.len();

    let mut batch = Vec::new();
    for (index, partition) in partitions.iter().enumerate() {
      if index % members != rank {
        continue;
      }
      let position = group.positions.entry(partition.id).or_insert(0);
      while *position < partition.records.len() && batch.len() < self.shared.max_poll_records {
        let stored = &partition.records[*position];
        let value = match decode_value(&stored.payload) {
          Ok(value) => value,
          Err(err) if batch.is_empty() => return Err(err),
          Err(_) => return Ok(batch),
        };
        batch.push(Record {
          topic: topic.to_string(),
          partition: partition.id,
          offset: *position as i64,
          key: stored.key.clone(),
          value,
          timestamp_ms: Some(stored.timestamp_ms),
        });
        *position += 1;
      }
    }
    Ok(batch)
  }
}

#[async_trait]
impl BrokerClient for InMemoryClient {
  async fn partitions_for(&mut self, topic: &str) -> Result<Vec<i32>, BrokerError> {
    self.ensure_open()?;
    let state = self.shared.lock();
    state.check_connected()?;
    state
      .topics
      .get(topic)
      .map(|partitions| partitions.iter().map(|p| p.id).collect())
      .ok_or_else(|| BrokerError::UnknownTopic(topic.to_string()))
  }

  async fn send(&mut self, request: PublishRequest) -> Result<(), BrokerError> {
    self.ensure_open()?;
    {
      let mut state = self.shared.lock();
      state.check_connected()?;
      let log = find_partition(&mut state, &request.topic, request.partition)?;
      log.records.push(StoredRecord {
        key: request.key.clone(),
        payload: encode_value(request.value),
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
      });
      state.publish_log.push(request);
    }
    self.shared.records_available.notify_waiters();
    Ok(())
  }

  async fn subscribe(&mut self, topic: &str) -> Result<(), BrokerError> {
    self.ensure_open()?;
    {
      let mut state = self.shared.lock();
      state.check_connected()?;
      if !state.topics.contains_key(topic) {
        return Err(BrokerError::UnknownTopic(topic.to_string()));
      }
      if let Some(previous) = self.subscription.take() {
        state.leave_group(&previous, self.id);
      }
      let group = state.groups.entry(topic.to_string()).or_default();
      group.members.push(self.id);
      debug!(
        connection = self.id,
        group = %self.shared.group_id,
        topic = %topic,
        members = group.members.len(),
        "Joined consumer group"
      );
    }
    self.subscription = Some(topic.to_string());
    // Existing members pick up the new assignment on their next poll.
    self.shared.records_available.notify_waiters();
    Ok(())
  }

  async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>, BrokerError> {
    self.ensure_open()?;
    let topic = self.subscription.clone().ok_or(BrokerError::NotSubscribed)?;
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
      // Register interest before reading so a publish in between still wakes us.
      let notified = self.shared.records_available.notified();
      let batch = self.fetch(&topic)?;
      if !batch.is_empty() {
        return Ok(batch);
      }
      if tokio::time::timeout_at(deadline, notified).await.is_err() {
        return Ok(Vec::new());
      }
    }
  }

  async fn close(&mut self) -> Result<(), BrokerError> {
    self.release();
    Ok(())
  }
}

impl Drop for InMemoryClient {
  fn drop(&mut self) {
    self.release();
  }
}
