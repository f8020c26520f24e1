//! # Shard Consumer
//!
//! One poll loop per shard. Each consumer owns its broker connection and its
//! running average; nothing is shared with other shards.
//!
//! ```text
//! Idle -> Polling -> (Processing -> Polling)* -> Stopped
//! ```
//!
//! The loop runs until its cancellation token fires or the connection
//! fails. Either way the connection is closed before `run` returns.

use crate::broker::{close_with, BrokerClient, Record};
use crate::error::BrokerError;
use crate::progress::{Progress, ProgressReporter};
use crate::running_average::RunningAverage;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Identifies a shard worker.
///
/// This is the worker's index, not a partition id: which partitions a
/// worker reads is decided by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(pub usize);

impl fmt::Display for ShardId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "shard {}", self.0)
  }
}

/// Lifecycle state of a shard consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
  /// Subscribed, not yet polling.
  Idle,
  /// Waiting for a batch.
  Polling,
  /// Folding a batch into the running average.
  Processing,
  /// Cancelled or failed; the connection is released.
  Stopped,
}

/// Final state of a shard consumer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShardSummary {
  /// The worker.
  pub shard: ShardId,
  /// Everything the worker consumed.
  pub average: RunningAverage,
}

impl ShardSummary {
  /// Number of values consumed.
  pub fn count(&self) -> u64 {
    self.average.count()
  }

  /// Mean of the values consumed.
  pub fn mean(&self) -> f64 {
    self.average.mean()
  }
}

/// Consumes one shard of a topic and keeps its running average.
pub struct ShardConsumer<C, R>
where
  C: BrokerClient,
  R: ProgressReporter,
{
  shard: ShardId,
  client: C,
  reporter: R,
  poll_interval: Duration,
  average: RunningAverage,
  state: watch::Sender<ShardState>,
}

impl<C, R> ShardConsumer<C, R>
where
  C: BrokerClient,
  R: ProgressReporter,
{
  /// Creates a consumer that owns `client`.
  pub fn new(shard: ShardId, client: C, reporter: R, poll_interval: Duration) -> Self {
    let (state, _) = watch::channel(ShardState::Idle);
    Self {
      shard,
      client,
      reporter,
      poll_interval,
      average: RunningAverage::new(),
      state,
    }
  }

  /// The worker this consumer runs as.
  pub fn shard(&self) -> ShardId {
    self.shard
  }

  /// Current lifecycle state.
  pub fn state(&self) -> ShardState {
    *self.state.borrow()
  }

  /// Subscribes to state changes.
  pub fn watch_state(&self) -> watch::Receiver<ShardState> {
    self.state.subscribe()
  }

  /// The running average so far.
  pub fn average(&self) -> RunningAverage {
    self.average
  }

  /// Subscribes to `topic` and polls until `cancel` fires or the
  /// connection fails.
  ///
  /// Cancellation is checked before every poll and also interrupts a poll
  /// in progress. The connection is closed before returning on every path.
  pub async fn run(
    &mut self,
    topic: &str,
    cancel: CancellationToken,
  ) -> Result<ShardSummary, BrokerError> {
    let outcome = self.consume(topic, &cancel).await;
    self.state.send_replace(ShardState::Stopped);
    let result = close_with(&mut self.client, outcome, "shard_consumer").await;
    match &result {
      Ok(summary) => info!(
        shard = %self.shard,
        topic = %topic,
        consumed = summary.count(),
        mean = summary.mean(),
        "Shard consumer stopped"
      ),
      Err(err) => error!(
        shard = %self.shard,
        topic = %topic,
        error = %err,
        "Shard consumer failed"
      ),
    }
    result
  }

  async fn consume(
    &mut self,
    topic: &str,
    cancel: &CancellationToken,
  ) -> Result<ShardSummary, BrokerError> {
    self.client.subscribe(topic).await?;
    self.state.send_replace(ShardState::Idle);
    info!(shard = %self.shard, topic = %topic, "Shard consumer subscribed");

    loop {
      if cancel.is_cancelled() {
        break;
      }
      self.state.send_replace(ShardState::Polling);
      let batch = tokio::select! {
        biased;
        _ = cancel.cancelled() => break,
        batch = self.client.poll(self.poll_interval) => batch?,
      };
      if batch.is_empty() {
        continue;
      }
      self.state.send_replace(ShardState::Processing);
      for record in &batch {
        self.process(record);
      }
    }

    Ok(ShardSummary {
      shard: self.shard,
      average: self.average,
    })
  }

  fn process(&mut self, record: &Record) {
    let mean = self.average.update(record.value);
    let progress = Progress {
      shard: self.shard,
      partition: record.partition,
      value: record.value,
      mean,
      count: self.average.count(),
    };
    debug!(
      shard = %self.shard,
      partition = record.partition,
      offset = record.offset,
      value = record.value,
      mean,
      "Consumed record"
    );
    self.reporter.report(&progress);
  }
}
