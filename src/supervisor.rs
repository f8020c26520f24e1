//! # Consumer Supervisor
//!
//! Starts one [`ShardConsumer`] per partition of a topic and waits for all of
//! them.
//!
//! The supervisor does not assign partitions. It creates as many group
//! members as the topic has partitions and lets the broker's consumer-group
//! balancing give each member its share, which for `N` members over `N`
//! partitions is one partition each.
//!
//! Worker failures are isolated: a worker whose connection fails stops and is
//! reported, the others keep running. Failing to open a worker's connection
//! during startup is fatal; the workers already started are cancelled and
//! joined before the error is returned.

use crate::broker::{close_with, BrokerClient, BrokerConnector, ClientRole};
use crate::config::PipelineConfig;
use crate::error::{BrokerError, PipelineError};
use crate::progress::ProgressReporter;
use crate::running_average::RunningAverage;
use crate::shard_consumer::{ShardConsumer, ShardId, ShardSummary};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How a shard worker ended.
#[derive(Debug)]
pub enum ShardOutcome {
  /// The worker was cancelled and closed its connection cleanly.
  Finished(ShardSummary),
  /// The worker's connection failed.
  Failed(BrokerError),
  /// The worker task panicked or was aborted.
  Panicked(String),
}

/// Result of a supervised run.
#[derive(Debug)]
pub struct SupervisorReport {
  /// The consumed topic.
  pub topic: String,
  /// Partition ids the topic reported at startup.
  pub partitions: Vec<i32>,
  /// One entry per worker, in worker order.
  pub shards: Vec<(ShardId, ShardOutcome)>,
}

impl SupervisorReport {
  /// Number of workers that were started.
  pub fn worker_count(&self) -> usize {
    self.shards.len()
  }

  /// Summaries of the workers that finished cleanly.
  pub fn summaries(&self) -> impl Iterator<Item = &ShardSummary> {
    self.shards.iter().filter_map(|(_, outcome)| match outcome {
      ShardOutcome::Finished(summary) => Some(summary),
      _ => None,
    })
  }

  /// Number of workers that failed or panicked.
  pub fn failures(&self) -> usize {
    self
      .shards
      .iter()
      .filter(|(_, outcome)| !matches!(outcome, ShardOutcome::Finished(_)))
      .count()
  }

  /// Mean over everything the cleanly finished workers consumed.
  pub fn overall(&self) -> RunningAverage {
    self
      .summaries()
      .fold(RunningAverage::new(), |acc, summary| acc.merge(&summary.average))
  }
}

/// Runs one shard consumer per partition of a topic.
pub struct ConsumerSupervisor<C>
where
  C: BrokerConnector,
{
  connector: C,
  reporter: Arc<dyn ProgressReporter>,
  poll_interval: Duration,
}

impl<C> ConsumerSupervisor<C>
where
  C: BrokerConnector,
{
  /// Creates a supervisor with the default poll interval of one second.
  pub fn new(connector: C, reporter: impl ProgressReporter) -> Self {
    Self {
      connector,
      reporter: Arc::new(reporter),
      poll_interval: Duration::from_millis(1000),
    }
  }

  /// Creates a supervisor using the configured poll interval.
  pub fn from_config(connector: C, reporter: impl ProgressReporter, config: &PipelineConfig) -> Self {
    Self::new(connector, reporter).with_poll_interval(config.poll_interval())
  }

  /// Sets the upper bound on a single poll.
  #[must_use]
  pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
    self.poll_interval = poll_interval;
    self
  }

  /// Consumes every shard of `topic` until `cancel` fires.
  ///
  /// Returns once every worker has stopped. Worker failures are recorded in
  /// the report; only startup failures are returned as errors.
  pub async fn consume_all_shards(
    &self,
    topic: &str,
    cancel: CancellationToken,
  ) -> Result<SupervisorReport, PipelineError> {
    let partitions = self.lookup_partitions(topic).await?;
    info!(
      topic = %topic,
      partitions = partitions.len(),
      "Starting shard consumers"
    );

    // Fires when the caller cancels, when startup fails, or when this
    // future is dropped, so no worker outlives the supervisor.
    let workers_cancel = cancel.child_token();
    let _stop_workers = workers_cancel.clone().drop_guard();

    let mut workers: Vec<(ShardId, JoinHandle<Result<ShardSummary, BrokerError>>)> =
      Vec::with_capacity(partitions.len());
    for index in 0..partitions.len() {
      let shard = ShardId(index);
      let client = match self.connector.connect(ClientRole::Consumer).await {
        Ok(client) => client,
        Err(source) => {
          error!(
            shard = %shard,
            topic = %topic,
            error = %source,
            "Failed to start shard consumer, stopping the others"
          );
          workers_cancel.cancel();
          join_workers(workers).await;
          return Err(PipelineError::Startup { shard, source });
        }
      };
      workers.push((shard, self.spawn_worker(shard, client, topic, workers_cancel.clone())));
    }

    let shards = join_workers(workers).await;
    Ok(SupervisorReport {
      topic: topic.to_string(),
      partitions,
      shards,
    })
  }

  async fn lookup_partitions(&self, topic: &str) -> Result<Vec<i32>, PipelineError> {
    let mut client = self.connector.connect(ClientRole::Consumer).await?;
    let lookup = client.partitions_for(topic).await;
    Ok(close_with(&mut client, lookup, "consumer_supervisor").await?)
  }

  fn spawn_worker(
    &self,
    shard: ShardId,
    client: C::Client,
    topic: &str,
    cancel: CancellationToken,
  ) -> JoinHandle<Result<ShardSummary, BrokerError>> {
    let mut consumer = ShardConsumer::new(
      shard,
      client,
      Arc::clone(&self.reporter),
      self.poll_interval,
    );
    let topic = topic.to_string();
    tokio::spawn(async move { consumer.run(&topic, cancel).await })
  }
}

async fn join_workers(
  workers: Vec<(ShardId, JoinHandle<Result<ShardSummary, BrokerError>>)>,
) -> Vec<(ShardId, ShardOutcome)> {
  let mut outcomes = Vec::with_capacity(workers.len());
  for (shard, handle) in workers {
    let outcome = match handle.await {
      Ok(Ok(summary)) => ShardOutcome::Finished(summary),
      Ok(Err(err)) => {
        warn!(shard = %shard, error = %err, "Shard consumer ended with an error");
        ShardOutcome::Failed(err)
      }
      Err(join_err) => {
        error!(shard = %shard, error = %join_err, "Shard consumer task did not complete");
        ShardOutcome::Panicked(describe_join_error(join_err))
      }
    };
    outcomes.push((shard, outcome));
  }
  outcomes
}

fn describe_join_error(err: JoinError) -> String {
  if err.is_panic() {
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
      return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
      return message.clone();
    }
    return "worker panicked".to_string();
  }
  err.to_string()
}
