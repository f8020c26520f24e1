//! Tests for the consumer supervisor.

use crate::broker::memory::InMemoryBroker;
use crate::error::{BrokerError, PipelineError};
use crate::progress::{ChannelReporter, NoopReporter, Progress, ProgressReporter};
use crate::shard_consumer::ShardId;
use crate::supervisor::{ConsumerSupervisor, ShardOutcome};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const POLL: Duration = Duration::from_millis(20);

async fn wait_until(mut condition: impl FnMut() -> bool) {
  tokio::time::timeout(Duration::from_secs(5), async {
    while !condition() {
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  })
  .await
  .expect("condition not reached in time");
}

#[tokio::test]
async fn test_spawns_one_worker_per_partition() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 4);
  let supervisor = ConsumerSupervisor::new(broker.clone(), NoopReporter).with_poll_interval(POLL);
  let cancel = CancellationToken::new();
  let stop = cancel.clone();
  let handle = tokio::spawn(async move { supervisor.consume_all_shards("numbers", stop).await });

  let watched = broker.clone();
  wait_until(move || watched.group_size("numbers") == 4).await;
  assert_eq!(broker.open_connections(), 4);
  cancel.cancel();

  let report = handle.await.unwrap().unwrap();
  assert_eq!(report.worker_count(), 4);
  assert_eq!(report.partitions, vec![0, 1, 2, 3]);
  let shards: Vec<ShardId> = report.shards.iter().map(|(shard, _)| *shard).collect();
  assert_eq!(shards, vec![ShardId(0), ShardId(1), ShardId(2), ShardId(3)]);
  assert_eq!(report.failures(), 0);
  // Metadata connection plus one per worker, all released.
  assert_eq!(broker.connections_opened(), 5);
  assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_shard_averages_are_independent() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 2);

  let (reporter, mut rx) = ChannelReporter::new();
  let supervisor = ConsumerSupervisor::new(broker.clone(), reporter).with_poll_interval(POLL);
  let cancel = CancellationToken::new();
  let stop = cancel.clone();
  let handle = tokio::spawn(async move { supervisor.consume_all_shards("numbers", stop).await });

  // Publish only once both members have joined, so the group is balanced.
  let watched = broker.clone();
  wait_until(move || watched.group_size("numbers") == 2).await;
  broker.append("numbers", 0, [0.1, 0.2, 0.3]).unwrap();
  broker.append("numbers", 1, [0.7, 0.9]).unwrap();

  let mut seen: Vec<Progress> = Vec::new();
  while seen.len() < 5 {
    let progress = tokio::time::timeout(Duration::from_secs(5), rx.recv())
      .await
      .expect("timed out waiting for progress")
      .expect("reporter closed");
    seen.push(progress);
  }
  cancel.cancel();
  let report = handle.await.unwrap().unwrap();

  // Each worker saw exactly one partition.
  let mut partitions_by_shard: HashMap<ShardId, HashSet<i32>> = HashMap::new();
  for progress in &seen {
    partitions_by_shard
      .entry(progress.shard)
      .or_default()
      .insert(progress.partition);
  }
  assert_eq!(partitions_by_shard.len(), 2);
  assert!(partitions_by_shard.values().all(|p| p.len() == 1));

  let mut means: Vec<(i32, u64, f64)> = seen
    .iter()
    .filter(|p| p.count == if p.partition == 0 { 3 } else { 2 })
    .map(|p| (p.partition, p.count, p.mean))
    .collect();
  means.sort_by_key(|(partition, _, _)| *partition);
  assert_eq!(means.len(), 2);
  assert!((means[0].2 - 0.2).abs() < 1e-12);
  assert!((means[1].2 - 0.8).abs() < 1e-12);

  let overall = report.overall();
  assert_eq!(overall.count(), 5);
  assert!((overall.mean() - 2.2 / 5.0).abs() < 1e-12);
}

#[tokio::test]
async fn test_unknown_topic_is_a_startup_error() {
  let broker = InMemoryBroker::new();
  let supervisor = ConsumerSupervisor::new(broker.clone(), NoopReporter);
  let result = supervisor
    .consume_all_shards("missing", CancellationToken::new())
    .await;
  assert!(matches!(
    result,
    Err(PipelineError::Broker(BrokerError::UnknownTopic(_)))
  ));
  assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_connect_failure_cancels_started_workers() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 3);
  // Metadata and the first worker connect, the second worker does not.
  broker.fail_connects_after(2);
  let supervisor = ConsumerSupervisor::new(broker.clone(), NoopReporter).with_poll_interval(POLL);

  let result = tokio::time::timeout(
    Duration::from_secs(5),
    supervisor.consume_all_shards("numbers", CancellationToken::new()),
  )
  .await
  .expect("supervisor did not return after startup failure");

  match result {
    Err(PipelineError::Startup { shard, source }) => {
      assert_eq!(shard, ShardId(1));
      assert!(matches!(source, BrokerError::ConnectFailed(_)));
    }
    other => panic!("expected startup error, got {:?}", other),
  }
  assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_worker_failure_is_reported_not_fatal() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 2);
  let supervisor = ConsumerSupervisor::new(broker.clone(), NoopReporter).with_poll_interval(POLL);
  let handle = tokio::spawn(async move {
    supervisor
      .consume_all_shards("numbers", CancellationToken::new())
      .await
  });

  let watched = broker.clone();
  wait_until(move || watched.group_size("numbers") == 2).await;
  broker.disconnect();

  let report = tokio::time::timeout(Duration::from_secs(5), handle)
    .await
    .expect("workers did not stop after disconnect")
    .unwrap()
    .unwrap();
  assert_eq!(report.failures(), 2);
  assert!(report
    .shards
    .iter()
    .all(|(_, outcome)| matches!(outcome, ShardOutcome::Failed(BrokerError::Disconnected(_)))));
  assert_eq!(broker.open_connections(), 0);
}

struct PanicOnValue(f64);

impl ProgressReporter for PanicOnValue {
  fn report(&self, progress: &Progress) {
    if progress.value == self.0 {
      panic!("bad value {}", progress.value);
    }
  }
}

#[tokio::test]
async fn test_worker_panic_is_reported() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 1);
  broker.append("numbers", 0, [13.0]).unwrap();
  let supervisor =
    ConsumerSupervisor::new(broker.clone(), PanicOnValue(13.0)).with_poll_interval(POLL);

  let report = tokio::time::timeout(
    Duration::from_secs(5),
    supervisor.consume_all_shards("numbers", CancellationToken::new()),
  )
  .await
  .expect("supervisor did not return after worker panic")
  .unwrap();

  match &report.shards[0].1 {
    ShardOutcome::Panicked(message) => assert!(message.contains("bad value 13")),
    other => panic!("expected panic outcome, got {:?}", other),
  }
  // The panicking task's client is released when the task unwinds.
  assert_eq!(broker.open_connections(), 0);
}

#[tokio::test]
async fn test_zero_partitions_returns_empty_report() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 0);
  let supervisor = ConsumerSupervisor::new(broker.clone(), NoopReporter);
  let report = supervisor
    .consume_all_shards("numbers", CancellationToken::new())
    .await
    .unwrap();
  assert_eq!(report.worker_count(), 0);
  assert_eq!(report.overall().count(), 0);
}
