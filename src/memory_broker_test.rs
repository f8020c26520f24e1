//! Tests for the in-process broker.

use crate::broker::memory::InMemoryBroker;
use crate::broker::{BrokerClient, BrokerConnector, ClientRole, PublishRequest};
use crate::codec::encode_value;
use crate::error::BrokerError;
use bytes::Bytes;
use std::time::Duration;

const SHORT: Duration = Duration::from_millis(20);

#[tokio::test]
async fn test_partitions_for_known_and_unknown_topic() {
  let broker = InMemoryBroker::new();
  broker.create_topic_with_ids("numbers", vec![4, 9]);
  let mut client = broker.connect(ClientRole::Producer).await.unwrap();
  assert_eq!(client.partitions_for("numbers").await.unwrap(), vec![4, 9]);
  assert!(matches!(
    client.partitions_for("missing").await,
    Err(BrokerError::UnknownTopic(topic)) if topic == "missing"
  ));
}

#[tokio::test]
async fn test_send_rejects_unknown_partition() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 2);
  let mut client = broker.connect(ClientRole::Producer).await.unwrap();
  let err = client
    .send(PublishRequest::new("numbers", 5, 0.3))
    .await
    .unwrap_err();
  assert!(matches!(err, BrokerError::UnknownPartition { partition: 5, .. }));
  assert_eq!(broker.sent_count(), 0);
}

#[tokio::test]
async fn test_single_member_reads_every_partition_in_order() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 2);
  broker.append("numbers", 0, [0.1, 0.2]).unwrap();
  broker.append("numbers", 1, [0.7]).unwrap();

  let mut consumer = broker.connect(ClientRole::Consumer).await.unwrap();
  consumer.subscribe("numbers").await.unwrap();
  let batch = consumer.poll(SHORT).await.unwrap();
  let seen: Vec<(i32, i64, f64)> = batch.iter().map(|r| (r.partition, r.offset, r.value)).collect();
  assert_eq!(seen, vec![(0, 0, 0.1), (0, 1, 0.2), (1, 0, 0.7)]);
  assert!(broker.is_drained("numbers"));
  assert!(consumer.poll(SHORT).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_group_members_split_partitions() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 2);
  broker.append("numbers", 0, [0.1]).unwrap();
  broker.append("numbers", 1, [0.9]).unwrap();

  let mut first = broker.connect(ClientRole::Consumer).await.unwrap();
  let mut second = broker.connect(ClientRole::Consumer).await.unwrap();
  first.subscribe("numbers").await.unwrap();
  second.subscribe("numbers").await.unwrap();
  assert_eq!(broker.group_size("numbers"), 2);

  let a = first.poll(SHORT).await.unwrap();
  let b = second.poll(SHORT).await.unwrap();
  assert_eq!(a.len(), 1);
  assert_eq!(b.len(), 1);
  assert_eq!(a[0].partition, 0);
  assert_eq!(b[0].partition, 1);
}

#[tokio::test]
async fn test_partition_moves_to_remaining_member_after_close() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 2);
  broker.append("numbers", 1, [0.6]).unwrap();

  let mut first = broker.connect(ClientRole::Consumer).await.unwrap();
  let mut second = broker.connect(ClientRole::Consumer).await.unwrap();
  first.subscribe("numbers").await.unwrap();
  second.subscribe("numbers").await.unwrap();
  assert_eq!(second.poll(SHORT).await.unwrap().len(), 1);

  second.close().await.unwrap();
  broker.append("numbers", 1, [0.8]).unwrap();
  let batch = first.poll(SHORT).await.unwrap();
  assert_eq!(batch.len(), 1);
  assert_eq!(batch[0].offset, 1);
  assert_eq!(batch[0].value, 0.8);
}

#[tokio::test]
async fn test_poll_wakes_on_publish() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 1);
  let mut consumer = broker.connect(ClientRole::Consumer).await.unwrap();
  consumer.subscribe("numbers").await.unwrap();

  let publisher = broker.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(10)).await;
    publisher.append("numbers", 0, [0.42]).unwrap();
  });

  let batch = consumer.poll(Duration::from_secs(5)).await.unwrap();
  assert_eq!(batch.len(), 1);
  assert_eq!(batch[0].value, 0.42);
}

#[tokio::test]
async fn test_poll_respects_batch_limit() {
  let broker = InMemoryBroker::with_options("group", 2);
  broker.create_topic("numbers", 1);
  broker.append("numbers", 0, [1.0, 2.0, 3.0]).unwrap();
  let mut consumer = broker.connect(ClientRole::Consumer).await.unwrap();
  consumer.subscribe("numbers").await.unwrap();
  assert_eq!(consumer.poll(SHORT).await.unwrap().len(), 2);
  assert_eq!(consumer.poll(SHORT).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_poll_before_subscribe() {
  let broker = InMemoryBroker::new();
  let mut consumer = broker.connect(ClientRole::Consumer).await.unwrap();
  assert!(matches!(
    consumer.poll(SHORT).await,
    Err(BrokerError::NotSubscribed)
  ));
}

#[tokio::test]
async fn test_undecodable_payload_fails_poll() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 1);
  broker
    .append_raw("numbers", 0, [Bytes::from_static(b"abc")])
    .unwrap();
  let mut consumer = broker.connect(ClientRole::Consumer).await.unwrap();
  consumer.subscribe("numbers").await.unwrap();
  assert!(matches!(
    consumer.poll(SHORT).await,
    Err(BrokerError::Decode { actual: 3, .. })
  ));
}

#[tokio::test]
async fn test_undecodable_payload_keeps_earlier_records() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 1);
  broker
    .append_raw(
      "numbers",
      0,
      [encode_value(0.25), Bytes::from_static(b"abc")],
    )
    .unwrap();
  let mut consumer = broker.connect(ClientRole::Consumer).await.unwrap();
  consumer.subscribe("numbers").await.unwrap();

  let batch = consumer.poll(SHORT).await.unwrap();
  assert_eq!(batch.len(), 1);
  assert_eq!(batch[0].offset, 0);
  assert_eq!(batch[0].value, 0.25);
  assert_eq!(broker.committed_position("numbers", 0), 1);

  // The bad payload surfaces on the next poll and is not skipped.
  assert!(matches!(
    consumer.poll(SHORT).await,
    Err(BrokerError::Decode { actual: 3, .. })
  ));
  assert_eq!(broker.committed_position("numbers", 0), 1);
}

#[tokio::test]
async fn test_disconnect_fails_pending_poll() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 1);
  let mut consumer = broker.connect(ClientRole::Consumer).await.unwrap();
  consumer.subscribe("numbers").await.unwrap();

  let handle = broker.clone();
  tokio::spawn(async move {
    tokio::time::sleep(Duration::from_millis(10)).await;
    handle.disconnect();
  });

  assert!(matches!(
    consumer.poll(Duration::from_secs(5)).await,
    Err(BrokerError::Disconnected(_))
  ));
}

#[tokio::test]
async fn test_connection_accounting() {
  let broker = InMemoryBroker::new();
  let mut a = broker.connect(ClientRole::Producer).await.unwrap();
  let b = broker.connect(ClientRole::Consumer).await.unwrap();
  assert_eq!(broker.open_connections(), 2);

  a.close().await.unwrap();
  a.close().await.unwrap();
  assert_eq!(broker.open_connections(), 1);

  drop(b);
  assert_eq!(broker.open_connections(), 0);
  assert_eq!(broker.connections_opened(), 2);
}

#[tokio::test]
async fn test_closed_client_rejects_operations() {
  let broker = InMemoryBroker::new();
  broker.create_topic("numbers", 1);
  let mut client = broker.connect(ClientRole::Producer).await.unwrap();
  client.close().await.unwrap();
  assert!(client.partitions_for("numbers").await.is_err());
  assert!(client.send(PublishRequest::new("numbers", 0, 1.0)).await.is_err());
}

#[tokio::test]
async fn test_fail_connects_after() {
  let broker = InMemoryBroker::new();
  broker.fail_connects_after(1);
  assert!(broker.connect(ClientRole::Consumer).await.is_ok());
  assert!(matches!(
    broker.connect(ClientRole::Consumer).await,
    Err(BrokerError::ConnectFailed(_))
  ));
  assert!(broker.connect(ClientRole::Consumer).await.is_ok());
}
