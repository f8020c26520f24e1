//! # shardweave
//!
//! Partition a stream of numbers across the shards of a topic and keep a
//! running average per shard.
//!
//! ## Key Pieces
//!
//! - **Publisher**: validates the topic's partition count, routes each value
//!   to a partition by range, and publishes it fire-and-forget
//! - **ConsumerSupervisor**: starts one shard consumer per partition and
//!   joins them
//! - **ShardConsumer**: polls its share of the topic and folds every value
//!   into its own running average
//! - **Broker clients**: an in-process broker for tests and demos, and an
//!   rdkafka client behind the `kafka` feature
//!
//! ## Quick Start
//!
//! ```rust
//! use shardweave::broker::memory::InMemoryBroker;
//! use shardweave::config::PipelineConfig;
//! use shardweave::progress::NoopReporter;
//! use shardweave::publisher::Publisher;
//! use shardweave::supervisor::ConsumerSupervisor;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let broker = InMemoryBroker::new();
//! broker.create_topic("numbers", 2);
//! let config = PipelineConfig::default().with_poll_interval_ms(20);
//!
//! Publisher::from_config(broker.clone(), &config)
//!   .produce("numbers", 100, 2)
//!   .await
//!   .unwrap();
//!
//! let cancel = CancellationToken::new();
//! let supervisor = ConsumerSupervisor::from_config(broker.clone(), NoopReporter, &config);
//! let stop = cancel.clone();
//! let watcher = broker.clone();
//! tokio::spawn(async move {
//!   while !watcher.is_drained("numbers") {
//!     tokio::time::sleep(std::time::Duration::from_millis(10)).await;
//!   }
//!   stop.cancel();
//! });
//! let report = supervisor.consume_all_shards("numbers", cancel).await.unwrap();
//! assert_eq!(report.worker_count(), 2);
//! assert_eq!(report.overall().count(), 100);
//! # }
//! ```

#![deny(missing_docs)]

/// Broker capability set and its implementations.
pub mod broker;
/// Command-line surface.
pub mod cli;
/// Record payload encoding.
pub mod codec;
/// Pipeline configuration.
pub mod config;
/// Error types.
pub mod error;
/// Range partitioning of values.
pub mod partitioner;
/// Progress observations and reporters.
pub mod progress;
/// Validating, partitioning publisher.
pub mod publisher;
/// Incremental mean.
pub mod running_average;
/// Per-shard poll loop.
pub mod shard_consumer;
/// One consumer per shard, started and joined together.
pub mod supervisor;
/// Injectable sources of values to publish.
pub mod value_source;

#[cfg(test)]
mod config_test;
#[cfg(test)]
mod memory_broker_test;
#[cfg(test)]
mod supervisor_test;
