//! Command-line surface.
//!
//! ```text
//! shardweave produce <topic> [--count N]
//! shardweave consume <topic>
//! shardweave demo [--topic T] [--count N] [--partitions K]
//! ```

use crate::broker::memory::InMemoryBroker;
use crate::broker::BrokerConnector;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::progress::StdoutReporter;
use crate::publisher::Publisher;
use crate::supervisor::{ConsumerSupervisor, ShardOutcome, SupervisorReport};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio::task::JoinError;
use tracing::{info, warn};

/// How often `demo` checks whether every record has been consumed.
const DRAIN_CHECK_INTERVAL: Duration = Duration::from_millis(20);

/// Stream random numbers through a partitioned topic.
#[derive(Parser, Debug)]
#[command(name = "shardweave")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Stream random numbers through a partitioned topic and average each shard")]
pub struct Cli {
  /// Broker addresses, comma separated.
  #[arg(long, global = true, env = "SHARDWEAVE_BOOTSTRAP_SERVERS")]
  pub bootstrap_servers: Option<String>,

  /// Consumer group shared by all shard consumers.
  #[arg(long, global = true, env = "SHARDWEAVE_GROUP_ID")]
  pub group_id: Option<String>,

  /// JSON file with pipeline settings.
  #[arg(long, global = true, env = "SHARDWEAVE_CONFIG")]
  pub config: Option<PathBuf>,

  /// Subcommand to run.
  #[command(subcommand)]
  pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// Consume numbers and print each shard's running average.
  Consume {
    /// The topic to consume messages from.
    topic: String,
  },
  /// Produce numbers and send them to the topic.
  Produce {
    /// The topic to send messages to.
    topic: String,
    /// The number of messages to produce.
    #[arg(long)]
    count: Option<usize>,
  },
  /// Produce and consume through an in-process broker.
  Demo {
    /// Topic to create on the in-process broker.
    #[arg(long, default_value = "numbers")]
    topic: String,
    /// The number of messages to produce.
    #[arg(long)]
    count: Option<usize>,
    /// Number of partitions to create.
    #[arg(long, default_value_t = 2)]
    partitions: usize,
  },
}

impl Cli {
  /// Builds the pipeline configuration: defaults, then the config file,
  /// then command-line overrides.
  pub fn load_config(&self) -> Result<PipelineConfig, PipelineError> {
    let mut config = match &self.config {
      Some(path) => PipelineConfig::from_json_file(path)?,
      None => PipelineConfig::default(),
    };
    if let Some(servers) = &self.bootstrap_servers {
      config = config.with_bootstrap_servers(servers.clone());
    }
    if let Some(group_id) = &self.group_id {
      config = config.with_group_id(group_id.clone());
    }
    config.validate()?;
    Ok(config)
  }
}

/// Runs the parsed command until it completes or `cancel` fires.
pub async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), PipelineError> {
  let config = cli.load_config()?;
  match cli.command {
    Command::Produce { topic, count } => {
      let count = count.unwrap_or(config.default_count);
      produce(kafka_connector(&config)?, &config, &topic, count).await?;
    }
    Command::Consume { topic } => {
      let report = consume(kafka_connector(&config)?, &config, &topic, cancel).await?;
      print_report(&report);
    }
    Command::Demo {
      topic,
      count,
      partitions,
    } => {
      let count = count.unwrap_or(config.default_count);
      let config = config.with_even_partitions(partitions);
      config.validate()?;
      let report = demo(&config, &topic, count, cancel).await?;
      print_report(&report);
    }
  }
  Ok(())
}

/// Publishes `count` values to `topic` through `connector`.
pub async fn produce<C: BrokerConnector>(
  connector: C,
  config: &PipelineConfig,
  topic: &str,
  count: usize,
) -> Result<usize, PipelineError> {
  Publisher::from_config(connector, config)
    .produce(topic, count, config.expected_partitions)
    .await
}

/// Consumes every shard of `topic` until `cancel` fires.
pub async fn consume<C: BrokerConnector>(
  connector: C,
  config: &PipelineConfig,
  topic: &str,
  cancel: CancellationToken,
) -> Result<SupervisorReport, PipelineError> {
  ConsumerSupervisor::from_config(connector, StdoutReporter, config)
    .consume_all_shards(topic, cancel)
    .await
}

/// Runs publisher and consumers against an in-process broker and stops the
/// consumers once every published value has been read.
pub async fn demo(
  config: &PipelineConfig,
  topic: &str,
  count: usize,
  cancel: CancellationToken,
) -> Result<SupervisorReport, PipelineError> {
  let broker = InMemoryBroker::with_options(config.group_id.clone(), config.max_poll_records);
  broker.create_topic(topic, config.expected_partitions);

  let consumers_cancel = cancel.child_token();
  let supervisor = ConsumerSupervisor::from_config(broker.clone(), StdoutReporter, config);
  let consumer_topic = topic.to_string();
  let supervisor_cancel = consumers_cancel.clone();
  let consumers = tokio::spawn(async move {
    supervisor
      .consume_all_shards(&consumer_topic, supervisor_cancel)
      .await
  });

  let sent = match produce(broker.clone(), config, topic, count).await {
    Ok(sent) => sent,
    Err(err) => {
      consumers_cancel.cancel();
      if let Err(join_err) = consumers.await {
        warn!(topic = %topic, error = %join_err, "Consumer supervisor did not complete");
      }
      return Err(err);
    }
  };
  info!(topic = %topic, sent, "Waiting for consumers to drain the topic");

  let mut ticker = tokio::time::interval(DRAIN_CHECK_INTERVAL);
  loop {
    tokio::select! {
      _ = consumers_cancel.cancelled() => break,
      _ = ticker.tick() => {
        if broker.is_drained(topic) {
          break;
        }
      }
    }
  }
  consumers_cancel.cancel();

  supervisor_result(consumers.await)
}

/// Flattens the outcome of the task that ran the consumer supervisor.
pub(crate) fn supervisor_result(
  joined: Result<Result<SupervisorReport, PipelineError>, JoinError>,
) -> Result<SupervisorReport, PipelineError> {
  joined.map_err(|err| PipelineError::SupervisorTask(err.to_string()))?
}

#[cfg(feature = "kafka")]
fn kafka_connector(
  config: &PipelineConfig,
) -> Result<crate::broker::kafka::KafkaConnector, PipelineError> {
  Ok(crate::broker::kafka::KafkaConnector::new(config.clone()))
}

#[cfg(not(feature = "kafka"))]
fn kafka_connector(_config: &PipelineConfig) -> Result<InMemoryBroker, PipelineError> {
  Err(PipelineError::Config(
    "this build has no Kafka support; rebuild with `--features kafka` or use `demo`".to_string(),
  ))
}

fn print_report(report: &SupervisorReport) {
  for (shard, outcome) in &report.shards {
    match outcome {
      ShardOutcome::Finished(summary) => println!(
        "{}: consumed {}, average {:.3}",
        shard,
        summary.count(),
        summary.mean()
      ),
      ShardOutcome::Failed(err) => println!("{}: failed: {}", shard, err),
      ShardOutcome::Panicked(message) => println!("{}: panicked: {}", shard, message),
    }
  }
  let overall = report.overall();
  println!(
    "topic {}: consumed {} across {} shard(s), average {:.3}",
    report.topic,
    overall.count(),
    report.worker_count(),
    overall.mean()
  );
}
