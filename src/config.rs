//! Pipeline configuration.

use crate::error::PipelineError;
use crate::partitioner::{RangePartitioner, DEFAULT_BOUNDARY};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Configuration shared by the publisher, the shard consumers and the broker
/// clients.
///
/// Every field has a default, so a JSON config file only needs the keys it
/// overrides.
///
/// # Example
///
/// ```rust
/// use shardweave::config::PipelineConfig;
///
/// let config = PipelineConfig::default()
///   .with_bootstrap_servers("kafka:9092")
///   .with_poll_interval_ms(250);
/// assert_eq!(config.expected_partitions, 2);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Bootstrap servers (comma-separated list of broker addresses).
  pub bootstrap_servers: String,
  /// Consumer group every shard consumer joins.
  pub group_id: String,
  /// Acknowledgement level for publishes ("0", "1", or "all").
  pub acks: String,
  /// Producer linger time in milliseconds.
  pub linger_ms: u64,
  /// Consumer offset auto-commit interval in milliseconds.
  pub auto_commit_interval_ms: u64,
  /// Upper bound on a single poll, in milliseconds.
  pub poll_interval_ms: u64,
  /// Maximum number of records returned by one poll.
  pub max_poll_records: usize,
  /// Partition count the target topic must have.
  pub expected_partitions: usize,
  /// Ascending partition boundaries, one fewer than `expected_partitions`.
  pub boundaries: Vec<f64>,
  /// Seed for the value generator.
  pub seed: u64,
  /// Number of values `produce` sends when no count is given.
  pub default_count: usize,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      bootstrap_servers: "localhost:9092".to_string(),
      group_id: "PrimaryWorkers".to_string(),
      acks: "all".to_string(),
      linger_ms: 1,
      auto_commit_interval_ms: 1000,
      poll_interval_ms: 1000,
      max_poll_records: 500,
      expected_partitions: 2,
      boundaries: vec![DEFAULT_BOUNDARY],
      seed: 0,
      default_count: 256,
    }
  }
}

impl PipelineConfig {
  /// Loads a configuration from a JSON file. Missing keys keep their
  /// defaults.
  pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PipelineError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path)
      .map_err(|e| PipelineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
    let config: Self = serde_json::from_str(&raw)
      .map_err(|e| PipelineError::Config(format!("cannot parse {}: {}", path.display(), e)))?;
    config.validate()?;
    Ok(config)
  }

  /// Checks that the boundaries are finite, ascending, and match the
  /// expected partition count.
  pub fn validate(&self) -> Result<(), PipelineError> {
    if self.expected_partitions == 0 {
      return Err(PipelineError::Config(
        "expected_partitions must be at least 1".to_string(),
      ));
    }
    if self.boundaries.len() + 1 != self.expected_partitions {
      return Err(PipelineError::Config(format!(
        "{} boundaries cannot split values into {} partitions",
        self.boundaries.len(),
        self.expected_partitions
      )));
    }
    if self.boundaries.iter().any(|b| !b.is_finite()) {
      return Err(PipelineError::Config(
        "boundaries must be finite".to_string(),
      ));
    }
    if self.boundaries.windows(2).any(|w| w[0] > w[1]) {
      return Err(PipelineError::Config(
        "boundaries must be ascending".to_string(),
      ));
    }
    if self.poll_interval_ms == 0 {
      return Err(PipelineError::Config(
        "poll_interval_ms must be positive".to_string(),
      ));
    }
    Ok(())
  }

  /// Poll interval as a `Duration`.
  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.poll_interval_ms)
  }

  /// Builds the partitioner described by `boundaries`.
  pub fn partitioner(&self) -> RangePartitioner {
    RangePartitioner::new(self.boundaries.clone())
  }

  /// Sets the bootstrap servers.
  #[must_use]
  pub fn with_bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
    self.bootstrap_servers = servers.into();
    self
  }

  /// Sets the consumer group id.
  #[must_use]
  pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
    self.group_id = group_id.into();
    self
  }

  /// Sets the acks configuration.
  #[must_use]
  pub fn with_acks(mut self, acks: impl Into<String>) -> Self {
    self.acks = acks.into();
    self
  }

  /// Sets the poll interval.
  #[must_use]
  pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
    self.poll_interval_ms = ms;
    self
  }

  /// Sets the maximum number of records per poll.
  #[must_use]
  pub fn with_max_poll_records(mut self, max: usize) -> Self {
    self.max_poll_records = max;
    self
  }

  /// Sets the seed for the value generator.
  #[must_use]
  pub fn with_seed(mut self, seed: u64) -> Self {
    self.seed = seed;
    self
  }

  /// Sets the expected partition count and splits `[0, 1)` evenly across
  /// that many partitions.
  #[must_use]
  pub fn with_even_partitions(mut self, partitions: usize) -> Self {
    self.expected_partitions = partitions;
    self.boundaries = RangePartitioner::evenly_spaced(partitions)
      .boundaries()
      .to_vec();
    self
  }

  /// Sets explicit boundaries and the matching expected partition count.
  #[must_use]
  pub fn with_boundaries(mut self, boundaries: Vec<f64>) -> Self {
    self.expected_partitions = boundaries.len() + 1;
    self.boundaries = boundaries;
    self
  }
}
