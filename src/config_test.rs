//! Tests for pipeline configuration.

use crate::config::PipelineConfig;
use std::io::Write;
use std::time::Duration;

#[test]
fn test_defaults() {
  let config = PipelineConfig::default();
  assert_eq!(config.bootstrap_servers, "localhost:9092");
  assert_eq!(config.group_id, "PrimaryWorkers");
  assert_eq!(config.acks, "all");
  assert_eq!(config.linger_ms, 1);
  assert_eq!(config.poll_interval(), Duration::from_millis(1000));
  assert_eq!(config.expected_partitions, 2);
  assert_eq!(config.boundaries, vec![0.5]);
  assert_eq!(config.default_count, 256);
  assert!(config.validate().is_ok());
}

#[test]
fn test_builder() {
  let config = PipelineConfig::default()
    .with_bootstrap_servers("kafka:9092")
    .with_group_id("workers")
    .with_acks("1")
    .with_seed(9)
    .with_max_poll_records(10)
    .with_even_partitions(4);
  assert_eq!(config.bootstrap_servers, "kafka:9092");
  assert_eq!(config.group_id, "workers");
  assert_eq!(config.acks, "1");
  assert_eq!(config.seed, 9);
  assert_eq!(config.max_poll_records, 10);
  assert_eq!(config.expected_partitions, 4);
  assert_eq!(config.partitioner().partition_count(), 4);
  assert!(config.validate().is_ok());
}

#[test]
fn test_rejects_mismatched_boundaries() {
  let mut config = PipelineConfig::default();
  config.expected_partitions = 3;
  assert!(config.validate().is_err());
}

#[test]
fn test_rejects_descending_boundaries() {
  let config = PipelineConfig::default().with_boundaries(vec![0.7, 0.2]);
  assert!(config.validate().is_err());
}

#[test]
fn test_rejects_non_finite_boundaries() {
  let config = PipelineConfig::default().with_boundaries(vec![f64::NAN]);
  assert!(config.validate().is_err());
}

#[test]
fn test_rejects_zero_poll_interval() {
  let config = PipelineConfig::default().with_poll_interval_ms(0);
  assert!(config.validate().is_err());
}

#[test]
fn test_from_json_file_keeps_defaults() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  write!(file, r#"{{ "bootstrap_servers": "broker:1234", "seed": 5 }}"#).unwrap();
  let config = PipelineConfig::from_json_file(file.path()).unwrap();
  assert_eq!(config.bootstrap_servers, "broker:1234");
  assert_eq!(config.seed, 5);
  assert_eq!(config.group_id, "PrimaryWorkers");
}

#[test]
fn test_from_json_file_validates() {
  let mut file = tempfile::NamedTempFile::new().unwrap();
  write!(file, r#"{{ "expected_partitions": 3 }}"#).unwrap();
  assert!(PipelineConfig::from_json_file(file.path()).is_err());
}

#[test]
fn test_from_missing_file() {
  assert!(PipelineConfig::from_json_file("/nonexistent/shardweave.json").is_err());
}
