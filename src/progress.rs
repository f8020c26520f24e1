//! Progress observations emitted by shard consumers.

use crate::shard_consumer::ShardId;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// One record folded into a shard's running average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
  /// Worker that consumed the record.
  pub shard: ShardId,
  /// Partition the record came from.
  pub partition: i32,
  /// The consumed value.
  pub value: f64,
  /// The shard's running average after folding in `value`.
  pub mean: f64,
  /// How many values the shard has consumed, including this one.
  pub count: u64,
}

impl fmt::Display for Progress {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "consumed = {:.3}, new average = {:.3} ({}, partition {})",
      self.value, self.mean, self.shard, self.partition
    )
  }
}

/// Receives progress observations. Shared by every shard consumer, so
/// implementations must be cheap and must not block.
pub trait ProgressReporter: Send + Sync + 'static {
  /// Called once per consumed record, in delivery order for each shard.
  fn report(&self, progress: &Progress);
}

impl<R: ProgressReporter + ?Sized> ProgressReporter for Arc<R> {
  fn report(&self, progress: &Progress) {
    (**self).report(progress)
  }
}

/// Prints one line per observation to stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutReporter;

impl ProgressReporter for StdoutReporter {
  fn report(&self, progress: &Progress) {
    println!("{}", progress);
  }
}

/// Forwards observations into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
  sender: mpsc::UnboundedSender<Progress>,
}

impl ChannelReporter {
  /// Creates a reporter and the receiving end of its channel.
  pub fn new() -> (Self, mpsc::UnboundedReceiver<Progress>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (Self { sender }, receiver)
  }
}

impl ProgressReporter for ChannelReporter {
  fn report(&self, progress: &Progress) {
    // A dropped receiver only means nobody is watching any more.
    let _ = self.sender.send(*progress);
  }
}

/// Discards every observation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
  fn report(&self, _progress: &Progress) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_display() {
    let progress = Progress {
      shard: ShardId(3),
      partition: 1,
      value: 0.25,
      mean: 0.5,
      count: 2,
    };
    assert_eq!(
      progress.to_string(),
      "consumed = 0.250, new average = 0.500 (shard 3, partition 1)"
    );
  }

  #[tokio::test]
  async fn test_channel_reporter_forwards() {
    let (reporter, mut rx) = ChannelReporter::new();
    let progress = Progress {
      shard: ShardId(0),
      partition: 0,
      value: 1.0,
      mean: 1.0,
      count: 1,
    };
    reporter.report(&progress);
    assert_eq!(rx.recv().await, Some(progress));
  }

  #[test]
  fn test_channel_reporter_tolerates_closed_receiver() {
    let (reporter, rx) = ChannelReporter::new();
    drop(rx);
    reporter.report(&Progress {
      shard: ShardId(0),
      partition: 0,
      value: 1.0,
      mean: 1.0,
      count: 1,
    });
  }
}
