//! Sources of values for the publisher.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;

/// Supplies the values the publisher sends.
pub trait ValueSource: Send {
  /// Returns the next value, or `None` when the source is exhausted.
  fn next_value(&mut self) -> Option<f64>;
}

/// Uniform values in `[0, 1)` from a seeded generator.
///
/// The same seed always yields the same sequence, so repeated runs publish
/// the same values to the same partitions.
#[derive(Debug, Clone)]
pub struct SeededValueSource {
  rng: StdRng,
  seed: u64,
}

impl SeededValueSource {
  /// Creates a source seeded with `seed`.
  pub fn new(seed: u64) -> Self {
    Self {
      rng: StdRng::seed_from_u64(seed),
      seed,
    }
  }

  /// The seed this source was created with.
  pub fn seed(&self) -> u64 {
    self.seed
  }
}

impl ValueSource for SeededValueSource {
  fn next_value(&mut self) -> Option<f64> {
    Some(self.rng.gen::<f64>())
  }
}

/// Replays a fixed list of values, then runs dry.
#[derive(Debug, Clone, Default)]
pub struct FixedValueSource {
  values: VecDeque<f64>,
}

impl FixedValueSource {
  /// Creates a source that yields `values` in order.
  pub fn new(values: impl IntoIterator<Item = f64>) -> Self {
    Self {
      values: values.into_iter().collect(),
    }
  }
}

impl ValueSource for FixedValueSource {
  fn next_value(&mut self) -> Option<f64> {
    self.values.pop_front()
  }
}
