//! Incremental arithmetic mean.
//!
//! Unlike a moving average, which keeps a window of recent values, a running
//! average folds every value into a `(count, mean)` pair and needs O(1)
//! memory no matter how many values it has seen.

/// Running arithmetic mean over every value seen so far.
///
/// # Example
///
/// ```rust
/// use shardweave::running_average::RunningAverage;
///
/// let mut avg = RunningAverage::new();
/// assert_eq!(avg.update(0.1), 0.1);
/// assert!((avg.update(0.9) - 0.5).abs() < 1e-12);
/// assert_eq!(avg.count(), 2);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RunningAverage {
  count: u64,
  mean: f64,
}

impl RunningAverage {
  /// Creates an empty accumulator (`count = 0`, `mean = 0.0`).
  pub fn new() -> Self {
    Self::default()
  }

  /// Folds `value` into the mean and returns the new mean.
  ///
  /// Computes `(mean * count + value) / (count + 1)`. For the first value
  /// this divides by one and yields the value itself.
  pub fn update(&mut self, value: f64) -> f64 {
    let count = self.count as f64;
    self.mean = (self.mean * count + value) / (count + 1.0);
    self.count += 1;
    self.mean
  }

  /// Number of values folded in so far.
  pub fn count(&self) -> u64 {
    self.count
  }

  /// Current mean, `0.0` when no values have been seen.
  pub fn mean(&self) -> f64 {
    self.mean
  }

  /// Returns `true` if no values have been folded in.
  pub fn is_empty(&self) -> bool {
    self.count == 0
  }

  /// Combines two accumulators into the mean of both value sequences.
  ///
  /// The result is weighted by each side's count. Merging with an empty
  /// accumulator returns the other side unchanged.
  pub fn merge(&self, other: &RunningAverage) -> RunningAverage {
    if other.is_empty() {
      return *self;
    }
    if self.is_empty() {
      return *other;
    }
    let count = self.count + other.count;
    let mean =
      (self.mean * self.count as f64 + other.mean * other.count as f64) / count as f64;
    RunningAverage { count, mean }
  }
}

impl Extend<f64> for RunningAverage {
  fn extend<I: IntoIterator<Item = f64>>(&mut self, iter: I) {
    for value in iter {
      self.update(value);
    }
  }
}

impl FromIterator<f64> for RunningAverage {
  fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
    let mut avg = RunningAverage::new();
    avg.extend(iter);
    avg
  }
}
