//! # Range Partitioning
//!
//! Maps a value to a partition by comparing it against an ascending list of
//! boundaries. With `k - 1` boundaries there are `k` ranges:
//!
//! ```text
//! (-inf, b0) -> ids[0]
//! [b0, b1)   -> ids[1]
//! ...
//! [bk-2, inf) -> ids[k-1]
//! ```
//!
//! Each boundary belongs to the range above it. The partition ids themselves
//! come from the broker's metadata, so the partitioner never assumes they are
//! `0..k`.

/// Boundary used by the two-partition pipeline.
pub const DEFAULT_BOUNDARY: f64 = 0.5;

/// Chooses the partition id for `value`.
///
/// Returns `partition_ids[i]` where `i` is the number of boundaries that are
/// `<= value`. `NaN` compares below every boundary and lands in the first
/// partition.
///
/// The caller must pass `boundaries.len() + 1` ids and ascending boundaries.
/// This is checked in debug builds only.
///
/// # Example
///
/// ```rust
/// use shardweave::partitioner::choose_partition;
///
/// assert_eq!(choose_partition(0.49, &[0.5], &[0, 1]), 0);
/// assert_eq!(choose_partition(0.5, &[0.5], &[0, 1]), 1);
/// ```
pub fn choose_partition(value: f64, boundaries: &[f64], partition_ids: &[i32]) -> i32 {
  debug_assert_eq!(
    partition_ids.len(),
    boundaries.len() + 1,
    "need exactly one more partition id than boundaries"
  );
  debug_assert!(
    boundaries.windows(2).all(|w| w[0] <= w[1]),
    "boundaries must be ascending"
  );
  let index = boundaries.partition_point(|boundary| *boundary <= value);
  partition_ids[index]
}

/// A partitioner that owns its boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct RangePartitioner {
  boundaries: Vec<f64>,
}

impl RangePartitioner {
  /// Creates a partitioner from ascending boundaries.
  pub fn new(boundaries: Vec<f64>) -> Self {
    Self { boundaries }
  }

  /// Two partitions split at `boundary`.
  pub fn two_way(boundary: f64) -> Self {
    Self::new(vec![boundary])
  }

  /// `partitions` equally wide ranges over `[0, 1)`, which is the range the
  /// seeded value source draws from.
  pub fn evenly_spaced(partitions: usize) -> Self {
    let boundaries = (1..partitions.max(1))
      .map(|i| i as f64 / partitions as f64)
      .collect();
    Self::new(boundaries)
  }

  /// Number of partitions this partitioner distributes over.
  pub fn partition_count(&self) -> usize {
    self.boundaries.len() + 1
  }

  /// The boundaries, in ascending order.
  pub fn boundaries(&self) -> &[f64] {
    &self.boundaries
  }

  /// Chooses the partition id for `value` out of `partition_ids`.
  pub fn choose(&self, value: f64, partition_ids: &[i32]) -> i32 {
    choose_partition(value, &self.boundaries, partition_ids)
  }
}

impl Default for RangePartitioner {
  fn default() -> Self {
    Self::two_way(DEFAULT_BOUNDARY)
  }
}
