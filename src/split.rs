//! Seeded train/test partitioning
//!
//! Each record gets one weighted Bernoulli draw, in input order, from a
//! `StdRng` seeded with the pipeline seed. The same seed and the same row
//! order always produce the same partition.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

/// Default probability that a record lands in the training partition
pub const DEFAULT_TRAIN_FRACTION: f64 = 0.7;

#[derive(Error, Debug, PartialEq)]
pub enum SplitError {
    #[error("Training fraction must lie strictly between 0 and 1, got {0}")]
    InvalidFraction(f64),

    #[error("Split produced an empty partition (train: {train}, test: {test})")]
    EmptyPartition { train: usize, test: usize },
}

/// Row indices of the training and testing partitions, each in input order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

impl Partition {
    /// Total number of rows covered
    pub fn len(&self) -> usize {
        self.train.len() + self.test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fail unless both partitions hold at least one row
    pub fn ensure_non_empty(&self) -> Result<(), SplitError> {
        if self.train.is_empty() || self.test.is_empty() {
            return Err(SplitError::EmptyPartition {
                train: self.train.len(),
                test: self.test.len(),
            });
        }
        Ok(())
    }
}

/// Assign `n_rows` records to train (probability `train_fraction`) or test
pub fn split(n_rows: usize, train_fraction: f64, seed: u64) -> Result<Partition, SplitError> {
    if !(train_fraction > 0.0 && train_fraction < 1.0) {
        return Err(SplitError::InvalidFraction(train_fraction));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity((n_rows as f64 * train_fraction) as usize + 1);
    let mut test = Vec::new();

    for row in 0..n_rows {
        if rng.gen_bool(train_fraction) {
            train.push(row);
        } else {
            test.push(row);
        }
    }

    tracing::debug!(
        "Split {} rows with seed {}: {} train, {} test",
        n_rows,
        seed,
        train.len(),
        test.len()
    );
    Ok(Partition { train, test })
}
