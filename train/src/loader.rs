//! Shuffled fixed-size batch iteration over an in-memory dataset.

use crate::errors::{Result, TrainError};
use ndarray::{Array1, Array3, Axis};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

/// One mini-batch, gathered out of the shuffled order.
#[derive(Clone, Debug)]
pub struct Batch {
    /// Inputs, `(b, t, d)`
    pub x: Array3<f64>,
    /// Targets, `(b,)`
    pub y: Array1<f64>,
    /// Set on the final, possibly smaller batch of the epoch
    pub is_last: bool,
}

/// Owns the training split and hands out permuted fixed-size batches, the
/// last one smaller when the size does not divide the instance count.
pub struct BatchLoader {
    x: Array3<f64>,
    y: Array1<f64>,
    batch_size: usize,
    order: Vec<usize>,
    cursor: usize,
    rng: Xoshiro256Plus,
}

impl BatchLoader {
    pub fn new(x: Array3<f64>, y: Array1<f64>, batch_size: usize, seed: u64) -> Result<BatchLoader> {
        let n = x.shape()[0];
        if n == 0 {
            return Err(TrainError::InvalidConfigError(
                "training split is empty".to_string(),
            ));
        }
        if y.len() != n {
            return Err(TrainError::InvalidConfigError(format!(
                "{} inputs but {} targets",
                n,
                y.len()
            )));
        }
        if batch_size == 0 {
            return Err(TrainError::InvalidConfigError(
                "batch size must be at least 1".to_string(),
            ));
        }
        let mut loader = BatchLoader {
            x,
            y,
            batch_size,
            order: (0..n).collect(),
            cursor: 0,
            rng: Xoshiro256Plus::seed_from_u64(seed),
        };
        loader.reshuffle();
        Ok(loader)
    }

    pub fn n_instances(&self) -> usize {
        self.order.len()
    }

    /// The whole split in storage order, for epoch-end evaluation.
    pub fn data(&self) -> (ndarray::ArrayView3<f64>, ndarray::ArrayView1<f64>) {
        (self.x.view(), self.y.view())
    }

    /// Number of batches per epoch, the last one possibly smaller.
    pub fn n_batches(&self) -> usize {
        (self.n_instances() + self.batch_size - 1) / self.batch_size
    }

    /// Draws a fresh permutation and restarts the epoch.
    pub fn reshuffle(&mut self) {
        self.order.shuffle(&mut self.rng);
        self.cursor = 0;
    }

    /// Next batch of the current epoch, `None` once exhausted.
    pub fn one_batch(&mut self) -> Option<Batch> {
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let idx = &self.order[self.cursor..end];
        let batch = Batch {
            x: self.x.select(Axis(0), idx),
            y: self.y.select(Axis(0), idx),
            is_last: end == self.order.len(),
        };
        self.cursor = end;
        Some(batch)
    }
}
