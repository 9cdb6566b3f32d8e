use crate::errors::Result;
use ndarray::{Array1, ArrayView1, ArrayView3};
use serde::{Deserialize, Serialize};
use snapmix_moe::{MetricTuple, MixturePrediction};

/// Serializable snapshot of a model's flat parameter vector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelState {
    pub theta: Vec<f64>,
}

/// A model the training loop can step, score and checkpoint.
///
/// Gradient computation stays behind `train_step`; the loop never sees
/// derivatives, only the monitored loss value.
pub trait DifferentiableModel {
    /// One optimizer step on a batch at the given learning rate; returns the
    /// monitored training loss before the update.
    fn train_step(&mut self, x: &ArrayView3<f64>, y: &ArrayView1<f64>, lr: f64) -> Result<f64>;

    /// Error figures on a dataset.
    fn evaluate(&self, x: &ArrayView3<f64>, y: &ArrayView1<f64>) -> Result<MetricTuple>;

    /// Error figures plus the per-instance predictive quantities ensemble
    /// aggregation consumes.
    fn predict(
        &self,
        x: &ArrayView3<f64>,
        y: &ArrayView1<f64>,
    ) -> Result<(MetricTuple, MixturePrediction)>;

    /// Current parameters as a serializable snapshot.
    fn state(&self) -> ModelState;

    /// Restores a previously saved snapshot.
    fn restore(&mut self, state: &ModelState) -> Result<()>;
}

/// Plain gradient descent update, `theta <- theta - lr * grad`.
#[derive(Clone, Copy, Debug, Default)]
pub struct GradientDescent;

impl GradientDescent {
    pub fn step(&self, theta: &mut Array1<f64>, grad: &Array1<f64>, lr: f64) {
        theta.scaled_add(-lr, grad);
    }
}

/// One trajectory entry: train/validation error figures at an optimizer step.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRecord {
    pub step: usize,
    pub epoch: usize,
    pub train: MetricTuple,
    pub valid: MetricTuple,
}

/// When validation metrics are recorded along the trajectory.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SnapshotPolicy {
    /// Once at the end of every epoch
    EpochEnd,
    /// After each batch with the given Bernoulli probability, plus the epoch
    /// end
    BatchWise(f64),
}

/// Which retained-epoch set triggered a snapshot save.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnapshotKind {
    Top,
    Bayes,
    Both,
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn test_gradient_descent_step() {
        let mut theta = array![1.0, -2.0];
        let grad = array![0.5, -0.5];
        GradientDescent.step(&mut theta, &grad, 0.1);
        assert_abs_diff_eq!(theta[0], 0.95, epsilon = 1e-12);
        assert_abs_diff_eq!(theta[1], -1.95, epsilon = 1e-12);
    }
}
