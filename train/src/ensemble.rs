//! Uniform Bayesian aggregation over snapshot predictions with a
//! data/model variance decomposition.

use crate::errors::{Result, TrainError};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use snapmix_moe::{coverage_proba, interval_width, mae, mape, rmse, MixturePrediction, EPS};

/// Ensemble error figures on an evaluation set.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnsembleErrors {
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    /// Normalized negative log of the snapshot-averaged likelihood
    pub nnllk: f64,
    /// Coverage of the `mean ± 2σ_model` interval
    pub coverage_model: f64,
    /// Coverage of the `mean ± 2σ_total` interval
    pub coverage_total: f64,
    /// Width of the total interval over covered instances
    pub width_total: f64,
    /// Mean total predictive standard deviation
    pub std_total_mean: f64,
}

/// Per-instance ensemble prediction with decomposed uncertainty.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnsemblePrediction {
    pub mean: Array1<f64>,
    pub var_total: Array1<f64>,
    /// Expected per-snapshot predictive variance (heteroskedastic noise)
    pub var_data: Array1<f64>,
    /// Variance of the per-snapshot means (parameter uncertainty)
    pub var_model: Array1<f64>,
    pub gate_mean: Array2<f64>,
    pub gate_var: Array2<f64>,
    /// Raw per-snapshot gate matrices, for offline analysis
    pub gate_samples: Vec<Array2<f64>>,
}

/// Collects one [`MixturePrediction`] per snapshot over a fixed evaluation
/// batch and aggregates them.
#[derive(Default)]
pub struct EnsembleInference {
    samples: Vec<MixturePrediction>,
}

impl EnsembleInference {
    pub fn new() -> EnsembleInference {
        EnsembleInference::default()
    }

    pub fn n_samples(&self) -> usize {
        self.samples.len()
    }

    /// Adds one snapshot's prediction; all snapshots must cover the same
    /// batch.
    pub fn add_sample(&mut self, sample: MixturePrediction) -> Result<()> {
        if let Some(first) = self.samples.first() {
            if sample.mean.len() != first.mean.len() || sample.gates.dim() != first.gates.dim() {
                return Err(TrainError::InvalidConfigError(format!(
                    "snapshot predicts {} instances, ensemble holds {}",
                    sample.mean.len(),
                    first.mean.len()
                )));
            }
        }
        self.samples.push(sample);
        Ok(())
    }

    /// Aggregates the collected snapshots against the targets `y`.
    ///
    /// The Bayesian mean averages snapshot means; the total variance splits
    /// exactly into the data part (mean of snapshot variances) and the model
    /// part (variance of snapshot means). A single snapshot passes through
    /// with zero model variance.
    pub fn bayesian_inference(
        &self,
        y: &ArrayView1<f64>,
    ) -> Result<(EnsembleErrors, EnsemblePrediction)> {
        let k = self.samples.len();
        if k == 0 {
            return Err(TrainError::EmptyEnsembleError);
        }
        let n = self.samples[0].mean.len();
        if y.len() != n {
            return Err(TrainError::InvalidConfigError(format!(
                "{} targets for an ensemble over {} instances",
                y.len(),
                n
            )));
        }
        let t = self.samples[0].gates.ncols();
        let kf = k as f64;

        let mut mean = Array1::<f64>::zeros(n);
        let mut mean_sq = Array1::<f64>::zeros(n);
        let mut var_data = Array1::<f64>::zeros(n);
        let mut lk_mean = Array1::<f64>::zeros(n);
        let mut gate_mean = Array2::<f64>::zeros((n, t));
        let mut gate_sq = Array2::<f64>::zeros((n, t));
        for s in &self.samples {
            mean += &s.mean;
            mean_sq += &s.mean.mapv(|m| m * m);
            var_data += &s.var;
            lk_mean += &s.likelihood;
            gate_mean += &s.gates;
            gate_sq += &s.gates.mapv(|g| g * g);
        }
        mean /= kf;
        mean_sq /= kf;
        var_data /= kf;
        lk_mean /= kf;
        gate_mean /= kf;
        gate_sq /= kf;

        let var_model = (&mean_sq - &mean.mapv(|m| m * m)).mapv(|v| v.max(0.));
        let var_total = &var_data + &var_model;
        let gate_var = (&gate_sq - &gate_mean.mapv(|g| g * g)).mapv(|v| v.max(0.));

        let nnllk = lk_mean.mapv(|l| -(l + EPS).ln()).mean().unwrap_or(0.);
        let std_total = var_total.mapv(f64::sqrt);
        let std_model = var_model.mapv(f64::sqrt);
        let low_total = &mean - &std_total.mapv(|s| 2.0 * s);
        let up_total = &mean + &std_total.mapv(|s| 2.0 * s);
        let low_model = &mean - &std_model.mapv(|s| 2.0 * s);
        let up_model = &mean + &std_model.mapv(|s| 2.0 * s);

        let errors = EnsembleErrors {
            rmse: rmse(y, &mean.view()),
            mae: mae(y, &mean.view()),
            mape: mape(y, &mean.view()),
            nnllk,
            coverage_model: coverage_proba(y, &low_model.view(), &up_model.view()),
            coverage_total: coverage_proba(y, &low_total.view(), &up_total.view()),
            width_total: interval_width(y, &low_total.view(), &up_total.view()),
            std_total_mean: std_total.mean().unwrap_or(0.),
        };
        let prediction = EnsemblePrediction {
            mean,
            var_total,
            var_data,
            var_model,
            gate_mean,
            gate_var,
            gate_samples: self.samples.iter().map(|s| s.gates.clone()).collect(),
        };
        Ok((errors, prediction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sample(mean: f64, var: f64, lk: f64, gate: f64) -> MixturePrediction {
        MixturePrediction {
            mean: array![mean],
            var: array![var],
            component_means: array![[mean - 0.5, mean + 0.5]],
            component_vars: array![[var, var]],
            likelihood: array![lk],
            gates: array![[gate, 1.0 - gate]],
        }
    }

    #[test]
    fn test_empty_ensemble_rejected() {
        let ens = EnsembleInference::new();
        let y = array![0.0];
        assert!(matches!(
            ens.bayesian_inference(&y.view()),
            Err(TrainError::EmptyEnsembleError)
        ));
    }

    #[test]
    fn test_single_snapshot_passthrough() {
        let mut ens = EnsembleInference::new();
        ens.add_sample(sample(1.5, 0.8, 0.4, 0.3)).unwrap();
        let y = array![1.5];
        let (errors, pred) = ens.bayesian_inference(&y.view()).unwrap();
        assert_abs_diff_eq!(pred.mean[0], 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(pred.var_model[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pred.var_total[0], 0.8, epsilon = 1e-12);
        assert_abs_diff_eq!(errors.rmse, 0.0, epsilon = 1e-12);
        assert!(errors.nnllk.is_finite());
        assert_abs_diff_eq!(errors.coverage_total, 1.0);
    }

    #[test]
    fn test_variance_decomposition() {
        // two snapshots: means 1 and 3, variances 2 and 4
        // mean = 2, data var = 3, model var = (1+9)/2 - 4 = 1
        let mut ens = EnsembleInference::new();
        ens.add_sample(sample(1.0, 2.0, 0.5, 0.2)).unwrap();
        ens.add_sample(sample(3.0, 4.0, 0.3, 0.6)).unwrap();
        let y = array![2.0];
        let (errors, pred) = ens.bayesian_inference(&y.view()).unwrap();
        assert_abs_diff_eq!(pred.mean[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pred.var_data[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pred.var_model[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pred.var_total[0], 4.0, epsilon = 1e-12);
        assert_abs_diff_eq!(errors.nnllk, -(0.4f64 + 1e-5).ln(), epsilon = 1e-12);
        // gates: mean 0.4, population variance 0.04
        assert_abs_diff_eq!(pred.gate_mean[[0, 0]], 0.4, epsilon = 1e-12);
        assert_abs_diff_eq!(pred.gate_var[[0, 0]], 0.04, epsilon = 1e-12);
        assert_eq!(pred.gate_samples.len(), 2);
    }

    #[test]
    fn test_mismatched_batch_rejected() {
        let mut ens = EnsembleInference::new();
        ens.add_sample(sample(1.0, 1.0, 0.5, 0.5)).unwrap();
        let bad = MixturePrediction {
            mean: array![1.0, 2.0],
            var: array![1.0, 1.0],
            component_means: array![[0.5, 1.5], [1.5, 2.5]],
            component_vars: array![[1.0, 1.0], [1.0, 1.0]],
            likelihood: array![0.5, 0.5],
            gates: array![[0.5, 0.5], [0.5, 0.5]],
        };
        assert!(ens.add_sample(bad).is_err());
    }
}
