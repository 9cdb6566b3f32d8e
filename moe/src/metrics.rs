//! Regression error metrics and calibration measures.

use crate::errors::MixtureError;
use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The four error figures tracked along a training trajectory.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricTuple {
    pub rmse: f64,
    pub mae: f64,
    pub mape: f64,
    pub nnllk: f64,
}

impl MetricTuple {
    /// Computes all four figures from targets, predictions and the summed
    /// negative log-likelihood of the batch.
    pub fn new(y: &ArrayView1<f64>, py: &ArrayView1<f64>, nllk: f64) -> MetricTuple {
        MetricTuple {
            rmse: rmse(y, py),
            mae: mae(y, py),
            mape: mape(y, py),
            nnllk: nnllk / y.len() as f64,
        }
    }

    pub fn get(&self, metric: ValidationMetric) -> f64 {
        match metric {
            ValidationMetric::Rmse => self.rmse,
            ValidationMetric::Mae => self.mae,
            ValidationMetric::Mape => self.mape,
            ValidationMetric::Nnllk => self.nnllk,
        }
    }
}

/// Which error figure ranks validation trajectories.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMetric {
    Rmse,
    Mae,
    Mape,
    Nnllk,
}

impl FromStr for ValidationMetric {
    type Err = MixtureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "rmse" => Ok(ValidationMetric::Rmse),
            "mae" => Ok(ValidationMetric::Mae),
            "mape" => Ok(ValidationMetric::Mape),
            "nnllk" => Ok(ValidationMetric::Nnllk),
            _ => Err(MixtureError::InvalidConfigError(format!(
                "unknown validation metric '{s}'"
            ))),
        }
    }
}

/// Root mean squared error.
pub fn rmse(y: &ArrayView1<f64>, py: &ArrayView1<f64>) -> f64 {
    let n = y.len() as f64;
    let sq: f64 = y
        .iter()
        .zip(py.iter())
        .map(|(a, b)| (a - b) * (a - b))
        .sum();
    (sq / n).sqrt()
}

/// Mean absolute error.
pub fn mae(y: &ArrayView1<f64>, py: &ArrayView1<f64>) -> f64 {
    let n = y.len() as f64;
    y.iter().zip(py.iter()).map(|(a, b)| (a - b).abs()).sum::<f64>() / n
}

/// Mean absolute percentage error, skipping near-zero targets.
pub fn mape(y: &ArrayView1<f64>, py: &ArrayView1<f64>) -> f64 {
    let mut total = 0.;
    let mut count = 0usize;
    for (a, b) in y.iter().zip(py.iter()) {
        if a.abs() > 1e-5 {
            total += ((a - b) / a).abs();
            count += 1;
        }
    }
    if count == 0 {
        0.
    } else {
        total / count as f64
    }
}

/// Fraction of targets falling inside `[low, up]`.
pub fn coverage_proba(y: &ArrayView1<f64>, low: &ArrayView1<f64>, up: &ArrayView1<f64>) -> f64 {
    let covered = y
        .iter()
        .zip(low.iter().zip(up.iter()))
        .filter(|(v, (l, u))| *v >= *l && *v <= *u)
        .count();
    covered as f64 / y.len() as f64
}

/// Mean interval width over the covered targets only, 0 when none covered.
pub fn interval_width(y: &ArrayView1<f64>, low: &ArrayView1<f64>, up: &ArrayView1<f64>) -> f64 {
    let mut total = 0.;
    let mut count = 0usize;
    for (v, (l, u)) in y.iter().zip(low.iter().zip(up.iter())) {
        if v >= l && v <= u {
            total += u - l;
            count += 1;
        }
    }
    if count == 0 {
        0.
    } else {
        total / count as f64
    }
}
