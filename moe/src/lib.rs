//! Heteroskedastic mixture-of-experts probability model.
//!
//! A mixture combines one expert per data source. Each expert produces a
//! per-source mean, a variance (or precision) pre-activation, and a gate
//! logit; the mixture layer turns logits into row-stochastic gates, applies
//! the variance link, and evaluates the loss family with its penalties.
//!
//! The model is configured through [`MixtureParams`], validated into
//! [`MixtureValidParams`], and evaluated over the outputs of any [`Expert`].
//! [`LinearMixtureNet`] is the built-in reference expert: linear heads over
//! the flattened history window with all parameters in one flat vector.
//!
//! # Example
//!
//! ```
//! use snapmix_moe::{LinearMixtureNet, MixtureParams, Expert, LossFamily};
//! use linfa::ParamGuard;
//! use ndarray::{array, Array3};
//! use ndarray_rand::rand::SeedableRng;
//! use rand_xoshiro::Xoshiro256Plus;
//!
//! let params = MixtureParams::new(2, 3)
//!     .loss(LossFamily::HeteroLikInv)
//!     .check()
//!     .unwrap();
//! let net = LinearMixtureNet::new(params.clone()).unwrap();
//! let mut rng = Xoshiro256Plus::seed_from_u64(42);
//! let theta = net.init_params(&mut rng);
//!
//! let x = Array3::from_shape_fn((4, 2, 3), |(i, j, k)| (i + j + k) as f64 * 0.1);
//! let y = array![0.1, 0.4, 0.6, 0.9];
//! let out = net.forward(&theta, &x.view()).unwrap();
//! let norms = net.param_group_norms(&theta);
//! let eval = params.evaluate(&y.view(), &out, &norms).unwrap();
//! assert!(eval.loss.is_finite());
//! assert_eq!(eval.gates.dim(), (4, 2));
//! ```

mod algorithm;
mod errors;
mod expert;
mod metrics;
mod network;
mod parameters;
mod types;

pub use algorithm::{MixtureOutput, MixturePrediction};
pub use errors::{MixtureError, Result};
pub use expert::{Expert, ExpertOutput, ParamGroupNorms};
pub use metrics::{
    coverage_proba, interval_width, mae, mape, rmse, MetricTuple, ValidationMetric,
};
pub use network::LinearMixtureNet;
pub use parameters::{MixtureParams, MixtureValidParams};
pub use types::{
    BiasSpec, LatentDependence, LatentProbType, LossFamily, ModelFamily, RegulSpec, VarianceLink,
    EPS,
};
