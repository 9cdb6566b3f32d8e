//! `snapmix` gathers the snapmix crates under a single dependency:
//!
//! * [`search`] enumerates hyperparameter configurations (grid or
//!   deduplicated random draws),
//! * [`moe`] evaluates the heteroskedastic mixture-of-experts model
//!   under its selectable loss families,
//! * [`train`] runs the SGD loop with snapshot checkpointing, picks
//!   the retained snapshots and combines them into a Bayesian
//!   ensemble prediction.
//!
//! ```
//! use linfa::ParamGuard;
//! use ndarray::{Array1, Array3, Axis};
//! use snapmix::moe::{LossFamily, MixtureParams, RegulSpec};
//! use snapmix::train::{BatchLoader, DifferentiableModel, MixtureModel, SnapshotPolicy,
//!     TrainConfig, Trainer};
//!
//! # fn main() -> snapmix::train::Result<()> {
//! let x = Array3::from_shape_fn((16, 2, 3), |(i, j, k)| {
//!     ((i * 7 + j * 3 + k) % 11) as f64 / 11.
//! });
//! let y = x.mean_axis(Axis(2)).unwrap().mean_axis(Axis(1)).unwrap();
//!
//! let params = MixtureParams::new(2, 3)
//!     .loss(LossFamily::Mse)
//!     .regul(RegulSpec::empty())
//!     .check()?;
//! let mut model = MixtureModel::new(params, 42)?;
//! let mut loader = BatchLoader::new(x.clone(), y.clone(), 8, 0)?;
//! let config = TrainConfig {
//!     lr: 0.05,
//!     n_epochs: 2,
//!     warmup_steps: 0,
//!     decay_steps: None,
//!     policy: SnapshotPolicy::EpochEnd,
//!     seed: 42,
//! };
//! let records = Trainer::new(&mut model, &mut loader, x.view(), y.view(), config)?
//!     .run(None)?;
//! assert_eq!(records.len(), 2);
//! # Ok(())
//! # }
//! ```

pub use snapmix_moe as moe;
pub use snapmix_search as search;
pub use snapmix_train as train;
