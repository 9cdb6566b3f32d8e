//! Snapshot-ensemble training for heteroskedastic mixture models.
//!
//! The crate turns one dataset and one hyperparameter space into a
//! calibrated ensemble in three passes:
//!
//! 1. [`HpSearchDriver`] runs a [`Trainer`] per sampled configuration and
//!    ranks trajectories by a validation metric;
//! 2. [`select_snapshots`] picks the retained optimizer steps (validation
//!    top performers and the post-burn-in tail) for the winning
//!    configuration, and a second training pass checkpoints them through a
//!    [`Persistence`] store;
//! 3. [`EnsembleInference`] averages the snapshot predictions into a
//!    Bayesian mean with the total variance split into data and model
//!    parts.
//!
//! Every stage appends machine-parseable JSON lines to a [`RunLog`].
//! Training is strictly sequential: one model, one optimizer step at a
//! time.

mod driver;
mod ensemble;
mod errors;
mod loader;
mod logfile;
mod model;
mod persistence;
mod selector;
mod trainer;
mod types;

pub use driver::{DriverConfig, HpSearchDriver, SearchOutcome};
pub use ensemble::{EnsembleErrors, EnsembleInference, EnsemblePrediction};
pub use errors::{Result, TrainError};
pub use loader::{Batch, BatchLoader};
pub use logfile::{dump_prediction, LogRecord, RunLog};
pub use model::MixtureModel;
pub use persistence::{DirPersistence, MemoryPersistence, Persistence};
pub use selector::{rank_trajectory, select_snapshots, SnapshotSelection};
pub use trainer::{SnapshotSets, TrainConfig, Trainer};
pub use types::{
    DifferentiableModel, GradientDescent, ModelState, SnapshotKind, SnapshotPolicy,
    TrajectoryRecord,
};
