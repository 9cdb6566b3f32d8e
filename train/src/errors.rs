use snapmix_moe::MixtureError;
use thiserror::Error;

/// A result type for training errors
pub type Result<T> = std::result::Result<T, TrainError>;

/// An error when training, selecting snapshots or aggregating an ensemble
#[derive(Error, Debug)]
pub enum TrainError {
    /// When a configuration is unusable; raised before any training step
    #[error("Invalid configuration: {0}")]
    InvalidConfigError(String),
    /// When the monitored loss turns non-finite at the given step; the run
    /// is abandoned, the surrounding search continues
    #[error("Numerical divergence at step {0}")]
    NumericalDivergence(usize),
    /// When inference is requested over zero snapshots
    #[error("Ensemble holds no snapshot")]
    EmptyEnsembleError,
    /// When the underlying mixture model fails
    #[error(transparent)]
    MixtureError(#[from] MixtureError),
    /// When IO fails
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// When (de)serializing a snapshot or log record fails
    #[error("Serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
}
