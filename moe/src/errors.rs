use thiserror::Error;

/// A result type for mixture model errors
pub type Result<T> = std::result::Result<T, MixtureError>;

/// An error when building or evaluating the mixture-of-experts model
#[derive(Error, Debug)]
pub enum MixtureError {
    /// When an unknown selector string or an inconsistent parameter set
    /// is supplied; raised at configuration time, before any training step
    #[error("Invalid configuration: {0}")]
    InvalidConfigError(String),
    /// When an invalid value is encountered
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When expert outputs do not match the expected batch/source shapes
    #[error("Shape error: {0}")]
    ShapeError(String),
}
