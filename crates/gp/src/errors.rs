use thiserror::Error;

/// A result type for GP regression algorithm
pub type Result<T> = std::result::Result<T, GpError>;

/// An error when using [`GaussianProcess`](crate::GaussianProcess), a covariance function
/// or the hyperparameter optimization driver
#[derive(Error, Debug)]
pub enum GpError {
    /// When array lengths or shapes disagree (hyperparameters, training data, flat vectors)
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    /// When the covariance matrix is not positive definite
    #[error("Singular covariance: {0}")]
    SingularCovariance(#[from] linfa_linalg::LinalgError),
    /// When a combinator is built from an invalid covariance function
    #[error("Invalid covariance function: {0}")]
    InvalidCovarianceType(String),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    /// When the underlying numeric minimizer fails
    #[error("Optimization error: {0}")]
    OptimizationError(String),
}
