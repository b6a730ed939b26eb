//! This library implements [Gaussian Process](https://en.wikipedia.org/wiki/Gaussian_process) regression
//! with composable covariance functions.
//!
//! A covariance function implements [covariance::CovarianceFunction]: it computes the covariance
//! matrix between two sets of input points and its gradient with respect to its hyperparameters.
//! Leaf covariances ([covariance::NoiseCovariance], [covariance::LinearCovariance],
//! [covariance::SquaredExponentialCovariance]) are combined with
//! [covariance::SumCovariance] and [covariance::ProductCovariance], the hyperparameter vector of
//! a combination being the concatenation of the ones of its children.
//!
//! The regression core is implemented by [GaussianProcess]. For given [Hyperparams], it computes
//! the negative log marginal likelihood of the training data, its gradient and the predictive
//! mean and variance at new points. The cholesky factorization of the training covariance matrix
//! is cached and reused as long as the hyperparameters are unchanged.
//!
//! Hyperparameters are optimized with [optimize_hyperparams] configured by [HyperOptParams],
//! using either [CobylaMinimizer] or [LbfgsMinimizer] and optionally [Priors] on their values.
//!
//! ```no_run
//! use gpcovar_gp::covariance::{NoiseCovariance, SquaredExponentialCovariance, SumCovariance};
//! use gpcovar_gp::{optimize_hyperparams, CobylaMinimizer, GaussianProcess, HyperOptParams, Hyperparams, COVAR};
//! use ndarray::{array, Array, Axis};
//!
//! let x = Array::linspace(0., 5., 10).insert_axis(Axis(1));
//! let y = x.mapv(f64::sin);
//! let covariance = SumCovariance::<f64>::new(vec![
//!     Box::new(SquaredExponentialCovariance::isotropic()),
//!     Box::new(NoiseCovariance::new()),
//! ])
//! .expect("valid covariance");
//! let gp = GaussianProcess::new(covariance).with_data(&x, &y).expect("consistent data");
//!
//! let start = Hyperparams::new().with_group(COVAR, array![0., 0., -2.]);
//! let params = HyperOptParams::default().bounds(COVAR, vec![(-5., 5.); 3]);
//! let (hp, lml) = optimize_hyperparams(&gp, &start, &params, &CobylaMinimizer::default())
//!     .expect("optimization");
//! let (mean, variance) = gp.predict(&hp, &array![[2.5]], 0).expect("prediction");
//! ```
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod algorithm;
pub mod covariance;
mod errors;
mod hyperparameters;
pub mod priors;
mod utils;

mod optimization;

pub use algorithm::*;
pub use errors::*;
pub use hyperparameters::*;
pub use optimization::*;
pub use priors::{Prior, Priors};
pub use utils::ActiveDimensions;
