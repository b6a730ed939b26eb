//! `gpcovar` provides Gaussian process regression with composable covariance functions.
//!
//! This crate is a facade over the following sub-crate:
//!
//! * [gpcovar-gp](https://docs.rs/gpcovar-gp), available as [gp]: covariance functions
//!   (noise, linear, squared exponential, sum and product combinators), the regression core
//!   computing the negative log marginal likelihood, its gradient and predictions, and the
//!   hyperparameters optimization driver.
//!
//! ```no_run
//! use gpcovar::gp::covariance::{LinearCovariance, NoiseCovariance, SumCovariance};
//! use gpcovar::gp::{GaussianProcess, Hyperparams, COVAR};
//! use ndarray::array;
//!
//! let covariance = SumCovariance::<f64>::new(vec![
//!     Box::new(LinearCovariance::isotropic()),
//!     Box::new(NoiseCovariance::new()),
//! ])
//! .expect("valid covariance");
//! let gp = GaussianProcess::new(covariance)
//!     .with_data(&array![[0.], [1.], [2.]], &array![0., 1., 0.])
//!     .expect("consistent data");
//! let hp = Hyperparams::new().with_group(COVAR, array![0., f64::ln(0.1)]);
//! let lml = gp.log_marginal_likelihood(&hp, None).expect("likelihood");
//! let (mean, variance) = gp.predict(&hp, &array![[1.5]], 0).expect("prediction");
//! ```
#![warn(missing_docs)]

pub use gpcovar_gp as gp;
