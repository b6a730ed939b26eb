//! A module for covariance functions k(x, x') used in GP regression.
//!
//! Every covariance function is parameterized by a flat hyperparameter vector `theta`
//! (log-space values unless stated otherwise) and provides both the kernel matrix and
//! its derivative tensor with respect to each hyperparameter.
//!
//! The following covariance functions are implemented:
//! * noise (observation noise on the diagonal),
//! * linear (isotropic and ARD),
//! * squared exponential (isotropic and ARD),
//!
//! and they can be composed with the [`SumCovariance`] and [`ProductCovariance`] combinators.

mod combinators;
mod linear;
mod noise;
mod squared_exponential;

pub use combinators::*;
pub use linear::*;
pub use noise::*;
pub use squared_exponential::*;

use crate::errors::Result;
use linfa::Float;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use std::fmt;

/// A trait for covariance functions used in GP regression
///
/// The trait is object safe so that heterogeneous kernels can be composed
/// as `Box<dyn CovarianceFunction<F>>`.
pub trait CovarianceFunction<F: Float>: fmt::Display + Send + Sync {
    /// Number of hyperparameters, fixed at construction
    fn parameter_count(&self) -> usize;

    /// Hyperparameter names for diagnostics, `parameter_count()` long
    fn parameter_names(&self) -> Vec<String>;

    /// Compute the covariance matrix K(x1, x2) of shape (nrows(x1), nrows(x2)).
    ///
    /// When `x2` is `None` the self covariance K(x1, x1) is computed, otherwise
    /// the cross covariance which is not assumed to be symmetric.
    /// Fails with [`GpError::ShapeMismatch`](crate::GpError::ShapeMismatch) when `theta`
    /// length differs from `parameter_count()`.
    fn kernel(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array2<F>>;

    /// Compute the derivatives of the covariance matrix with respect to each hyperparameter
    /// as a tensor of shape (parameter_count(), nrows(x1), nrows(x2)).
    fn kernel_gradient(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array3<F>>;

    /// Diagonal of the self covariance K(x, x)
    fn kernel_diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Result<Array1<F>> {
        Ok(self.kernel(theta, x, None)?.diag().to_owned())
    }

    /// Flags hyperparameters held in log-space, used to apply priors in natural space
    fn log_space_mask(&self) -> Vec<bool> {
        vec![true; self.parameter_count()]
    }

    /// Restrict the input columns read by the kernel (`None` to use all of them)
    fn set_active_dimensions(&mut self, dims: Option<Vec<usize>>);
}

impl<F: Float> CovarianceFunction<F> for Box<dyn CovarianceFunction<F>> {
    fn parameter_count(&self) -> usize {
        (**self).parameter_count()
    }

    fn parameter_names(&self) -> Vec<String> {
        (**self).parameter_names()
    }

    fn kernel(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array2<F>> {
        (**self).kernel(theta, x1, x2)
    }

    fn kernel_gradient(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array3<F>> {
        (**self).kernel_gradient(theta, x1, x2)
    }

    fn kernel_diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Result<Array1<F>> {
        (**self).kernel_diag(theta, x)
    }

    fn log_space_mask(&self) -> Vec<bool> {
        (**self).log_space_mask()
    }

    fn set_active_dimensions(&mut self, dims: Option<Vec<usize>>) {
        (**self).set_active_dimensions(dims)
    }
}
