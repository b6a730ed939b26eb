use super::CovarianceFunction;
use crate::errors::Result;
use crate::utils::check_parameter_count;
use linfa::Float;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Gaussian observation noise covariance.
///
/// One hyperparameter, the log noise standard deviation `theta = [log(sigma)]`:
/// * k(X, X) = sigma^2 * I
/// * k(X, X') = 0 for distinct input sets, noise does not correlate training and test points
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct NoiseCovariance();

impl NoiseCovariance {
    /// Constructor
    pub fn new() -> Self {
        NoiseCovariance()
    }
}

impl fmt::Display for NoiseCovariance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Noise")
    }
}

impl<F: Float> CovarianceFunction<F> for NoiseCovariance {
    fn parameter_count(&self) -> usize {
        1
    }

    fn parameter_names(&self) -> Vec<String> {
        vec!["sigma".to_string()]
    }

    fn kernel(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array2<F>> {
        check_parameter_count("NoiseCovariance", theta.len(), 1)?;
        match x2 {
            None => {
                let sigma2 = (F::cast(2.) * theta[0]).exp();
                Ok(Array2::eye(x1.nrows()) * sigma2)
            }
            Some(x2) => Ok(Array2::zeros((x1.nrows(), x2.nrows()))),
        }
    }

    fn kernel_gradient(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array3<F>> {
        // d(exp(2 theta))/d(theta) = 2 exp(2 theta)
        let k = self.kernel(theta, x1, x2)?;
        Ok((k * F::cast(2.)).insert_axis(Axis(0)))
    }

    fn kernel_diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Result<Array1<F>> {
        check_parameter_count("NoiseCovariance", theta.len(), 1)?;
        Ok(Array1::from_elem(
            x.nrows(),
            (F::cast(2.) * theta[0]).exp(),
        ))
    }

    fn set_active_dimensions(&mut self, _dims: Option<Vec<usize>>) {}
}
