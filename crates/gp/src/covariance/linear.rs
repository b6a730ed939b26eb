use super::CovarianceFunction;
use crate::errors::{GpError, Result};
use crate::utils::{check_parameter_count, ActiveDimensions};
use linfa::Float;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Linear covariance, k(x, x') = sum_d s_d^2 x_d x'_d
///
/// * isotropic: one log scale shared by all input dimensions, `theta = [log(s)]`
/// * ARD: one log scale per active input dimension, `theta = [log(s_1), ..., log(s_D)]`
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct LinearCovariance {
    /// Number of input dimensions for ARD, `None` when isotropic
    ard_dim: Option<usize>,
    active: ActiveDimensions,
}

impl Default for LinearCovariance {
    fn default() -> Self {
        Self::isotropic()
    }
}

impl LinearCovariance {
    /// Linear covariance with a single scale hyperparameter
    pub fn isotropic() -> Self {
        LinearCovariance {
            ard_dim: None,
            active: ActiveDimensions::default(),
        }
    }

    /// Linear covariance with one scale hyperparameter per input dimension
    pub fn ard(dim: usize) -> Self {
        LinearCovariance {
            ard_dim: Some(dim),
            active: ActiveDimensions::default(),
        }
    }

    fn check_ard_dim(&self, ncols: usize) -> Result<()> {
        match self.ard_dim {
            Some(dim) if dim != ncols => Err(GpError::ShapeMismatch(format!(
                "LinearCovariance: ARD built for {dim} dimensions, inputs have {ncols} active columns"
            ))),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for LinearCovariance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ard_dim {
            Some(dim) => write!(f, "LinearArd({dim})"),
            None => write!(f, "Linear"),
        }
    }
}

impl<F: Float> CovarianceFunction<F> for LinearCovariance {
    fn parameter_count(&self) -> usize {
        self.ard_dim.unwrap_or(1)
    }

    fn parameter_names(&self) -> Vec<String> {
        match self.ard_dim {
            Some(dim) => (0..dim).map(|d| format!("scale_{d}")).collect(),
            None => vec!["scale".to_string()],
        }
    }

    fn kernel(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array2<F>> {
        check_parameter_count(
            "LinearCovariance",
            theta.len(),
            CovarianceFunction::<F>::parameter_count(self),
        )?;
        let x1 = self.active.select(x1.view())?;
        let x2 = match &x2 {
            Some(x2) => self.active.select(x2.view())?,
            None => x1.clone(),
        };
        self.check_ard_dim(x1.ncols())?;
        self.check_ard_dim(x2.ncols())?;

        let scales = theta.mapv(|t| (F::cast(2.) * t).exp());
        let k = match self.ard_dim {
            Some(_) => (&x1 * &scales).dot(&x2.t()),
            None => x1.dot(&x2.t()) * scales[0],
        };
        Ok(k)
    }

    fn kernel_gradient(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array3<F>> {
        match self.ard_dim {
            None => {
                let k = self.kernel(theta, x1, x2)?;
                Ok((k * F::cast(2.)).insert_axis(Axis(0)))
            }
            Some(dim) => {
                check_parameter_count("LinearCovariance", theta.len(), dim)?;
                let x1 = self.active.select(x1.view())?;
                let x2 = match &x2 {
                    Some(x2) => self.active.select(x2.view())?,
                    None => x1.clone(),
                };
                self.check_ard_dim(x1.ncols())?;
                self.check_ard_dim(x2.ncols())?;

                let mut grad = Array3::zeros((dim, x1.nrows(), x2.nrows()));
                Zip::from(grad.outer_iter_mut())
                    .and(&theta)
                    .and(x1.columns())
                    .and(x2.columns())
                    .for_each(|mut g, &t, c1, c2| {
                        let outer = c1
                            .insert_axis(Axis(1))
                            .dot(&c2.insert_axis(Axis(0)));
                        g.assign(&(outer * (F::cast(2.) * (F::cast(2.) * t).exp())));
                    });
                Ok(grad)
            }
        }
    }

    fn kernel_diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Result<Array1<F>> {
        check_parameter_count(
            "LinearCovariance",
            theta.len(),
            CovarianceFunction::<F>::parameter_count(self),
        )?;
        let x = self.active.select(x)?;
        self.check_ard_dim(x.ncols())?;
        let scales = theta.mapv(|t| (F::cast(2.) * t).exp());
        let x2 = x.mapv(|v| v * v);
        let diag = match self.ard_dim {
            Some(_) => (x2 * &scales).sum_axis(Axis(1)),
            None => x2.sum_axis(Axis(1)) * scales[0],
        };
        Ok(diag)
    }

    fn set_active_dimensions(&mut self, dims: Option<Vec<usize>>) {
        self.active = ActiveDimensions::new(dims);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::testing::check_kernel_gradient;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn test_linear_kernel() {
        let x = array![[0.], [1.], [2.]];
        let theta = array![f64::ln(2.)];
        let k = LinearCovariance::isotropic()
            .kernel(theta.view(), x.view(), None)
            .unwrap();
        let expected = array![[0., 0., 0.], [0., 4., 8.], [0., 8., 16.]];
        assert_abs_diff_eq!(k, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_ard_kernel() {
        let x = array![[1., 2.], [3., 0.]];
        let theta = array![0., f64::ln(3.)];
        let k = LinearCovariance::ard(2)
            .kernel(theta.view(), x.view(), None)
            .unwrap();
        // 1*x1*x1' + 9*x2*x2'
        let expected = array![[1. + 36., 3.], [3., 9.]];
        assert_abs_diff_eq!(k, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_linear_gradients() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let x1 = Array::random_using((6, 3), Uniform::new(-1., 1.), &mut rng);
        let x2 = Array::random_using((4, 3), Uniform::new(-1., 1.), &mut rng);

        let iso = LinearCovariance::isotropic();
        let theta = Array::random_using(1, Uniform::new(-1., 1.), &mut rng);
        check_kernel_gradient(&iso, &theta, &x1, None);
        check_kernel_gradient(&iso, &theta, &x1, Some(&x2));

        let ard = LinearCovariance::ard(3);
        let theta = Array::random_using(3, Uniform::new(-1., 1.), &mut rng);
        check_kernel_gradient(&ard, &theta, &x1, None);
        check_kernel_gradient(&ard, &theta, &x1, Some(&x2));
    }

    #[test]
    fn test_linear_diag() {
        let x = array![[1., 2.], [3., 0.], [-1., 1.]];
        let theta = array![0.2, -0.4];
        let cov = LinearCovariance::ard(2);
        let d = cov.kernel_diag(theta.view(), x.view()).unwrap();
        let k = cov.kernel(theta.view(), x.view(), None).unwrap();
        assert_abs_diff_eq!(d, k.diag().to_owned(), epsilon = 1e-12);
    }

    #[test]
    fn test_linear_active_dimensions() {
        let x = array![[1., 5.], [2., 7.]];
        let theta = array![0.];
        let mut cov = LinearCovariance::isotropic();
        CovarianceFunction::<f64>::set_active_dimensions(&mut cov, Some(vec![0]));
        let k = cov.kernel(theta.view(), x.view(), None).unwrap();
        assert_abs_diff_eq!(k, array![[1., 2.], [2., 4.]], epsilon = 1e-12);

        let mut ard = LinearCovariance::ard(2);
        CovarianceFunction::<f64>::set_active_dimensions(&mut ard, Some(vec![1]));
        let theta = array![0., 0.];
        assert!(matches!(
            ard.kernel(theta.view(), x.view(), None),
            Err(GpError::ShapeMismatch(_))
        ));
    }
}
