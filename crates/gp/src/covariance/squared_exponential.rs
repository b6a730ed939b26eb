use super::CovarianceFunction;
use crate::errors::{GpError, Result};
use crate::utils::{check_parameter_count, scaled_squared_differences, ActiveDimensions};
use linfa::Float;
use ndarray::{s, Array1, Array2, Array3, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix2, Zip};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// Squared exponential covariance, k(x, x') = a^2 exp(-0.5 sum_d (x_d - x'_d)^2 / l_d^2)
///
/// * isotropic: `theta = [log(a), log(l)]`
/// * ARD: `theta = [log(a), log(l_1), ..., log(l_D)]`
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct SquaredExponentialCovariance {
    /// Number of input dimensions for ARD, `None` when isotropic
    ard_dim: Option<usize>,
    active: ActiveDimensions,
}

impl Default for SquaredExponentialCovariance {
    fn default() -> Self {
        Self::isotropic()
    }
}

impl SquaredExponentialCovariance {
    /// Squared exponential covariance with a single length scale
    pub fn isotropic() -> Self {
        SquaredExponentialCovariance {
            ard_dim: None,
            active: ActiveDimensions::default(),
        }
    }

    /// Squared exponential covariance with one length scale per input dimension
    pub fn ard(dim: usize) -> Self {
        SquaredExponentialCovariance {
            ard_dim: Some(dim),
            active: ActiveDimensions::default(),
        }
    }

    fn n_params(&self) -> usize {
        1 + self.ard_dim.unwrap_or(1)
    }

    /// Returns the kernel and the per dimension squared differences scaled by the length scales
    fn scaled_distances<F: Float>(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<(Array2<F>, Array3<F>)> {
        check_parameter_count("SquaredExponentialCovariance", theta.len(), self.n_params())?;
        let x1 = self.active.select(x1.view())?;
        let x2 = match &x2 {
            Some(x2) => self.active.select(x2.view())?,
            None => x1.clone(),
        };
        if let Some(dim) = self.ard_dim {
            if dim != x1.ncols() {
                return Err(GpError::ShapeMismatch(format!(
                    "SquaredExponentialCovariance: ARD built for {dim} dimensions, inputs have {} active columns",
                    x1.ncols()
                )));
            }
        }

        let inv_l = theta.slice(s![1..]).mapv(|t| (-t).exp());
        let sqd = scaled_squared_differences(&x1, &x2, &inv_l)?;
        let amplitude = (F::cast(2.) * theta[0]).exp();
        let k = sqd
            .sum_axis(Axis(0))
            .mapv(|r2| amplitude * (F::cast(-0.5) * r2).exp());
        Ok((k, sqd))
    }
}

/// Elementwise `k * d`, zero where `k` vanishes even if `d` is infinite
fn vanishing_product<F: Float>(
    k: &ArrayBase<impl Data<Elem = F>, Ix2>,
    d: &ArrayBase<impl Data<Elem = F>, Ix2>,
) -> Array2<F> {
    Zip::from(k)
        .and(d)
        .map_collect(|&k, &d| if k == F::zero() { k } else { k * d })
}

impl fmt::Display for SquaredExponentialCovariance {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.ard_dim {
            Some(dim) => write!(f, "SquaredExponentialArd({dim})"),
            None => write!(f, "SquaredExponential"),
        }
    }
}

impl<F: Float> CovarianceFunction<F> for SquaredExponentialCovariance {
    fn parameter_count(&self) -> usize {
        self.n_params()
    }

    fn parameter_names(&self) -> Vec<String> {
        let mut names = vec!["amplitude".to_string()];
        match self.ard_dim {
            Some(dim) => names.extend((0..dim).map(|d| format!("length_scale_{d}"))),
            None => names.push("length_scale".to_string()),
        }
        names
    }

    fn kernel(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array2<F>> {
        let (k, _) = self.scaled_distances(theta, x1, x2)?;
        Ok(k)
    }

    fn kernel_gradient(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array3<F>> {
        let (k, sqd) = self.scaled_distances(theta, x1, x2)?;
        let mut grad = Array3::zeros((self.n_params(), k.nrows(), k.ncols()));
        grad.index_axis_mut(Axis(0), 0).assign(&(&k * F::cast(2.)));
        match self.ard_dim {
            Some(_) => Zip::from(grad.slice_mut(s![1.., .., ..]).outer_iter_mut())
                .and(sqd.outer_iter())
                .for_each(|mut g, d| g.assign(&vanishing_product(&k, &d))),
            None => grad
                .index_axis_mut(Axis(0), 1)
                .assign(&vanishing_product(&k, &sqd.sum_axis(Axis(0)))),
        }
        Ok(grad)
    }

    fn kernel_diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Result<Array1<F>> {
        check_parameter_count("SquaredExponentialCovariance", theta.len(), self.n_params())?;
        Ok(Array1::from_elem(
            x.nrows(),
            (F::cast(2.) * theta[0]).exp(),
        ))
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
    use paste::paste;
    use rand_xoshiro::Xoshiro256Plus;

    #[test]
    fn test_squared_exponential_kernel() {
        let x = array![[0.], [1.]];
        let theta = array![f64::ln(2.), 0.];
        let k = SquaredExponentialCovariance::isotropic()
            .kernel(theta.view(), x.view(), None)
            .unwrap();
        let off = 4. * f64::exp(-0.5);
        assert_abs_diff_eq!(k, array![[4., off], [off, 4.]], epsilon = 1e-12);
    }

    #[test]
    fn test_squared_exponential_ard_matches_iso() {
        // ARD with equal length scales is the isotropic kernel
        let x = array![[0., 1.], [1., 3.], [0.5, -1.]];
        let iso = SquaredExponentialCovariance::isotropic();
        let ard = SquaredExponentialCovariance::ard(2);
        let k_iso = iso
            .kernel(array![0.3, -0.2].view(), x.view(), None)
            .unwrap();
        let k_ard = ard
            .kernel(array![0.3, -0.2, -0.2].view(), x.view(), None)
            .unwrap();
        assert_abs_diff_eq!(k_iso, k_ard, epsilon = 1e-12);
    }

    macro_rules! test_se_gradient {
        ($name:ident, $cov:expr, $nparams:expr) => {
            paste! {
                #[test]
                fn [<test_squared_exponential_ $name _gradient>]() {
                    let mut rng = Xoshiro256Plus::seed_from_u64(42);
                    let x1 = Array::random_using((7, 3), Uniform::new(-2., 2.), &mut rng);
                    let x2 = Array::random_using((5, 3), Uniform::new(-2., 2.), &mut rng);
                    let theta = Array::random_using($nparams, Uniform::new(-0.5, 0.5), &mut rng);
                    let cov = $cov;
                    check_kernel_gradient(&cov, &theta, &x1, None);
                    check_kernel_gradient(&cov, &theta, &x1, Some(&x2));
                }
            }
        };
    }

    test_se_gradient!(iso, SquaredExponentialCovariance::isotropic(), 2);
    test_se_gradient!(ard, SquaredExponentialCovariance::ard(3), 4);

    #[test]
    fn test_squared_exponential_extreme_length_scales() {
        let x = array![[0., 1.], [1., 1.], [1., 1.]];
        let cov = SquaredExponentialCovariance::ard(2);
        for theta in [array![0., -400., -400.], array![0., 400., 400.], array![-400., 0., 0.]] {
            let k = cov.kernel(theta.view(), x.view(), None).unwrap();
            let grad = cov.kernel_gradient(theta.view(), x.view(), None).unwrap();
            assert!(k.iter().all(|v: &f64| v.is_finite()), "kernel at {theta}: {k}");
            assert!(grad.iter().all(|v: &f64| v.is_finite()), "gradient at {theta}: {grad}");
        }

        // vanishing length scales decorrelate distinct points only
        let k = cov
            .kernel(array![0., -400., -400.].view(), x.view(), None)
            .unwrap();
        assert_eq!(k, array![[1., 0., 0.], [0., 1., 1.], [0., 1., 1.]]);
    }

    #[test]
    fn test_squared_exponential_diag() {
        let x = array![[0., 1.], [1., 3.]];
        let theta = array![0.4, 0.1, -0.3];
        let cov = SquaredExponentialCovariance::ard(2);
        let d = cov.kernel_diag(theta.view(), x.view()).unwrap();
        let k = cov.kernel(theta.view(), x.view(), None).unwrap();
        assert_abs_diff_eq!(d, k.diag().to_owned(), epsilon = 1e-12);
    }

    #[test]
    fn test_squared_exponential_names() {
        let cov = SquaredExponentialCovariance::ard(2);
        assert_eq!(
            CovarianceFunction::<f64>::parameter_names(&cov),
            vec!["amplitude", "length_scale_0", "length_scale_1"]
        );
        assert_eq!(CovarianceFunction::<f64>::parameter_count(&cov), 3);
    }
}
