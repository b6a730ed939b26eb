use super::CovarianceFunction;
use crate::errors::{GpError, Result};
use crate::utils::check_parameter_count;
use linfa::Float;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use std::fmt;
use std::ops::Range;

/// Children of a combinator with the contiguous slice of the combined
/// hyperparameter vector owned by each of them
struct Partition<F: Float> {
    covars: Vec<Box<dyn CovarianceFunction<F>>>,
    ranges: Vec<Range<usize>>,
    n_params: usize,
}

impl<F: Float> Partition<F> {
    fn new(kind: &str, covars: Vec<Box<dyn CovarianceFunction<F>>>) -> Result<Self> {
        if covars.is_empty() {
            return Err(GpError::InvalidCovarianceType(format!(
                "{kind} is constructed from a non empty list of covariance functions"
            )));
        }
        let mut ranges = Vec::with_capacity(covars.len());
        let mut start = 0;
        for covar in covars.iter() {
            let count = covar.parameter_count();
            let names = covar.parameter_names();
            if names.len() != count {
                return Err(GpError::InvalidCovarianceType(format!(
                    "{kind}: {covar} declares {count} hyperparameters but names {}",
                    names.len()
                )));
            }
            ranges.push(start..start + count);
            start += count;
        }
        Ok(Partition {
            covars,
            ranges,
            n_params: start,
        })
    }

    /// Children with their own theta slice, theta length being checked first
    fn split<'a>(
        &'a self,
        kind: &str,
        theta: ArrayView1<'a, F>,
    ) -> Result<impl Iterator<Item = (&'a dyn CovarianceFunction<F>, ArrayView1<'a, F>)>> {
        check_parameter_count(kind, theta.len(), self.n_params)?;
        Ok(self
            .covars
            .iter()
            .zip(self.ranges.iter())
            .map(move |(covar, range)| {
                (
                    covar.as_ref(),
                    theta.slice_move(ndarray::s![range.clone()]),
                )
            }))
    }

    fn names(&self) -> Vec<String> {
        self.covars
            .iter()
            .flat_map(|covar| covar.parameter_names())
            .collect()
    }

    fn log_space_mask(&self) -> Vec<bool> {
        self.covars
            .iter()
            .flat_map(|covar| covar.log_space_mask())
            .collect()
    }

    fn set_active_dimensions(&mut self, dims: Option<Vec<usize>>) {
        for covar in self.covars.iter_mut() {
            covar.set_active_dimensions(dims.clone());
        }
    }

    fn fmt_with(&self, f: &mut fmt::Formatter, kind: &str, sep: &str) -> fmt::Result {
        write!(f, "{kind}(")?;
        for (i, covar) in self.covars.iter().enumerate() {
            if i > 0 {
                write!(f, " {sep} ")?;
            }
            write!(f, "{covar}")?;
        }
        write!(f, ")")
    }
}

/// Sum of covariance functions, k(x, x') = sum_c k_c(x, x')
///
/// Hyperparameters are the concatenation of the children ones in list order.
pub struct SumCovariance<F: Float> {
    partition: Partition<F>,
}

impl<F: Float> SumCovariance<F> {
    /// Build the sum of the given covariance functions.
    ///
    /// Fails with [`GpError::InvalidCovarianceType`] when the list is empty or
    /// a child does not name each of its hyperparameters.
    pub fn new(covars: Vec<Box<dyn CovarianceFunction<F>>>) -> Result<Self> {
        Ok(SumCovariance {
            partition: Partition::new("SumCovariance", covars)?,
        })
    }

    /// Index range of each child in the combined hyperparameter vector
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.partition.ranges
    }
}

impl<F: Float> fmt::Display for SumCovariance<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.partition.fmt_with(f, "Sum", "+")
    }
}

impl<F: Float> CovarianceFunction<F> for SumCovariance<F> {
    fn parameter_count(&self) -> usize {
        self.partition.n_params
    }

    fn parameter_names(&self) -> Vec<String> {
        self.partition.names()
    }

    fn kernel(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array2<F>> {
        let mut k: Option<Array2<F>> = None;
        for (covar, t) in self.partition.split("SumCovariance", theta.view())? {
            let kc = covar.kernel(t, x1, x2)?;
            k = Some(match k {
                None => kc,
                Some(acc) => acc + kc,
            });
        }
        k.ok_or_else(|| GpError::InvalidCovarianceType("empty SumCovariance".to_string()))
    }

    fn kernel_gradient(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array3<F>> {
        let nrows = x2.map_or(x1.nrows(), |x2| x2.nrows());
        let mut grad = Array3::zeros((self.partition.n_params, x1.nrows(), nrows));
        for ((covar, t), range) in self
            .partition
            .split("SumCovariance", theta.view())?
            .zip(self.partition.ranges.iter())
        {
            let gc = covar.kernel_gradient(t, x1, x2)?;
            grad.slice_mut(ndarray::s![range.clone(), .., ..]).assign(&gc);
        }
        Ok(grad)
    }

    fn kernel_diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Result<Array1<F>> {
        let mut diag = Array1::zeros(x.nrows());
        for (covar, t) in self.partition.split("SumCovariance", theta.view())? {
            diag = diag + covar.kernel_diag(t, x)?;
        }
        Ok(diag)
    }

    fn log_space_mask(&self) -> Vec<bool> {
        self.partition.log_space_mask()
    }

    fn set_active_dimensions(&mut self, dims: Option<Vec<usize>>) {
        self.partition.set_active_dimensions(dims)
    }
}

/// Product of covariance functions, k(x, x') = prod_c k_c(x, x')
///
/// Hyperparameters are the concatenation of the children ones in list order.
pub struct ProductCovariance<F: Float> {
    partition: Partition<F>,
    /// For each child, flags the hyperparameters it owns
    masks: Vec<Array1<bool>>,
}

impl<F: Float> ProductCovariance<F> {
    /// Build the product of the given covariance functions.
    ///
    /// Fails with [`GpError::InvalidCovarianceType`] when the list is empty or
    /// a child does not name each of its hyperparameters.
    pub fn new(covars: Vec<Box<dyn CovarianceFunction<F>>>) -> Result<Self> {
        let partition = Partition::new("ProductCovariance", covars)?;
        let masks = partition
            .ranges
            .iter()
            .map(|range| Array1::from_shape_fn(partition.n_params, |i| range.contains(&i)))
            .collect();
        Ok(ProductCovariance { partition, masks })
    }

    /// Index range of each child in the combined hyperparameter vector
    pub fn ranges(&self) -> &[Range<usize>] {
        &self.partition.ranges
    }
}

impl<F: Float> fmt::Display for ProductCovariance<F> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.partition.fmt_with(f, "Product", "*")
    }
}

impl<F: Float> CovarianceFunction<F> for ProductCovariance<F> {
    fn parameter_count(&self) -> usize {
        self.partition.n_params
    }

    fn parameter_names(&self) -> Vec<String> {
        self.partition.names()
    }

    fn kernel(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array2<F>> {
        let nrows = x2.map_or(x1.nrows(), |x2| x2.nrows());
        let mut k = Array2::ones((x1.nrows(), nrows));
        for (covar, t) in self.partition.split("ProductCovariance", theta.view())? {
            k *= &covar.kernel(t, x1, x2)?;
        }
        Ok(k)
    }

    fn kernel_gradient(
        &self,
        theta: ArrayView1<F>,
        x1: ArrayView2<F>,
        x2: Option<ArrayView2<F>>,
    ) -> Result<Array3<F>> {
        let nrows = x2.map_or(x1.nrows(), |x2| x2.nrows());
        let mut grad = Array3::ones((self.partition.n_params, x1.nrows(), nrows));
        for ((covar, t), mask) in self
            .partition
            .split("ProductCovariance", theta.view())?
            .zip(self.masks.iter())
        {
            let kc = covar.kernel(t, x1, x2)?;
            let gc = covar.kernel_gradient(t, x1, x2)?;
            // owned rows take the child derivative in order, other rows the child kernel
            let mut owned = gc.outer_iter();
            for (mut g, &is_owned) in grad.outer_iter_mut().zip(mask.iter()) {
                if !is_owned {
                    g *= &kc;
                } else if let Some(gi) = owned.next() {
                    g *= &gi;
                }
            }
        }
        Ok(grad)
    }

    fn kernel_diag(&self, theta: ArrayView1<F>, x: ArrayView2<F>) -> Result<Array1<F>> {
        let mut diag = Array1::ones(x.nrows());
        for (covar, t) in self.partition.split("ProductCovariance", theta.view())? {
            diag *= &covar.kernel_diag(t, x)?;
        }
        Ok(diag)
    }

    fn log_space_mask(&self) -> Vec<bool> {
        self.partition.log_space_mask()
    }

    fn set_active_dimensions(&mut self, dims: Option<Vec<usize>>) {
        self.partition.set_active_dimensions(dims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::covariance::testing::check_kernel_gradient;
    use crate::covariance::{LinearCovariance, NoiseCovariance, SquaredExponentialCovariance};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s, Array, Axis};
    use ndarray_rand::rand::SeedableRng;
    use ndarray_rand::rand_distr::Uniform;
    use ndarray_rand::RandomExt;
    use rand_xoshiro::Xoshiro256Plus;

    fn child(i: usize) -> Box<dyn CovarianceFunction<f64>> {
        match i % 5 {
            0 => Box::new(SquaredExponentialCovariance::isotropic()),
            1 => Box::new(LinearCovariance::isotropic()),
            2 => Box::new(NoiseCovariance::new()),
            3 => Box::new(SquaredExponentialCovariance::ard(2)),
            _ => Box::new(LinearCovariance::ard(2)),
        }
    }

    fn children(n: usize) -> Vec<Box<dyn CovarianceFunction<f64>>> {
        (0..n).map(child).collect()
    }

    struct Unnamed;

    impl fmt::Display for Unnamed {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "Unnamed")
        }
    }

    impl CovarianceFunction<f64> for Unnamed {
        fn parameter_count(&self) -> usize {
            1
        }
        fn parameter_names(&self) -> Vec<String> {
            vec![]
        }
        fn kernel(
            &self,
            _theta: ArrayView1<f64>,
            x1: ArrayView2<f64>,
            _x2: Option<ArrayView2<f64>>,
        ) -> Result<Array2<f64>> {
            Ok(Array2::eye(x1.nrows()))
        }
        fn kernel_gradient(
            &self,
            _theta: ArrayView1<f64>,
            x1: ArrayView2<f64>,
            _x2: Option<ArrayView2<f64>>,
        ) -> Result<Array3<f64>> {
            Ok(Array3::zeros((1, x1.nrows(), x1.nrows())))
        }
        fn set_active_dimensions(&mut self, _dims: Option<Vec<usize>>) {}
    }

    #[test]
    fn test_sum_is_sum_of_children() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let x = Array::random_using((6, 2), Uniform::new(-1., 1.), &mut rng);
        for n in 1..=5 {
            let sum = SumCovariance::new(children(n)).unwrap();
            let theta = Array::random_using(sum.parameter_count(), Uniform::new(-1., 1.), &mut rng);
            let k = sum.kernel(theta.view(), x.view(), None).unwrap();

            let mut expected = Array2::zeros((6, 6));
            for (i, range) in sum.ranges().iter().enumerate() {
                expected = expected
                    + child(i)
                        .kernel(theta.slice(s![range.clone()]), x.view(), None)
                        .unwrap();
            }
            assert_abs_diff_eq!(k, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_sum_gradient() {
        let mut rng = Xoshiro256Plus::seed_from_u64(0);
        let x1 = Array::random_using((5, 2), Uniform::new(-1., 1.), &mut rng);
        let x2 = Array::random_using((3, 2), Uniform::new(-1., 1.), &mut rng);
        let sum = SumCovariance::new(children(5)).unwrap();
        let theta = Array::random_using(sum.parameter_count(), Uniform::new(-1., 1.), &mut rng);
        check_kernel_gradient(&sum, &theta, &x1, None);
        check_kernel_gradient(&sum, &theta, &x1, Some(&x2));

        // off range rows of a child contribution stay zero
        let grad = sum
            .kernel_gradient(theta.view(), x1.view(), Some(x2.view()))
            .unwrap();
        let noise_range = sum.ranges()[2].clone();
        assert_eq!(
            grad.slice(s![noise_range, .., ..]),
            Array3::<f64>::zeros((1, 5, 3))
        );
    }

    #[test]
    fn test_product_is_product_of_children() {
        let mut rng = Xoshiro256Plus::seed_from_u64(42);
        let x = Array::random_using((6, 2), Uniform::new(-1., 1.), &mut rng);
        for n in 1..=5 {
            let prod = ProductCovariance::new(children(n)).unwrap();
            let theta = Array::random_using(prod.parameter_count(), Uniform::new(-1., 1.), &mut rng);
            let k = prod.kernel(theta.view(), x.view(), None).unwrap();

            let mut expected = Array2::ones((6, 6));
            for (i, range) in prod.ranges().iter().enumerate() {
                expected = expected
                    * child(i)
                        .kernel(theta.slice(s![range.clone()]), x.view(), None)
                        .unwrap();
            }
            assert_abs_diff_eq!(k, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_product_gradient() {
        let mut rng = Xoshiro256Plus::seed_from_u64(7);
        let x1 = Array::random_using((5, 2), Uniform::new(-1., 1.), &mut rng);
        let x2 = Array::random_using((4, 2), Uniform::new(-1., 1.), &mut rng);
        let prod = ProductCovariance::<f64>::new(vec![
            Box::new(SquaredExponentialCovariance::ard(2)),
            Box::new(LinearCovariance::isotropic()),
            Box::new(SquaredExponentialCovariance::isotropic()),
        ])
        .unwrap();
        let theta = Array::random_using(prod.parameter_count(), Uniform::new(-0.5, 0.5), &mut rng);
        check_kernel_gradient(&prod, &theta, &x1, None);
        check_kernel_gradient(&prod, &theta, &x1, Some(&x2));
    }

    #[test]
    fn test_product_rule_identity() {
        let x = array![[0.1, 0.2], [0.5, -0.3], [1., 1.]];
        let se = SquaredExponentialCovariance::isotropic();
        let lin = LinearCovariance::ard(2);
        let prod =
            ProductCovariance::<f64>::new(vec![Box::new(se.clone()), Box::new(lin.clone())])
                .unwrap();
        let theta = array![0.2, -0.1, 0.3, 0.4];
        let grad = prod.kernel_gradient(theta.view(), x.view(), None).unwrap();

        let (t_se, t_lin) = (theta.slice(s![0..2]), theta.slice(s![2..4]));
        let k_se = se.kernel(t_se, x.view(), None).unwrap();
        let k_lin = lin.kernel(t_lin, x.view(), None).unwrap();
        let g_se = se.kernel_gradient(t_se, x.view(), None).unwrap();
        let g_lin = lin.kernel_gradient(t_lin, x.view(), None).unwrap();
        for i in 0..2 {
            assert_abs_diff_eq!(
                grad.index_axis(Axis(0), i),
                &g_se.index_axis(Axis(0), i) * &k_lin,
                epsilon = 1e-12
            );
            assert_abs_diff_eq!(
                grad.index_axis(Axis(0), 2 + i),
                &g_lin.index_axis(Axis(0), i) * &k_se,
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn test_single_child_product_is_identity() {
        let mut rng = Xoshiro256Plus::seed_from_u64(3);
        let x1 = Array::random_using((4, 2), Uniform::new(-1., 1.), &mut rng);
        let x2 = Array::random_using((3, 2), Uniform::new(-1., 1.), &mut rng);
        let se = SquaredExponentialCovariance::ard(2);
        let prod = ProductCovariance::<f64>::new(vec![Box::new(se.clone())]).unwrap();
        let theta = array![0.1, -0.2, 0.3];
        for x2 in [None, Some(x2.view())] {
            assert_eq!(
                prod.kernel(theta.view(), x1.view(), x2).unwrap(),
                se.kernel(theta.view(), x1.view(), x2).unwrap()
            );
            assert_eq!(
                prod.kernel_gradient(theta.view(), x1.view(), x2).unwrap(),
                se.kernel_gradient(theta.view(), x1.view(), x2).unwrap()
            );
        }
    }

    #[test]
    fn test_combinator_construction_errors() {
        assert!(matches!(
            SumCovariance::<f64>::new(vec![]),
            Err(GpError::InvalidCovarianceType(_))
        ));
        assert!(matches!(
            ProductCovariance::<f64>::new(vec![]),
            Err(GpError::InvalidCovarianceType(_))
        ));
        assert!(matches!(
            SumCovariance::<f64>::new(vec![child(0), Box::new(Unnamed)]),
            Err(GpError::InvalidCovarianceType(_))
        ));
        assert!(matches!(
            ProductCovariance::<f64>::new(vec![Box::new(Unnamed)]),
            Err(GpError::InvalidCovarianceType(_))
        ));
    }

    #[test]
    fn test_combinator_wrong_theta_length() {
        let x = array![[0., 1.], [1., 0.]];
        let sum = SumCovariance::new(children(3)).unwrap();
        let theta = Array1::zeros(sum.parameter_count() + 1);
        assert!(matches!(
            sum.kernel(theta.view(), x.view(), None),
            Err(GpError::ShapeMismatch(_))
        ));
        let prod = ProductCovariance::new(children(3)).unwrap();
        let theta = Array1::zeros(prod.parameter_count() - 1);
        assert!(matches!(
            prod.kernel_gradient(theta.view(), x.view(), None),
            Err(GpError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_combinator_names_and_masks() {
        let sum = SumCovariance::<f64>::new(vec![child(0), child(1), child(2)]).unwrap();
        assert_eq!(
            sum.parameter_names(),
            vec!["amplitude", "length_scale", "scale", "sigma"]
        );
        assert_eq!(sum.log_space_mask(), vec![true; 4]);
        assert_eq!(sum.ranges(), &[0..2, 2..3, 3..4]);
        assert_eq!(sum.to_string(), "Sum(SquaredExponential + Linear + Noise)");
        let prod = ProductCovariance::<f64>::new(vec![child(1), child(4)]).unwrap();
        assert_eq!(prod.to_string(), "Product(Linear * LinearArd(2))");
        assert_eq!(prod.masks[1], array![false, true, true]);
    }

    #[test]
    fn test_active_dimensions_are_forwarded() {
        let x = array![[1., 5.], [2., 7.], [0.5, -1.]];
        let theta = array![0.3, -0.2, 0.1];
        let mut sum = SumCovariance::<f64>::new(vec![child(0), child(1)]).unwrap();
        sum.set_active_dimensions(Some(vec![1]));
        let k = sum.kernel(theta.view(), x.view(), None).unwrap();

        let col = x.slice(s![.., 1..2]).to_owned();
        let expected = SumCovariance::<f64>::new(vec![child(0), child(1)])
            .unwrap()
            .kernel(theta.view(), col.view(), None)
            .unwrap();
        assert_abs_diff_eq!(k, expected, epsilon = 1e-12);
    }

    #[test]
    fn test_combinator_diag() {
        let x = array![[1., 5.], [2., 7.], [0.5, -1.]];
        let sum = SumCovariance::new(children(5)).unwrap();
        let theta = Array1::linspace(-0.5, 0.5, sum.parameter_count());
        assert_abs_diff_eq!(
            sum.kernel_diag(theta.view(), x.view()).unwrap(),
            sum.kernel(theta.view(), x.view(), None).unwrap().diag().to_owned(),
            epsilon = 1e-12
        );
        let prod = ProductCovariance::new(children(5)).unwrap();
        assert_abs_diff_eq!(
            prod.kernel_diag(theta.view(), x.view()).unwrap(),
            prod.kernel(theta.view(), x.view(), None).unwrap().diag().to_owned(),
            epsilon = 1e-12
        );
    }
}
