use crate::covariance::CovarianceFunction;
use crate::errors::{GpError, Result};
use crate::hyperparameters::{Hyperparams, COVAR};
use crate::priors::Priors;
use crate::utils::squeeze_targets;

use linfa::Float;
use linfa_linalg::{cholesky::*, triangular::*, LinalgError};
use log::{debug, error};
use ndarray::{Array1, Array2, ArrayBase, ArrayView2, Axis, Data, Dimension, Ix2};
use std::cell::{OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Negative log marginal likelihood returned when the covariance matrix is singular,
/// large but finite so that an optimizer keeps searching away from that point
pub const SINGULAR_PENALTY: f64 = 1e6;

/// Factorization of the training covariance matrix for a given set of hyperparameters
pub struct CovarianceCache<F: Float> {
    /// Hyperparameters the factorization was computed from
    hyperparams: Hyperparams<F>,
    /// Covariance matrix K
    k: Array2<F>,
    /// Lower cholesky factor L of K
    l: Array2<F>,
    /// K^-1 Y
    alpha: Array2<F>,
    /// d K^-1 - alpha alpha^T, computed on first gradient evaluation
    w: OnceCell<Array2<F>>,
}

impl<F: Float> CovarianceCache<F> {
    /// Hyperparameters of this factorization
    pub fn hyperparams(&self) -> &Hyperparams<F> {
        &self.hyperparams
    }

    /// Covariance matrix of the training inputs
    pub fn k(&self) -> &Array2<F> {
        &self.k
    }

    /// Lower cholesky factor of the covariance matrix
    pub fn l(&self) -> &Array2<F> {
        &self.l
    }

    /// Solution of K alpha = Y
    pub fn alpha(&self) -> &Array2<F> {
        &self.alpha
    }

    fn w(&self, n_outputs: usize) -> Result<&Array2<F>> {
        if let Some(w) = self.w.get() {
            return Ok(w);
        }
        let n = self.l.nrows();
        let linv = self.l.solve_triangular(&Array2::eye(n), UPLO::Lower)?;
        let kinv = self.l.t().solve_triangular_into(linv, UPLO::Upper)?;
        let w = kinv * F::cast(n_outputs) - self.alpha.dot(&self.alpha.t());
        Ok(self.w.get_or_init(|| w))
    }
}

/// Gaussian Process regression model
///
/// The outputs are modeled as a zero mean gaussian process
///
/// `Y ~ Normal(0, K(X, X))`
///
/// where `K` is built by a [`CovarianceFunction`] from a set of hyperparameters
/// given as a [`Hyperparams`] structure whose [`COVAR`] group feeds the covariance function.
///
/// # Implementation
///
/// * Based on [ndarray](https://github.com/rust-ndarray/ndarray)
///   and [linfa-linalg](https://github.com/rust-ml/linfa-linalg) cholesky factorization and
///   triangular solves, the covariance matrix is never explicitly inverted for predictions.
/// * The last factorization is cached and reused as long as the hyperparameters are unchanged,
///   so that likelihood, gradient and prediction calls at the same point factorize once.
/// * The covariance function is shared through an [`Arc`] and can be used by several models.
///
/// The model holds its cache in a [`RefCell`]: it is not [`Sync`] and must not be shared
/// between threads without external synchronization.
///
/// # Example
///
/// ```no_run
/// use gpcovar_gp::covariance::*;
/// use gpcovar_gp::{GaussianProcess, Hyperparams, COVAR};
/// use ndarray::array;
///
/// let covar = SumCovariance::<f64>::new(vec![
///     Box::new(LinearCovariance::isotropic()),
///     Box::new(NoiseCovariance::new()),
/// ])
/// .expect("covariance");
/// let gp = GaussianProcess::new(covar)
///     .with_data(&array![[0.], [1.], [2.]], &array![0., 1., 0.])
///     .expect("training data");
/// let hyperparams = Hyperparams::new().with_group(COVAR, array![0., f64::ln(0.1)]);
///
/// let nlml = gp.log_marginal_likelihood(&hyperparams, None).expect("likelihood");
/// let (mean, variance) = gp.predict(&hyperparams, &array![[1.5]], 0).expect("prediction");
/// println!("nlml = {nlml}, mean = {mean}, variance = {variance}");
/// ```
pub struct GaussianProcess<F: Float, C: CovarianceFunction<F> + ?Sized> {
    /// Covariance function
    covariance: Arc<C>,
    /// Training inputs (n, D)
    x: Array2<F>,
    /// Training targets (n, d)
    y: Array2<F>,
    /// Last factorization
    cache: RefCell<Option<Rc<CovarianceCache<F>>>>,
}

impl<F: Float, C: CovarianceFunction<F> + ?Sized> fmt::Display for GaussianProcess<F, C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "GP(covariance={}, n_train={}, n_outputs={})",
            self.covariance,
            self.n_train(),
            self.n_outputs()
        )
    }
}

impl<F: Float, C: CovarianceFunction<F>> GaussianProcess<F, C> {
    /// Constructor of a model without training data
    pub fn new(covariance: C) -> Self {
        Self::shared(Arc::new(covariance))
    }
}

impl<F: Float, C: CovarianceFunction<F> + ?Sized> GaussianProcess<F, C> {
    /// Constructor of a model without training data using a shared covariance function
    pub fn shared(covariance: Arc<C>) -> Self {
        GaussianProcess {
            covariance,
            x: Array2::zeros((0, 0)),
            y: Array2::zeros((0, 0)),
            cache: RefCell::new(None),
        }
    }

    /// Set training data, see [`GaussianProcess::set_data`]
    pub fn with_data(
        mut self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, impl Dimension>,
    ) -> Result<Self> {
        self.set_data(x, y)?;
        Ok(self)
    }

    /// Set training inputs (n, D) and targets.
    ///
    /// Targets are squeezed to a (n, d) matrix, a flat vector giving a single column.
    /// Any cached factorization is invalidated.
    pub fn set_data(
        &mut self,
        x: &ArrayBase<impl Data<Elem = F>, Ix2>,
        y: &ArrayBase<impl Data<Elem = F>, impl Dimension>,
    ) -> Result<()> {
        let y = squeeze_targets(y.to_owned().into_dyn())?;
        if x.nrows() != y.nrows() {
            return Err(GpError::ShapeMismatch(format!(
                "input/target shape mismatch: {} inputs for {} targets",
                x.nrows(),
                y.nrows()
            )));
        }
        self.x = x.to_owned();
        self.y = y;
        self.invalidate_cache();
        Ok(())
    }

    /// Training inputs and targets
    pub fn data(&self) -> (ArrayView2<F>, ArrayView2<F>) {
        (self.x.view(), self.y.view())
    }

    /// Shared covariance function
    pub fn covariance(&self) -> &Arc<C> {
        &self.covariance
    }

    /// Number of training points
    pub fn n_train(&self) -> usize {
        self.x.nrows()
    }

    /// Number of outputs
    pub fn n_outputs(&self) -> usize {
        self.y.ncols()
    }

    fn invalidate_cache(&self) {
        self.cache.replace(None);
    }

    fn check_data(&self) -> Result<()> {
        if self.n_train() == 0 {
            return Err(GpError::InvalidValueError("no training data".to_string()));
        }
        Ok(())
    }

    /// Returns the factorization of the training covariance matrix for the given hyperparameters.
    ///
    /// The cached factorization is returned when `hyperparams` equals the ones it was computed
    /// from, otherwise K, its cholesky factor L and alpha = K^-1 Y are recomputed and cached.
    /// Fails with [`GpError::SingularCovariance`] when K is not positive definite
    /// or holds non finite values.
    pub fn get_covariance_cache(
        &self,
        hyperparams: &Hyperparams<F>,
    ) -> Result<Rc<CovarianceCache<F>>> {
        self.check_data()?;
        if let Some(cache) = self.cache.borrow().as_ref() {
            if cache.hyperparams == *hyperparams {
                debug!("Covariance cache hit");
                return Ok(Rc::clone(cache));
            }
        }

        debug!("Covariance cache miss, factorize {}", self.covariance);
        let theta = hyperparams.covar()?;
        let k = self.covariance.kernel(theta, self.x.view(), None)?;
        if k.iter().any(|v| !v.is_finite()) {
            return Err(LinalgError::NotPositiveDefinite.into());
        }
        let l = k.cholesky()?;
        if l.diag().iter().any(|v| !v.is_finite() || *v <= F::zero()) {
            return Err(LinalgError::NotPositiveDefinite.into());
        }
        let rho = l.solve_triangular(&self.y, UPLO::Lower)?;
        let alpha = l.t().solve_triangular_into(rho, UPLO::Upper)?;

        let cache = Rc::new(CovarianceCache {
            hyperparams: hyperparams.clone(),
            k,
            l,
            alpha,
            w: OnceCell::new(),
        });
        self.cache.replace(Some(Rc::clone(&cache)));
        Ok(cache)
    }

    /// Negative log marginal likelihood of the training data for the given hyperparameters,
    /// penalized by the log prior density when `priors` are given.
    ///
    /// A singular or non finite covariance matrix is not an error: it is logged and
    /// [`SINGULAR_PENALTY`] is used as the likelihood value, which is therefore always finite.
    pub fn log_marginal_likelihood(
        &self,
        hyperparams: &Hyperparams<F>,
        priors: Option<&Priors>,
    ) -> Result<F> {
        let mut lml = match self.get_covariance_cache(hyperparams) {
            Ok(cache) => {
                let n = F::cast(self.n_train());
                let d = F::cast(self.n_outputs());
                let half = F::cast(0.5);
                let log_det = cache.l.diag().mapv(|v| v.ln()).sum();
                let log_2pi = (F::cast(2.) * F::cast(std::f64::consts::PI)).ln();
                let lml =
                    half * (&cache.alpha * &self.y).sum() + d * (log_det + half * n * log_2pi);
                if lml.is_finite() {
                    lml
                } else {
                    error!("Non finite likelihood {lml} for hyperparams {hyperparams}");
                    F::cast(SINGULAR_PENALTY)
                }
            }
            Err(GpError::SingularCovariance(err)) => {
                error!("Singular covariance ({err}) for hyperparams {hyperparams}");
                F::cast(SINGULAR_PENALTY)
            }
            Err(err) => return Err(err),
        };

        if let Some(priors) = priors {
            let table = self.prior_contribution(hyperparams, priors)?;
            let ln_prior: f64 = table.values().map(|p| p.column(0).sum()).sum();
            lml -= F::cast(ln_prior);
        }
        Ok(lml)
    }

    /// Gradient of the negative log marginal likelihood with respect to every hyperparameter.
    ///
    /// The result has the groups and shapes of `hyperparams`. Only the [`COVAR`] group
    /// depends on the data, other groups only get the prior contribution.
    /// A singular covariance matrix or a non finite gradient is logged and gives a zero
    /// gradient for the [`COVAR`] group.
    pub fn log_marginal_likelihood_gradient(
        &self,
        hyperparams: &Hyperparams<F>,
        priors: Option<&Priors>,
    ) -> Result<Hyperparams<F>> {
        let mut grad = hyperparams.map(|_| F::zero());
        let theta = hyperparams.covar()?;

        match self.get_covariance_cache(hyperparams) {
            Ok(cache) => {
                let w = cache.w(self.n_outputs())?;
                let dk = self
                    .covariance
                    .kernel_gradient(theta, self.x.view(), None)?;
                let half = F::cast(0.5);
                let dlml: Array1<F> = dk
                    .outer_iter()
                    .map(|dki| half * (w * &dki).sum())
                    .collect();
                if dlml.iter().all(|v| v.is_finite()) {
                    grad.insert(COVAR, dlml);
                } else {
                    error!("Non finite likelihood gradient for hyperparams {hyperparams}");
                }
            }
            Err(GpError::SingularCovariance(err)) => {
                error!("Singular covariance ({err}) for hyperparams {hyperparams}");
            }
            Err(err) => return Err(err),
        }

        if let Some(priors) = priors {
            let table = self.prior_contribution(hyperparams, priors)?;
            for (name, pvalues) in table.iter() {
                if let Some(g) = grad.get_mut(name) {
                    g.iter_mut()
                        .zip(pvalues.column(1))
                        .for_each(|(gi, dp)| *gi -= F::cast(*dp));
                }
            }
        }
        Ok(grad)
    }

    /// Log prior density and its derivative per group, see [`Priors::evaluate`].
    /// The [`COVAR`] group uses the log-space flags of the covariance function,
    /// other groups are taken in natural space.
    fn prior_contribution(
        &self,
        hyperparams: &Hyperparams<F>,
        priors: &Priors,
    ) -> Result<BTreeMap<String, Array2<f64>>> {
        let hp = hyperparams.map(|v| v.to_f64().unwrap_or(f64::NAN));
        priors.evaluate(&hp, |name| {
            if name == COVAR {
                self.covariance.log_space_mask()
            } else {
                vec![]
            }
        })
    }

    /// Predict mean and variance of the `output` component at `xstar` (m, D) points.
    ///
    /// The variance is taken in absolute value to guard against small negative values
    /// coming from the difference of two close quantities.
    pub fn predict(
        &self,
        hyperparams: &Hyperparams<F>,
        xstar: &ArrayBase<impl Data<Elem = F>, Ix2>,
        output: usize,
    ) -> Result<(Array1<F>, Array1<F>)> {
        let (mean, kstar, cache) = self.predict_with_cross_covariance(hyperparams, xstar, output)?;
        let theta = hyperparams.covar()?;
        let kss = self.covariance.kernel_diag(theta, xstar.view())?;
        let v = cache.l.solve_triangular(&kstar, UPLO::Lower)?;
        let variance = (kss - v.mapv(|v| v * v).sum_axis(Axis(0))).mapv(|v| v.abs());
        Ok((mean, variance))
    }

    /// Predict mean of the `output` component at `xstar` (m, D) points
    pub fn predict_mean(
        &self,
        hyperparams: &Hyperparams<F>,
        xstar: &ArrayBase<impl Data<Elem = F>, Ix2>,
        output: usize,
    ) -> Result<Array1<F>> {
        let (mean, _, _) = self.predict_with_cross_covariance(hyperparams, xstar, output)?;
        Ok(mean)
    }

    fn predict_with_cross_covariance(
        &self,
        hyperparams: &Hyperparams<F>,
        xstar: &ArrayBase<impl Data<Elem = F>, Ix2>,
        output: usize,
    ) -> Result<(Array1<F>, Array2<F>, Rc<CovarianceCache<F>>)> {
        if output >= self.n_outputs() {
            return Err(GpError::InvalidValueError(format!(
                "output {output} out of range for {} outputs",
                self.n_outputs()
            )));
        }
        let cache = self.get_covariance_cache(hyperparams)?;
        let theta = hyperparams.covar()?;
        let kstar = self
            .covariance
            .kernel(theta, self.x.view(), Some(xstar.view()))?;
        let mean = kstar.t().dot(&cache.alpha.column(output));
        Ok((mean, kstar, cache))
    }
}
