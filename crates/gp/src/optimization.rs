use crate::algorithm::GaussianProcess;
use crate::covariance::CovarianceFunction;
use crate::errors::{GpError, Result};
use crate::hyperparameters::{Hyperparams, ShapeCatalogue};
use crate::priors::Priors;

use argmin::argmin_error;
use argmin::core::{CostFunction, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use finitediff::FiniteDiff;
use log::{debug, info, warn};
use ndarray::Array1;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

/// Objective value (and gradient entry) substituted to NaN during hyperparameter optimization
pub const NAN_PENALTY: f64 = 1e6;

/// Default maximum number of objective evaluations of a hyperparameter optimization
pub const DEFAULT_MAX_EVAL: usize = 100;

/// Default number of past updates kept by the L-BFGS minimizer
pub const DEFAULT_LBFGS_MEMORY: usize = 7;

/// A model scored by a negative log marginal likelihood of its hyperparameters
pub trait MarginalLikelihood {
    /// Negative log marginal likelihood at `hyperparams`, penalized by `priors` if any
    fn log_marginal_likelihood(
        &self,
        hyperparams: &Hyperparams<f64>,
        priors: Option<&Priors>,
    ) -> Result<f64>;

    /// Gradient of [`MarginalLikelihood::log_marginal_likelihood`], shaped as `hyperparams`
    fn log_marginal_likelihood_gradient(
        &self,
        hyperparams: &Hyperparams<f64>,
        priors: Option<&Priors>,
    ) -> Result<Hyperparams<f64>>;
}

impl<C: CovarianceFunction<f64> + ?Sized> MarginalLikelihood for GaussianProcess<f64, C> {
    fn log_marginal_likelihood(
        &self,
        hyperparams: &Hyperparams<f64>,
        priors: Option<&Priors>,
    ) -> Result<f64> {
        GaussianProcess::log_marginal_likelihood(self, hyperparams, priors)
    }

    fn log_marginal_likelihood_gradient(
        &self,
        hyperparams: &Hyperparams<f64>,
        priors: Option<&Priors>,
    ) -> Result<Hyperparams<f64>> {
        GaussianProcess::log_marginal_likelihood_gradient(self, hyperparams, priors)
    }
}

/// A numerical minimization routine over a flat vector of variables
pub trait Minimizer {
    /// Minimize `objective` from `x0` within `bounds` using at most `max_eval` objective
    /// evaluations. Returns the best point found and its objective value.
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        gradient: &dyn Fn(&[f64]) -> Vec<f64>,
        x0: &[f64],
        bounds: &[(f64, f64)],
        max_eval: usize,
    ) -> Result<(Vec<f64>, f64)>;
}

/// Derivative free minimizer honouring bounds, using the COBYLA algorithm
#[derive(Clone, Debug)]
pub struct CobylaMinimizer {
    rhobeg: f64,
    ftol_rel: f64,
}

impl Default for CobylaMinimizer {
    fn default() -> Self {
        CobylaMinimizer {
            rhobeg: 0.5,
            ftol_rel: 1e-4,
        }
    }
}

impl CobylaMinimizer {
    /// Set the initial step size of the variables
    pub fn rhobeg(mut self, rhobeg: f64) -> Self {
        self.rhobeg = rhobeg;
        self
    }

    /// Set the relative tolerance on the objective value used as stopping criterion
    pub fn ftol_rel(mut self, ftol_rel: f64) -> Self {
        self.ftol_rel = ftol_rel;
        self
    }
}

impl Minimizer for CobylaMinimizer {
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        _gradient: &dyn Fn(&[f64]) -> Vec<f64>,
        x0: &[f64],
        bounds: &[(f64, f64)],
        max_eval: usize,
    ) -> Result<(Vec<f64>, f64)> {
        use cobyla::{minimize, Func, RhoBeg, StopTols};

        let cons: Vec<&dyn Func<()>> = vec![];
        match minimize(
            |x: &[f64], _u: &mut ()| objective(x),
            x0,
            bounds,
            &cons,
            (),
            max_eval,
            RhoBeg::All(self.rhobeg),
            Some(StopTols {
                ftol_rel: self.ftol_rel,
                ..StopTols::default()
            }),
        ) {
            Ok((status, x_opt, fval)) => {
                debug!("Cobyla optimizer status={status:?}");
                Ok((x_opt, fval))
            }
            Err((status, x_opt, fval)) => {
                warn!("Cobyla optimizer failed with status={status:?}, keep last iterate");
                Ok((x_opt, fval))
            }
        }
    }
}

type Point = Array1<f64>;
type LbfgsSolver = LBFGS<MoreThuenteLineSearch<Point, Point, f64>, Point, Point, f64>;

/// Gradient based minimizer without bounds, using L-BFGS with a More-Thuente line search
#[derive(Clone, Debug)]
pub struct LbfgsMinimizer {
    memory: usize,
    tol_grad: f64,
    tol_cost: f64,
}

impl Default for LbfgsMinimizer {
    fn default() -> Self {
        LbfgsMinimizer {
            memory: DEFAULT_LBFGS_MEMORY,
            tol_grad: 1e-6,
            tol_cost: 1e-9,
        }
    }
}

impl LbfgsMinimizer {
    /// Set the number of past updates used to approximate the inverse hessian
    pub fn memory(mut self, memory: usize) -> Self {
        self.memory = memory;
        self
    }

    /// Set the gradient norm below which the minimization stops
    pub fn tol_grad(mut self, tol_grad: f64) -> Self {
        self.tol_grad = tol_grad;
        self
    }

    /// Set the change of objective value below which the minimization stops
    pub fn tol_cost(mut self, tol_cost: f64) -> Self {
        self.tol_cost = tol_cost;
        self
    }

    fn solver(&self) -> std::result::Result<LbfgsSolver, argmin::core::Error> {
        LBFGS::new(MoreThuenteLineSearch::new(), self.memory)
            .with_tolerance_grad(self.tol_grad)?
            .with_tolerance_cost(self.tol_cost)
    }
}

/// Objective and gradient closures seen as an argmin problem.
///
/// Objective evaluations are counted against `max_eval` and the best evaluated point is
/// recorded, so that the minimization can be interrupted once the budget is used.
struct FlatProblem<'a> {
    objective: &'a dyn Fn(&[f64]) -> f64,
    gradient: &'a dyn Fn(&[f64]) -> Vec<f64>,
    max_eval: usize,
    n_eval: &'a Cell<usize>,
    best: &'a RefCell<Option<(Vec<f64>, f64)>>,
}

impl CostFunction for FlatProblem<'_> {
    type Param = Point;
    type Output = f64;

    fn cost(&self, x: &Point) -> std::result::Result<f64, argmin::core::Error> {
        if self.n_eval.get() >= self.max_eval {
            return Err(argmin_error!(
                ConditionViolated,
                format!("evaluation budget of {} exhausted", self.max_eval)
            ));
        }
        self.n_eval.set(self.n_eval.get() + 1);
        let x = x.to_vec();
        let f = (self.objective)(&x);
        let mut best = self.best.borrow_mut();
        if best.as_ref().map_or(true, |(_, fbest)| f < *fbest) {
            *best = Some((x, f));
        }
        Ok(f)
    }
}

impl Gradient for FlatProblem<'_> {
    type Param = Point;
    type Gradient = Point;

    fn gradient(&self, x: &Point) -> std::result::Result<Point, argmin::core::Error> {
        Ok(Array1::from_vec((self.gradient)(&x.to_vec())))
    }
}

impl Minimizer for LbfgsMinimizer {
    /// `max_eval` bounds the number of objective evaluations, line search steps included.
    /// When the budget is used up the best point evaluated so far is returned.
    fn minimize(
        &self,
        objective: &dyn Fn(&[f64]) -> f64,
        gradient: &dyn Fn(&[f64]) -> Vec<f64>,
        x0: &[f64],
        bounds: &[(f64, f64)],
        max_eval: usize,
    ) -> Result<(Vec<f64>, f64)> {
        if bounds
            .iter()
            .any(|(lo, up)| lo.is_finite() || up.is_finite())
        {
            return Err(GpError::InvalidValueError(
                "L-BFGS minimizer does not handle finite bounds".to_string(),
            ));
        }
        let solver = self
            .solver()
            .map_err(|e| GpError::OptimizationError(e.to_string()))?;
        let n_eval = Cell::new(0);
        let best = RefCell::new(None);
        let problem = FlatProblem {
            objective,
            gradient,
            max_eval,
            n_eval: &n_eval,
            best: &best,
        };
        match Executor::new(problem, solver)
            .configure(|state| state.param(Array1::from_vec(x0.to_vec())))
            .run()
        {
            Ok(res) => debug!(
                "L-BFGS optimizer stopped after {} iterations and {} evaluations: {:?}",
                res.state().get_iter(),
                n_eval.get(),
                res.state().get_termination_status()
            ),
            Err(err) if n_eval.get() >= max_eval => {
                debug!("L-BFGS optimizer interrupted: {err}")
            }
            Err(err) => return Err(GpError::OptimizationError(err.to_string())),
        }
        match best.into_inner() {
            Some(best) => Ok(best),
            None => Ok((x0.to_vec(), objective(x0))),
        }
    }
}

/// Hyperparameter optimization parameters
#[derive(Clone, Debug)]
pub struct HyperOptParams {
    filter: Option<Hyperparams<bool>>,
    bounds: BTreeMap<String, Vec<(f64, f64)>>,
    max_eval: usize,
    priors: Option<Priors>,
    gradcheck: bool,
}

impl Default for HyperOptParams {
    fn default() -> Self {
        HyperOptParams {
            filter: None,
            bounds: BTreeMap::new(),
            max_eval: DEFAULT_MAX_EVAL,
            priors: None,
            gradcheck: false,
        }
    }
}

impl HyperOptParams {
    /// Set the free entries mask, shaped as the optimized hyperparameters.
    /// Entries set to `false` keep their starting value.
    pub fn filter(mut self, filter: Hyperparams<bool>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Set `(lower, upper)` bounds of each entry of the given group.
    /// Groups without bounds are unbounded.
    pub fn bounds(mut self, name: impl Into<String>, bounds: Vec<(f64, f64)>) -> Self {
        self.bounds.insert(name.into(), bounds);
        self
    }

    /// Set the evaluation budget given to the minimizer
    pub fn max_eval(mut self, max_eval: usize) -> Self {
        self.max_eval = max_eval;
        self
    }

    /// Set priors penalizing the likelihood
    pub fn priors(mut self, priors: Priors) -> Self {
        self.priors = Some(priors);
        self
    }

    /// Whether the likelihood gradient is checked against finite differences
    /// before and after the minimization
    pub fn gradcheck(mut self, gradcheck: bool) -> Self {
        self.gradcheck = gradcheck;
        self
    }
}

/// Bounds of every scalar entry in flattening order
fn flat_bounds(
    start: &Hyperparams<f64>,
    bounds: &BTreeMap<String, Vec<(f64, f64)>>,
) -> Result<Vec<(f64, f64)>> {
    if let Some(name) = bounds.keys().find(|name| start.get(name).is_none()) {
        return Err(GpError::InvalidValueError(format!(
            "bounds given for unknown hyperparameter group '{name}'"
        )));
    }
    let mut flat = Vec::with_capacity(start.len());
    for (name, values) in start.iter() {
        match bounds.get(name) {
            Some(b) if b.len() == values.len() => {
                if let Some((lo, up)) = b.iter().find(|(lo, up)| lo > up) {
                    return Err(GpError::InvalidValueError(format!(
                        "invalid bounds ({lo}, {up}) for group '{name}'"
                    )));
                }
                flat.extend_from_slice(b)
            }
            Some(b) => {
                return Err(GpError::ShapeMismatch(format!(
                    "{} bounds given for group '{name}' of {} entries",
                    b.len(),
                    values.len()
                )))
            }
            None => flat.extend(
                std::iter::repeat((f64::NEG_INFINITY, f64::INFINITY)).take(values.len()),
            ),
        }
    }
    Ok(flat)
}

/// Max absolute difference between `gradient` and a central finite difference of `objective`
fn gradient_error(
    objective: &dyn Fn(&[f64]) -> f64,
    gradient: &dyn Fn(&[f64]) -> Vec<f64>,
    x: &[f64],
) -> f64 {
    let f = |v: &Vec<f64>| -> f64 { objective(v) };
    let fd = x.to_vec().central_diff(&f);
    fd.iter()
        .zip(gradient(x))
        .map(|(a, b)| (a - b).abs())
        .fold(0., f64::max)
}

/// Flat gradient of `model` at `hyperparams`, failing when its shapes differ from `shapes`
fn flat_gradient<M: MarginalLikelihood + ?Sized>(
    model: &M,
    hyperparams: &Hyperparams<f64>,
    priors: Option<&Priors>,
    shapes: &ShapeCatalogue,
) -> Result<Array1<f64>> {
    let grad = model.log_marginal_likelihood_gradient(hyperparams, priors)?;
    if grad.shapes() != *shapes {
        return Err(GpError::ShapeMismatch(format!(
            "gradient shapes {:?} do not match hyperparameter shapes {:?}",
            grad.shapes(),
            shapes
        )));
    }
    Ok(grad.flatten())
}

/// Optimize the free entries of `start` by minimizing the negative log marginal likelihood
/// of `model` with the given `minimizer`.
///
/// Returns the optimized hyperparameters and the objective value the minimizer reached there.
/// The likelihood and its gradient are first evaluated at `start`, any model error is returned
/// before the minimization begins. During the minimization NaN values are replaced by
/// [`NAN_PENALTY`]. A model error met during the minimization is returned once the minimizer
/// stops.
pub fn optimize_hyperparams<M, O>(
    model: &M,
    start: &Hyperparams<f64>,
    params: &HyperOptParams,
    minimizer: &O,
) -> Result<(Hyperparams<f64>, f64)>
where
    M: MarginalLikelihood + ?Sized,
    O: Minimizer + ?Sized,
{
    let shapes = start.shapes();
    let x0 = start.flatten();
    let mask = match &params.filter {
        Some(filter) if filter.shapes() != shapes => {
            return Err(GpError::ShapeMismatch(format!(
                "filter shapes {:?} do not match hyperparameter shapes {:?}",
                filter.shapes(),
                shapes
            )))
        }
        Some(filter) => filter.flatten().to_vec(),
        None => vec![true; x0.len()],
    };
    let bounds = flat_bounds(start, &params.bounds)?;
    let free: Vec<usize> = (0..x0.len()).filter(|&i| mask[i]).collect();
    let priors = params.priors.as_ref();

    let lml0 = model.log_marginal_likelihood(start, priors)?;
    if free.is_empty() {
        info!("No free hyperparameter, optimization skipped");
        let lml0 = if lml0.is_nan() { NAN_PENALTY } else { lml0 };
        return Ok((start.clone(), lml0));
    }
    flat_gradient(model, start, priors, &shapes)?;

    let failure: RefCell<Option<GpError>> = RefCell::new(None);
    let record = |err: GpError| {
        warn!("Likelihood evaluation failed: {err}");
        failure.borrow_mut().get_or_insert(err);
    };

    let rebuild = |xfree: &[f64]| -> Result<Hyperparams<f64>> {
        let mut x = x0.clone();
        free.iter().zip(xfree).for_each(|(&i, &v)| x[i] = v);
        Hyperparams::unflatten(&x, &shapes)
    };

    let objective = |xfree: &[f64]| -> f64 {
        match rebuild(xfree).and_then(|hp| model.log_marginal_likelihood(&hp, priors)) {
            Ok(lml) if lml.is_nan() => {
                debug!("lml({xfree:?}) = NaN, penalized");
                NAN_PENALTY
            }
            Ok(lml) => {
                debug!("lml({xfree:?}) = {lml}");
                lml
            }
            Err(err) => {
                record(err);
                NAN_PENALTY
            }
        }
    };

    let gradient = |xfree: &[f64]| -> Vec<f64> {
        match rebuild(xfree).and_then(|hp| flat_gradient(model, &hp, priors, &shapes)) {
            Ok(g) => {
                let g: Vec<f64> = free
                    .iter()
                    .map(|&i| if g[i].is_nan() { NAN_PENALTY } else { g[i] })
                    .collect();
                debug!("dlml({xfree:?}) = {g:?}");
                g
            }
            Err(err) => {
                record(err);
                vec![0.; free.len()]
            }
        }
    };

    let xfree0: Vec<f64> = free.iter().map(|&i| x0[i]).collect();
    let bfree: Vec<(f64, f64)> = free.iter().map(|&i| bounds[i]).collect();

    info!(
        "Optimize {} of {} hyperparameters starting from {start} (lml = {lml0})",
        free.len(),
        x0.len()
    );
    if params.gradcheck {
        info!(
            "Gradient check at start: max abs error = {:e}",
            gradient_error(&objective, &gradient, &xfree0)
        );
    }

    let (xopt, fopt) = minimizer.minimize(&objective, &gradient, &xfree0, &bfree, params.max_eval)?;
    if let Some(err) = failure.take() {
        return Err(err);
    }

    if params.gradcheck {
        info!(
            "Gradient check at optimum: max abs error = {:e}",
            gradient_error(&objective, &gradient, &xopt)
        );
    }

    let optimum = rebuild(&xopt)?;
    let fopt = if fopt.is_nan() { NAN_PENALTY } else { fopt };
    info!("Optimized hyperparameters {start} -> {optimum} (lml = {fopt})");
    Ok((optimum, fopt))
}
