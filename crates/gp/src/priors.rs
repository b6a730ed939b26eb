//! Prior beliefs on hyperparameter values, used as a penalty of the negative log marginal likelihood.

use crate::errors::{GpError, Result};
use crate::hyperparameters::Hyperparams;
use ndarray::Array2;
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A prior density on a scalar hyperparameter expressed in natural space
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum Prior {
    /// Gamma density with `shape` k and `scale` t
    Gamma {
        /// Shape parameter k
        shape: f64,
        /// Scale parameter t
        scale: f64,
    },
    /// Gaussian density with `mean` and standard deviation `std`
    Gaussian {
        /// Mean of the density
        mean: f64,
        /// Standard deviation of the density
        std: f64,
    },
}

impl Prior {
    /// Log density at `x` and its derivative with respect to `x`
    pub fn ln_density_with_grad(&self, x: f64) -> (f64, f64) {
        match *self {
            Prior::Gamma { shape, scale } => {
                let lng = (shape - 1.) * x.ln()
                    - x / scale
                    - libm::lgamma(shape)
                    - shape * scale.ln();
                let dlng = (shape - 1.) / x - 1. / scale;
                (lng, dlng)
            }
            Prior::Gaussian { mean, std } => {
                let var = std * std;
                let lng = -0.5 * (x - mean) * (x - mean) / var
                    - 0.5 * (2. * std::f64::consts::PI).ln()
                    - std.ln();
                let dlng = -(x - mean) / var;
                (lng, dlng)
            }
        }
    }
}

/// Priors per hyperparameter group, one optional prior per scalar entry in flattening order
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Priors(BTreeMap<String, Vec<Option<Prior>>>);

impl Priors {
    /// Constructor without any prior
    pub fn new() -> Self {
        Self::default()
    }

    /// Set priors of the given group, `None` entries are left without prior
    pub fn with_group(mut self, name: impl Into<String>, priors: Vec<Option<Prior>>) -> Self {
        self.0.insert(name.into(), priors);
        self
    }

    /// Priors of the given group if any
    pub fn get(&self, name: &str) -> Option<&[Option<Prior>]> {
        self.0.get(name).map(|p| p.as_slice())
    }

    /// Evaluate priors at the given hyperparameters.
    ///
    /// Returns a (count, 2) table per group holding the log density and its derivative
    /// with respect to the stored hyperparameter. Entries flagged by `log_space` are
    /// held in log-space: the density is evaluated at `exp(theta)` and the derivative
    /// scaled accordingly. Groups without priors give zeros.
    pub fn evaluate(
        &self,
        hyperparams: &Hyperparams<f64>,
        log_space: impl Fn(&str) -> Vec<bool>,
    ) -> Result<BTreeMap<String, Array2<f64>>> {
        let mut table = BTreeMap::new();
        for (name, values) in hyperparams.iter() {
            let mut pvalues = Array2::zeros((values.len(), 2));
            if let Some(plist) = self.get(name) {
                if plist.len() != values.len() {
                    return Err(GpError::ShapeMismatch(format!(
                        "group '{name}' has {} hyperparameters but {} priors",
                        values.len(),
                        plist.len()
                    )));
                }
                let mut mask = log_space(name);
                mask.resize(values.len(), false);
                for (i, ((theta, prior), is_log)) in
                    values.iter().zip(plist.iter()).zip(mask).enumerate()
                {
                    if let Some(prior) = prior {
                        let x = if is_log { theta.exp() } else { *theta };
                        let (lng, mut dlng) = prior.ln_density_with_grad(x);
                        // chain rule d/dtheta = x d/dx for x = exp(theta)
                        if is_log {
                            dlng *= x;
                        }
                        pvalues[[i, 0]] = lng;
                        pvalues[[i, 1]] = dlng;
                    }
                }
            }
            table.insert(name.clone(), pvalues);
        }
        Ok(table)
    }
}
