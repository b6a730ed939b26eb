use crate::errors::{GpError, Result};
use linfa::Float;
use ndarray::{Array2, Array3, ArrayBase, ArrayD, ArrayView2, Axis, CowArray, Data, Ix1, Ix2, IxDyn};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Subset of input columns a covariance function reads, all columns when unset.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct ActiveDimensions(Option<Vec<usize>>);

impl ActiveDimensions {
    /// Restrict to the given columns (`None` to read all columns)
    pub fn new(dims: Option<Vec<usize>>) -> Self {
        ActiveDimensions(dims)
    }

    /// Selected column indices if any
    pub fn dims(&self) -> Option<&[usize]> {
        self.0.as_deref()
    }

    /// Returns a view of `x` restricted to the active columns.
    /// Borrows `x` when every column is active.
    pub fn select<'a, F: Float>(&self, x: ArrayView2<'a, F>) -> Result<CowArray<'a, F, Ix2>> {
        match &self.0 {
            None => Ok(CowArray::from(x)),
            Some(dims) => {
                if let Some(d) = dims.iter().find(|&&d| d >= x.ncols()) {
                    return Err(GpError::ShapeMismatch(format!(
                        "active dimension {} out of range for inputs with {} columns",
                        d,
                        x.ncols()
                    )));
                }
                Ok(CowArray::from(x.select(Axis(1), dims)))
            }
        }
    }
}

/// Fails when a hyperparameter vector does not have the expected length
pub(crate) fn check_parameter_count(name: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(GpError::ShapeMismatch(format!(
            "{name}: expected {expected} hyperparameters, got {actual}"
        )));
    }
    Ok(())
}

/// Computes squared scaled differences `((x_k - y_k) * scales_k)^2` between rows of x and
/// rows of y per input dimension resulting in a 3d array of shape (ncols, nrows(x), nrows(y)).
///
/// `scales` holds one factor per column, or a single factor shared by all columns.
/// Equal coordinates give an exact zero whatever the scale, even an infinite one.
pub(crate) fn scaled_squared_differences<F: Float>(
    x: &ArrayBase<impl Data<Elem = F>, Ix2>,
    y: &ArrayBase<impl Data<Elem = F>, Ix2>,
    scales: &ArrayBase<impl Data<Elem = F>, Ix1>,
) -> Result<Array3<F>> {
    if x.ncols() != y.ncols() {
        return Err(GpError::ShapeMismatch(format!(
            "inputs have {} and {} columns",
            x.ncols(),
            y.ncols()
        )));
    }
    if scales.len() != 1 && scales.len() != x.ncols() {
        return Err(GpError::ShapeMismatch(format!(
            "{} scales for inputs with {} columns",
            scales.len(),
            x.ncols()
        )));
    }
    let mut result = Array3::zeros((x.ncols(), x.nrows(), y.nrows()));
    for (k, mut slab) in result.outer_iter_mut().enumerate() {
        let xk = x.column(k);
        let yk = y.column(k);
        let scale = scales[k.min(scales.len() - 1)];
        for ((i, j), v) in slab.indexed_iter_mut() {
            let d = xk[i] - yk[j];
            if d != F::zero() {
                let sd = d * scale;
                *v = sd * sd;
            }
        }
    }
    Ok(result)
}

/// Squeezes targets to a (n, d) matrix: axes of length one are dropped
/// and a flat vector becomes a single column
pub(crate) fn squeeze_targets<F: Float>(y: ArrayD<F>) -> Result<Array2<F>> {
    let shape: Vec<usize> = y.shape().iter().copied().filter(|&s| s != 1).collect();
    let shape = match shape.len() {
        0 => vec![y.len(), 1],
        1 => vec![shape[0], 1],
        2 => shape,
        _ => {
            return Err(GpError::ShapeMismatch(format!(
                "targets should be a vector or a matrix, got shape {:?}",
                y.shape()
            )))
        }
    };
    let y = y
        .as_standard_layout()
        .into_owned()
        .into_shape(IxDyn(&shape))
        .map_err(|e| GpError::ShapeMismatch(e.to_string()))?;
    y.into_dimensionality::<Ix2>()
        .map_err(|e| GpError::ShapeMismatch(e.to_string()))
}
