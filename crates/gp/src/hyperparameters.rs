use crate::errors::{GpError, Result};
use ndarray::{Array, Array1, ArrayBase, ArrayD, ArrayView1, Data, Dimension, Ix1, IxDyn};
#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Name of the hyperparameter group holding the covariance function parameters
pub const COVAR: &str = "covar";

/// Shapes of the hyperparameter groups, recorded to rebuild a structure from a flat vector
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct ShapeCatalogue(BTreeMap<String, Vec<usize>>);

impl ShapeCatalogue {
    /// Shape of the given group
    pub fn get(&self, name: &str) -> Option<&[usize]> {
        self.0.get(name).map(|s| s.as_slice())
    }

    /// Total number of scalar entries
    pub fn len(&self) -> usize {
        self.0.values().map(|s| s.iter().product::<usize>()).sum()
    }

    /// Whether the catalogue has no scalar entry
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over group names and shapes in flattening order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<usize>)> {
        self.0.iter()
    }
}

/// Named groups of hyperparameter arrays, e.g. `{"covar": [log(a), log(l)], "lik": [log(s)]}`
///
/// Groups are kept ordered by name so that [`Hyperparams::flatten`] and
/// [`Hyperparams::unflatten`] agree on the layout of the flat vector.
/// Equality compares every group by value.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Hyperparams<T>(BTreeMap<String, ArrayD<T>>);

impl<T> Default for Hyperparams<T> {
    fn default() -> Self {
        Hyperparams(BTreeMap::new())
    }
}

impl<T> Hyperparams<T> {
    /// Constructor of an empty structure
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a group of hyperparameters.
    pub fn with_group<D: Dimension>(mut self, name: impl Into<String>, values: Array<T, D>) -> Self {
        self.insert(name, values);
        self
    }

    /// Insert a group, returning the previous values if any
    pub fn insert<D: Dimension>(
        &mut self,
        name: impl Into<String>,
        values: Array<T, D>,
    ) -> Option<ArrayD<T>> {
        self.0.insert(name.into(), values.into_dyn())
    }

    /// Get a group by name
    pub fn get(&self, name: &str) -> Option<&ArrayD<T>> {
        self.0.get(name)
    }

    /// Get a mutable group by name
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ArrayD<T>> {
        self.0.get_mut(name)
    }

    /// Get a group by name as a vector
    pub fn group(&self, name: &str) -> Result<ArrayView1<T>> {
        let values = self.get(name).ok_or_else(|| {
            GpError::InvalidValueError(format!("missing hyperparameter group '{name}'"))
        })?;
        if values.ndim() == 1 {
            values
                .view()
                .into_dimensionality::<Ix1>()
                .map_err(|e| GpError::ShapeMismatch(e.to_string()))
        } else {
            Err(GpError::ShapeMismatch(format!(
                "hyperparameter group '{name}' should be a vector, got shape {:?}",
                values.shape()
            )))
        }
    }

    /// Covariance function hyperparameters, the [`COVAR`] group
    pub fn covar(&self) -> Result<ArrayView1<T>> {
        self.group(COVAR)
    }

    /// Iterate over groups in flattening order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayD<T>)> {
        self.0.iter()
    }

    /// Group names in flattening order
    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Total number of scalar entries
    pub fn len(&self) -> usize {
        self.0.values().map(|v| v.len()).sum()
    }

    /// Whether there is no scalar entry
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shapes of every group
    pub fn shapes(&self) -> ShapeCatalogue {
        ShapeCatalogue(
            self.0
                .iter()
                .map(|(name, values)| (name.clone(), values.shape().to_vec()))
                .collect(),
        )
    }

    /// Build a structure of same groups and shapes by applying `f` to each entry
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Hyperparams<U> {
        Hyperparams(
            self.0
                .iter()
                .map(|(name, values)| (name.clone(), values.map(&mut f)))
                .collect(),
        )
    }
}

impl<T: Clone> Hyperparams<T> {
    /// Concatenate groups in name order, each one flattened in row-major order
    pub fn flatten(&self) -> Array1<T> {
        self.0
            .values()
            .flat_map(|values| values.iter().cloned())
            .collect()
    }

    /// Rebuild a structure from a flat vector given the shapes of its groups.
    ///
    /// `Hyperparams::unflatten(&h.flatten(), &h.shapes())` gives back `h`.
    pub fn unflatten(
        flat: &ArrayBase<impl Data<Elem = T>, Ix1>,
        shapes: &ShapeCatalogue,
    ) -> Result<Self> {
        if flat.len() != shapes.len() {
            return Err(GpError::ShapeMismatch(format!(
                "flat vector of length {} does not match {} hyperparameters",
                flat.len(),
                shapes.len()
            )));
        }
        let mut values = flat.iter().cloned();
        let mut groups = BTreeMap::new();
        for (name, shape) in shapes.iter() {
            let n = shape.iter().product::<usize>();
            let chunk: Vec<T> = values.by_ref().take(n).collect();
            let group = ArrayD::from_shape_vec(IxDyn(shape), chunk)
                .map_err(|e| GpError::ShapeMismatch(e.to_string()))?;
            groups.insert(name.clone(), group);
        }
        Ok(Hyperparams(groups))
    }
}

impl<T: fmt::Display> fmt::Display for Hyperparams<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, values)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {values}")?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr0, array, Array3};

    fn sample() -> Hyperparams<f64> {
        Hyperparams::new()
            .with_group(COVAR, array![0.1, -2.3, 4.5])
            .with_group("lik", array![f64::ln(0.1)])
            .with_group("x", array![[1., 2.], [3., 4.], [5., 6.]])
            .with_group("scalar", arr0(7.5))
            .with_group(
                "tensor",
                Array3::from_shape_fn((2, 3, 2), |(i, j, k)| (i * 6 + j * 2 + k) as f64 * 0.1),
            )
            .with_group("empty", Array1::<f64>::zeros(0))
    }

    #[test]
    fn test_flatten_round_trip() {
        let h = sample();
        let flat = h.flatten();
        assert_eq!(flat.len(), h.len());
        assert_eq!(flat.len(), 3 + 1 + 6 + 1 + 12);
        let back = Hyperparams::unflatten(&flat, &h.shapes()).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_flatten_order() {
        let h = Hyperparams::new()
            .with_group("lik", array![3.])
            .with_group(COVAR, array![1., 2.])
            .with_group("x", array![[4., 5.], [6., 7.]]);
        // groups by name, row-major inside a group
        assert_eq!(h.flatten(), array![1., 2., 3., 4., 5., 6., 7.]);
    }

    #[test]
    fn test_flatten_non_standard_layout() {
        let x = array![[1., 2., 3.], [4., 5., 6.]];
        let h = Hyperparams::new().with_group("x", x.t().to_owned());
        assert_eq!(h.flatten(), array![1., 4., 2., 5., 3., 6.]);
        let back = Hyperparams::unflatten(&h.flatten(), &h.shapes()).unwrap();
        assert_eq!(back, h);
    }

    #[test]
    fn test_unflatten_wrong_length() {
        let h = sample();
        let flat = Array1::<f64>::zeros(h.len() + 1);
        assert!(matches!(
            Hyperparams::unflatten(&flat, &h.shapes()),
            Err(GpError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn test_bool_mask_round_trip() {
        let h = sample();
        let mask = h.map(|v| *v > 1.);
        assert_eq!(mask.shapes(), h.shapes());
        let back = Hyperparams::unflatten(&mask.flatten(), &mask.shapes()).unwrap();
        assert_eq!(back, mask);
    }

    #[test]
    fn test_group_access() {
        let h = sample();
        assert_eq!(h.covar().unwrap(), array![0.1, -2.3, 4.5]);
        assert!(matches!(h.group("x"), Err(GpError::ShapeMismatch(_))));
        assert!(matches!(
            Hyperparams::<f64>::new().covar(),
            Err(GpError::InvalidValueError(_))
        ));
        assert_eq!(
            h.names().collect::<Vec<_>>(),
            vec!["covar", "empty", "lik", "scalar", "tensor", "x"]
        );
    }

    #[test]
    fn test_equality_by_value() {
        let h = sample();
        let mut other = sample();
        assert_eq!(h, other);
        other.insert("lik", array![f64::ln(0.2)]);
        assert_ne!(h, other);
    }
}
