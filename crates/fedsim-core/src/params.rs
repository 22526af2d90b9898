// ParamMap — insertion-ordered parameter name → tensor mapping

use crate::error::{Error, Result};
use crate::tensor::ParamTensor;

/// An ordered mapping from parameter name to tensor.
///
/// Insertion order is preserved, so two mappings built from the same model
/// iterate their keys identically. Two mappings are *compatible* when they
/// have identical key sets and identical per-key shapes; aggregation and
/// quantization both require compatibility.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamMap {
    entries: Vec<(String, ParamTensor)>,
}

impl ParamMap {
    /// An empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a tensor under `name`, replacing any existing entry.
    pub fn insert(&mut self, name: impl Into<String>, tensor: ParamTensor) {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == name) {
            entry.1 = tensor;
        } else {
            self.entries.push((name, tensor));
        }
    }

    /// Look up a tensor by name.
    pub fn get(&self, name: &str) -> Option<&ParamTensor> {
        self.entries
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, t)| t)
    }

    /// Mutable lookup by name.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut ParamTensor> {
        self.entries
            .iter_mut()
            .find(|(k, _)| k == name)
            .map(|(_, t)| t)
    }

    /// Iterate `(name, tensor)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamTensor)> {
        self.entries.iter().map(|(k, t)| (k.as_str(), t))
    }

    /// Iterate pairs with mutable tensors.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut ParamTensor)> {
        self.entries.iter_mut().map(|(k, t)| (k.as_str(), t))
    }

    /// Parameter names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Number of named tensors.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total element count across all tensors.
    pub fn num_values(&self) -> usize {
        self.entries.iter().map(|(_, t)| t.numel()).sum()
    }

    /// Largest absolute value across all tensors (0.0 for an empty map).
    pub fn abs_max(&self) -> f32 {
        self.entries
            .iter()
            .fold(0.0f32, |acc, (_, t)| acc.max(t.abs_max()))
    }

    /// Check that `other` has the same key set and per-key shapes.
    pub fn check_compatible(&self, other: &ParamMap) -> Result<()> {
        if self.len() != other.len() {
            return Err(Error::KeyMismatch(format!(
                "{} keys vs {} keys",
                self.len(),
                other.len()
            )));
        }
        for (name, tensor) in self.iter() {
            let theirs = other.get(name).ok_or_else(|| {
                Error::KeyMismatch(format!("missing parameter {name:?}"))
            })?;
            if tensor.shape() != theirs.shape() {
                return Err(Error::ShapeMismatch {
                    name: name.to_string(),
                    expected: tensor.shape().to_vec(),
                    got: theirs.shape().to_vec(),
                });
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, ParamTensor)> for ParamMap {
    fn from_iter<I: IntoIterator<Item = (String, ParamTensor)>>(iter: I) -> Self {
        let mut map = ParamMap::new();
        for (k, t) in iter {
            map.insert(k, t);
        }
        map
    }
}
