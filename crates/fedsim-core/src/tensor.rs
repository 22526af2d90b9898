// ParamTensor — a flat f32 buffer with a shape

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::error::{Error, Result};

/// A multi-dimensional parameter tensor stored as a flat `f32` buffer.
///
/// `f32` is the full-precision working width: clients always train on
/// full-precision values, and quantization applies only to wire transfers.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamTensor {
    data: Vec<f32>,
    shape: Vec<usize>,
}

impl ParamTensor {
    /// Create a tensor from flat data and a shape.
    ///
    /// Fails if the element count implied by `shape` does not match
    /// `data.len()`.
    pub fn new(data: Vec<f32>, shape: Vec<usize>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(Error::ElementCountMismatch {
                shape,
                expected,
                got: data.len(),
            });
        }
        Ok(Self { data, shape })
    }

    /// A zero-filled tensor of the given shape.
    pub fn zeros(shape: Vec<usize>) -> Self {
        let n = shape.iter().product();
        Self {
            data: vec![0.0; n],
            shape,
        }
    }

    /// A tensor filled with normally distributed values (mean 0, given std).
    pub fn randn<R: Rng>(shape: Vec<usize>, std: f32, rng: &mut R) -> Self {
        let n = shape.iter().product();
        let dist = Normal::new(0.0f32, std).unwrap_or(Normal::new(0.0, 1.0).unwrap());
        let data = (0..n).map(|_| dist.sample(rng)).collect();
        Self { data, shape }
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// The tensor's shape.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Flat element data, row-major.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable flat element data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Largest absolute value in the tensor (0.0 for an empty tensor).
    pub fn abs_max(&self) -> f32 {
        self.data.iter().fold(0.0f32, |acc, &v| acc.max(v.abs()))
    }
}
