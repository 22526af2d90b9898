// LabeledDataset — an immutable labeled sample collection

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use fedsim_core::{bail, Result};

/// An ordered, immutable collection of `(features, label)` pairs.
///
/// Features are stored row-major as one flat `f32` buffer; labels are
/// integer class identifiers in `[0, num_classes)`.
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    features: Vec<f32>,
    feature_dim: usize,
    labels: Vec<u32>,
    num_classes: usize,
}

impl LabeledDataset {
    /// Build a dataset from flat features and labels.
    ///
    /// `features.len()` must equal `labels.len() * feature_dim`, and every
    /// label must lie in `[0, num_classes)`.
    pub fn new(
        features: Vec<f32>,
        feature_dim: usize,
        labels: Vec<u32>,
        num_classes: usize,
    ) -> Result<Self> {
        if feature_dim == 0 {
            bail!("feature_dim must be > 0");
        }
        if features.len() != labels.len() * feature_dim {
            bail!(
                "feature buffer holds {} values, expected {} ({} samples x {} features)",
                features.len(),
                labels.len() * feature_dim,
                labels.len(),
                feature_dim
            );
        }
        if let Some(&bad) = labels.iter().find(|&&l| l as usize >= num_classes) {
            bail!("label {} out of range for {} classes", bad, num_classes);
        }
        Ok(Self {
            features,
            feature_dim,
            labels,
            num_classes,
        })
    }

    /// A deterministic synthetic classification dataset.
    ///
    /// Each class gets a distinct mean vector and samples are drawn from a
    /// Gaussian around it, so the classes are linearly separable and a
    /// simple model can actually learn them. Labels cycle through the
    /// classes so every class is populated.
    pub fn synthetic(n: usize, feature_dim: usize, num_classes: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0f32, 0.3).unwrap();

        let mut features = Vec::with_capacity(n * feature_dim);
        let mut labels = Vec::with_capacity(n);
        for _ in 0..n {
            let label = rng.gen_range(0..num_classes as u32);
            for j in 0..feature_dim {
                // class mean: +1 on dimensions congruent to the label, -1 elsewhere
                let mean = if j % num_classes == label as usize {
                    1.0
                } else {
                    -1.0
                };
                features.push(mean + noise.sample(&mut rng));
            }
            labels.push(label);
        }

        Self {
            features,
            feature_dim,
            labels,
            num_classes,
        }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Feature vector length per sample.
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    /// Size of the label alphabet.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// The feature vector of sample `i`.
    pub fn feature(&self, i: usize) -> &[f32] {
        let start = i * self.feature_dim;
        &self.features[start..start + self.feature_dim]
    }

    /// The label of sample `i`.
    pub fn label(&self, i: usize) -> u32 {
        self.labels[i]
    }

    /// All labels, in sample order.
    pub fn labels(&self) -> &[u32] {
        &self.labels
    }

    /// Keep only the first `n` samples (for reduced experiment runs).
    pub fn take(mut self, n: usize) -> Self {
        let n = n.min(self.labels.len());
        self.features.truncate(n * self.feature_dim);
        self.labels.truncate(n);
        self
    }
}
