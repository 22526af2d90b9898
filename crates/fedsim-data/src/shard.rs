// Shard — an index-defined subset of a dataset assigned to one client

use crate::dataset::LabeledDataset;

/// A named subset of a dataset, stored as indices into the root collection.
///
/// Indices always refer to the original collection, never to another shard:
/// when a validation split precedes client partitioning, the partitioner
/// resolves everything down to root indices before building shards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Shard {
    indices: Vec<usize>,
}

impl Shard {
    /// A shard over the given root indices.
    pub fn new(indices: Vec<usize>) -> Self {
        Self { indices }
    }

    /// A shard covering `0..len` (e.g. a whole held-out test set).
    pub fn full(len: usize) -> Self {
        Self {
            indices: (0..len).collect(),
        }
    }

    /// Number of samples in the shard.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// Whether the shard holds no samples.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// The root-collection indices.
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Append indices to the shard (used by the mixed-mode partitioner).
    pub fn extend(&mut self, more: impl IntoIterator<Item = usize>) {
        self.indices.extend(more);
    }
}

/// A borrowed view of the samples a shard selects from a dataset.
#[derive(Debug, Clone, Copy)]
pub struct ShardView<'a> {
    data: &'a LabeledDataset,
    shard: &'a Shard,
}

impl<'a> ShardView<'a> {
    pub fn new(data: &'a LabeledDataset, shard: &'a Shard) -> Self {
        Self { data, shard }
    }

    /// Number of samples visible through the view.
    pub fn len(&self) -> usize {
        self.shard.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.shard.is_empty()
    }

    /// Feature-vector length per sample.
    pub fn feature_dim(&self) -> usize {
        self.data.feature_dim()
    }

    /// Size of the label alphabet of the underlying collection.
    pub fn num_classes(&self) -> usize {
        self.data.num_classes()
    }

    /// The feature vector of the view's `i`-th sample.
    pub fn feature(&self, i: usize) -> &'a [f32] {
        self.data.feature(self.shard.indices()[i])
    }

    /// The label of the view's `i`-th sample.
    pub fn label(&self, i: usize) -> u32 {
        self.data.label(self.shard.indices()[i])
    }
}
