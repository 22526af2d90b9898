//! # fedsim-data
//!
//! Sample collections, shards, and client partitioning for fedsim.
//!
//! This crate provides:
//! - [`LabeledDataset`] — an immutable `(features, labels)` collection
//! - [`Shard`] / [`ShardView`] — index-defined client subsets, always
//!   resolved down to root-collection indices
//! - [`partition`] — IID, non-IID, and mixed client splitting with
//!   reproducible seeding
//! - [`mnist`] — the MNIST IDX parser and the dataset provider with an
//!   environment-overridable storage root

pub mod dataset;
pub mod mnist;
pub mod partition;
pub mod shard;

pub use dataset::LabeledDataset;
pub use mnist::{load, DatasetKind, MnistSplit, DATA_DIR_ENV};
pub use partition::{partition, Partition, PartitionConfig, SplitMode};
pub use shard::{Shard, ShardView};
