//! # fedsim
//!
//! A federated-learning round simulator: a coordinator and a fixed set of
//! clients iteratively exchange model parameters, client data is
//! partitioned IID or by disjoint label groups, and transfers are
//! optionally quantized with bit-level accounting of the savings.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `fedsim-core` | `ParamTensor`, `ParamMap`, the workspace error type |
//! | `fedsim-data` | Labeled collections, shards, IID/non-IID partitioning, MNIST |
//! | `fedsim-quant` | Quantization codec, wire format, bit accounting |
//!
//! ## Modules
//!
//! - [`aggregate`] — unweighted elementwise model averaging
//! - [`round`] — clients, coordinator, the round state machine, and the
//!   experiment record
//! - [`trainer`] — the bundled dense-classifier collaborator

/// Re-export core types.
pub use fedsim_core::{Error, ParamMap, ParamTensor, Result};

/// Re-export data handling.
pub use fedsim_data::{
    load as load_dataset, partition, DatasetKind, LabeledDataset, Partition, PartitionConfig,
    Shard, ShardView, SplitMode, DATA_DIR_ENV,
};

/// Re-export the quantization layer.
pub use fedsim_quant::{
    deserialize_payload, load_payload, model_size_in_bits, payload_size_in_bits, save_payload,
    serialize_payload, Payload, QuantScheme,
};

/// Model aggregation — elementwise mean across clients.
pub mod aggregate;

/// Round orchestration — the federated round state machine.
pub mod round;

/// Reference collaborator — dense classifier with mini-batch SGD.
pub mod trainer;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::aggregate::average_models;
    pub use crate::round::{
        BitsRecord, Client, Coordinator, Evaluator, ExperimentState, Federation, LocalOpts,
        LocalTrainer, RoundConfig, RunSummary, StepMetrics,
    };
    pub use crate::trainer::DenseClassifier;
    pub use crate::{
        partition, LabeledDataset, ParamMap, ParamTensor, Partition, PartitionConfig, Payload,
        QuantScheme, Shard, ShardView, SplitMode,
    };
}
