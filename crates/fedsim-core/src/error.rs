/// All errors that can occur within fedsim.
///
/// A single error type is shared across the workspace so that partitioning,
/// codec, aggregation, and orchestration failures propagate through one
/// `Result` alias.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A label-range boundary has no matching element in the sorted label
    /// sequence. Non-fatal: the affected client receives an empty shard,
    /// but the condition is surfaced because it indicates a misconfigured
    /// client/class ratio.
    #[error("label {label} not found in sorted label sequence")]
    LabelNotFound { label: u32 },

    /// Two parameter mappings disagree on the shape of a shared key.
    #[error("shape mismatch for parameter {name:?}: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// Two parameter mappings have different key sets.
    #[error("parameter key sets differ: {0}")]
    KeyMismatch(String),

    /// An aggregation was requested over zero models.
    #[error("cannot average an empty sequence of models")]
    EmptyInput,

    /// An encode step found a value range no finite scale can cover.
    #[error("degenerate quantization range: {0}")]
    QuantizationRange(String),

    /// Element count mismatch when building a tensor from a flat vec.
    #[error("element count mismatch: shape {shape:?} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Vec<usize>,
        expected: usize,
        got: usize,
    },

    /// A serialized payload failed structural validation.
    #[error("invalid payload format: {0}")]
    InvalidFormat(String),

    /// I/O failure while reading or writing durable artifacts.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }
}

/// Convenience Result type used throughout fedsim.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
