//! # fedsim-quant
//!
//! Quantized parameter transfer for fedsim:
//! - [`QuantScheme`] / [`Payload`] — the quantization codec (identity,
//!   reduced-precision float, affine 8-bit integer)
//! - [`wire`] — the concrete wire representation of a payload
//! - [`bits`] — transfer-cost measurement over that representation

pub mod bits;
pub mod codec;
pub mod wire;

pub use bits::{model_size_in_bits, payload_size_in_bits};
pub use codec::{HalfTensor, Int8Tensor, Payload, QuantScheme};
pub use wire::{deserialize_payload, load_payload, save_payload, serialize_payload};
