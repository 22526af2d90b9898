//! # fedsim-core
//!
//! Core types shared across the fedsim workspace:
//! - [`ParamTensor`] — a flat `f32` buffer with a shape
//! - [`ParamMap`] — an insertion-ordered parameter name → tensor mapping
//! - [`Error`] / [`Result`] — the single workspace error type

pub mod error;
pub mod params;
pub mod tensor;

pub use error::{Error, Result};
pub use params::ParamMap;
pub use tensor::ParamTensor;
