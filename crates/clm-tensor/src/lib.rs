//! Dense `f64` matrix and column-vector primitives used by the
//! compositional scoring engine.
//!
//! Everything here is plain safe Rust over contiguous row-major storage.
//! The chart dynamic programs multiply long chains of `exp(-energy)`
//! factors and divide by a partition function, so the element type is
//! `f64` throughout.

pub mod error;
pub mod tensor;

pub use error::{TensorError, TensorResult};
pub use tensor::Tensor;
