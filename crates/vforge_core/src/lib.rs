//! # vforge_core
//!
//! Core types shared by the visionforge crates.
//!
//! This crate provides:
//! - [`CanonicalTensor`], the fixed `(1, 28, 28, 1)` classifier input
//! - [`LayerName`], the identifiers of the observable model layers
//! - Error types and backend aliases
//!
//! ## Layout Convention
//!
//! The canonical tensor is stored NHWC, matching the MNIST-style contract:
//! - `N`: batch, always 1
//! - `H`, `W`: 28 × 28 pixels
//! - `C`: one grayscale channel
//!
//! Model tensors follow burn's NCHW convention; [`CanonicalTensor::to_tensor`]
//! performs the conversion.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod layer;
mod tensor;

pub use error::{CoreError, Result};
pub use layer::LayerName;
pub use tensor::{CanonicalTensor, CANONICAL_SHAPE, CANVAS_CENTER, CANVAS_SIZE};

/// Backend type aliases for convenience
pub mod backend {
    #[cfg(feature = "backend-ndarray")]
    pub use burn_ndarray::NdArray;
}
