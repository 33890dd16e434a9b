//! # vforge_preprocess
//!
//! Normalization of freehand digit drawings into canonical classifier input.
//!
//! This crate provides:
//! - [`normalize`] / [`normalize_with`]: raw image in, [`Normalized`] out
//! - [`DigitNormalizer`], the configurable pipeline object
//! - The individual steps (contrast, thresholding, morphology, geometry,
//!   centering) for callers that want to inspect intermediate results
//!
//! ## Pipeline
//!
//! 1. BT.601 grayscale, then invert if the modal intensity is light
//! 2. CLAHE (clip 2.0, 4×4 tiles)
//! 3. Otsu, falling back to an adaptive threshold when the foreground
//!    fraction leaves `[0.01, 0.9]`
//! 4. Keep the largest 8-connected component; fewer than 10 pixels means no
//!    digit
//! 5. Closing with a 3×3 cross to bridge stroke gaps
//! 6. Padded bounding box, fitted into a 20×20 cell, pasted on a 28×28 canvas
//! 7. Center of mass moved to (13.5, 13.5)
//! 8. 3×3 Gaussian blur, stretch to full range, scale to `[0, 1]`
//!
//! ## Example
//!
//! ```rust,ignore
//! use vforge_preprocess::{normalize, Normalized};
//!
//! let image = image::open("digit.png")?;
//! match normalize(&image) {
//!     Normalized::Digit(tensor) => println!("centroid {:?}", tensor.centroid()),
//!     Normalized::NoDigitDetected => println!("nothing drawn"),
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod centering;
pub mod components;
mod config;
pub mod contrast;
mod error;
pub mod filter;
pub mod geometry;
pub mod morphology;
mod pipeline;
pub mod threshold;

pub use config::PipelineConfig;
pub use error::{PreprocessError, Result};
pub use pipeline::{normalize, normalize_with, DigitNormalizer, Normalized};
