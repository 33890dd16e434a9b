//! # vforge_models
//!
//! The digit classifier and its persisted artifacts.
//!
//! This crate provides:
//! - [`DigitCnn`], a small convolutional network whose observable layers
//!   (`conv1`, `conv2`, `conv3`, `dense1`, `predictions`) have fixed names and
//!   shapes
//! - Staged execution around convolutional layers
//!   ([`DigitCnn::forward_until`] / [`DigitCnn::forward_from`])
//! - Artifact save/load with layer-contract validation at load time

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checkpoint;
mod digit_cnn;
mod error;

pub use checkpoint::{load_model, save_model, save_model_with, ArtifactMetadata};
pub use digit_cnn::{ConvStage, DigitCnn, DigitCnnConfig, DigitCnnRecord, LayerOutputs};
pub use error::{ModelError, Result};
