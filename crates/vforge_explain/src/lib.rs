//! # vforge_explain
//!
//! Explainability for the visionforge digit classifier.
//!
//! This crate provides:
//! - Per-layer activation capture ([`LayerActivationSet`])
//! - Grad-CAM heatmaps for convolutional layers ([`grad_cam`])
//! - Heatmap colorization and overlays ([`overlay`])
//! - Grayscale renderings of feature maps ([`render`])
//! - [`ExplanationEngine`], a cloneable read-only service over one model
//!
//! ## Grad-CAM
//!
//! For a target class `c` and convolutional layer `A` with `K` channels:
//!
//! ```text
//! α_k = mean_{i,j} ∂p_c / ∂A_k[i,j]
//! L   = ReLU(Σ_k α_k · A_k)
//! H   = L / max(max(L), ε)
//! ```
//!
//! where `p_c` is the softmax probability of class `c`. Gradients are taken
//! with respect to the layer output only; [`GradientTape`] runs on a
//! `no_grad` view of the model, so weights are never tracked.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

mod activation;
mod engine;
mod error;
mod gradcam;
pub mod overlay;
pub mod render;

pub use activation::{first_row, to_array4, LayerActivation, LayerActivationSet};
pub use engine::{Explanation, ExplanationEngine, Prediction};
pub use error::{ExplainError, InvalidTargetError, Result};
pub use gradcam::{
    argmax, grad_cam, normalize_cam, weighted_cam, GradCamConfig, GradientTape, Heatmap,
};
pub use overlay::{overlay, Colormap, OverlayOptions};

/// Autodiff backend wrapper required by [`ExplanationEngine`].
pub use burn_autodiff::Autodiff;
