//! # vforge
//!
//! Handwritten digit normalization and CNN explainability in Rust.
//!
//! visionforge turns a freehand digit drawing into the canonical 28×28
//! classifier input and explains what a convolutional digit classifier sees:
//!
//! - **Preprocessing**: polarity detection, CLAHE, Otsu/adaptive binarization,
//!   component filtering, MNIST-style fitting and mass centering
//! - **Models**: the `DigitCnn` architecture and validated model artifacts
//! - **Explainability**: per-layer activations, Grad-CAM heatmaps, overlays
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use vforge::prelude::*;
//!
//! let image = image::open("drawing.png")?;
//! let tensor = normalize(&image).into_tensor();
//!
//! let device = Default::default();
//! let engine = ExplanationEngine::<Autodiff<NdArray>>::from_artifact("model/", &device)?;
//! let explanation = engine.explain(&tensor, None)?;
//! let picture = overlay(&image, &explanation.heatmap, &OverlayOptions::default());
//! ```
//!
//! ## Feature Flags
//!
//! - `backend-ndarray` (default): CPU backend using ndarray

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Re-export all crates
pub use vforge_core as core;
pub use vforge_explain as explain;
pub use vforge_models as models;
pub use vforge_preprocess as preprocess;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use vforge::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use vforge_core::{CanonicalTensor, LayerName, CANVAS_SIZE};

    #[cfg(feature = "backend-ndarray")]
    pub use vforge_core::backend::NdArray;

    // Preprocessing
    pub use vforge_preprocess::{
        normalize, normalize_with, DigitNormalizer, Normalized, PipelineConfig,
    };

    // Models
    pub use vforge_models::{load_model, save_model, DigitCnn, DigitCnnConfig, ModelError};

    // Explain
    pub use vforge_explain::{
        overlay, Autodiff, Colormap, ExplainError, Explanation, ExplanationEngine, GradCamConfig,
        Heatmap, InvalidTargetError, LayerActivationSet, OverlayOptions, Prediction,
    };
}
