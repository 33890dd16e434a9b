//! Error types for the explanation engine.

use thiserror::Error;
use vforge_core::{CoreError, LayerName};
use vforge_models::ModelError;

/// Result type alias using [`ExplainError`].
pub type Result<T> = std::result::Result<T, ExplainError>;

/// The caller asked for an explanation the model cannot provide.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidTargetError {
    /// The layer is not part of this model.
    #[error("Target layer `{0}` is not present in the model")]
    MissingLayer(LayerName),

    /// Grad-CAM needs a layer with a spatial output.
    #[error("Target layer `{0}` has no spatial output")]
    NotSpatial(LayerName),

    /// The class index exceeds the number of model outputs.
    #[error("Class index {class_index} out of range for {n_classes} classes")]
    ClassOutOfRange {
        /// Requested class.
        class_index: usize,
        /// Number of classes the model predicts.
        n_classes: usize,
    },
}

/// Errors raised by the explanation engine.
#[derive(Error, Debug)]
pub enum ExplainError {
    /// Invalid layer or class; a caller error.
    #[error(transparent)]
    InvalidTarget(#[from] InvalidTargetError),

    /// The class score was NaN or infinite, so no gradient was taken.
    #[error("Class score is not finite: {0}")]
    NonFiniteScore(f32),

    /// The backward pass produced no gradient for the target layer.
    #[error("No gradient reached layer `{0}`")]
    MissingGradient(LayerName),

    /// Tensor conversion failed.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// Any other model failure.
    #[error("Model error: {0}")]
    Model(ModelError),
}

impl From<ModelError> for ExplainError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::MissingLayer(layer) => InvalidTargetError::MissingLayer(layer).into(),
            ModelError::NotSpatial(layer) => InvalidTargetError::NotSpatial(layer).into(),
            other => ExplainError::Model(other),
        }
    }
}

impl ExplainError {
    /// Whether the error was caused by the request rather than the engine.
    pub fn is_invalid_target(&self) -> bool {
        matches!(self, ExplainError::InvalidTarget(_))
    }
}
