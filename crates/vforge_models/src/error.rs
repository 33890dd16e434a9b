//! Error types for vforge_models.

use thiserror::Error;
use vforge_core::LayerName;

/// Result type alias using [`ModelError`].
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors raised while building, staging, saving or loading a model.
#[derive(Error, Debug)]
pub enum ModelError {
    /// A layer required by the model contract is absent.
    #[error("Model does not expose required layer `{0}`")]
    MissingLayer(LayerName),

    /// Staged execution was requested at a layer without a spatial output.
    #[error("Layer `{0}` is not a convolutional stage")]
    NotSpatial(LayerName),

    /// Metadata and weights disagree, or the architecture breaks the contract.
    #[error("Inconsistent model artifact: {0}")]
    InconsistentArtifact(String),

    /// Weights could not be read.
    #[error("Failed to load model: {0}")]
    Load(String),

    /// Weights could not be written.
    #[error("Failed to save model: {0}")]
    Save(String),

    /// Filesystem error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Metadata could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
