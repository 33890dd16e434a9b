//! Error types for vforge_core.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur in vforge_core operations.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid tensor shape provided.
    #[error("Invalid shape: expected {expected}, got {got}")]
    InvalidShape {
        /// Expected shape description.
        expected: String,
        /// Actual shape description.
        got: String,
    },

    /// A layer identifier that is not part of the model contract.
    #[error("Unknown layer `{0}` (expected one of conv1, conv2, conv3, dense1, predictions)")]
    UnknownLayer(String),

    /// Tensor data could not be read back from the backend.
    #[error("Tensor data error: {0}")]
    TensorData(String),
}
