//! Error types for the preprocessing pipeline.

use thiserror::Error;

/// Result type alias for preprocessing steps.
pub type Result<T> = std::result::Result<T, PreprocessError>;

/// Failures inside the pipeline.
///
/// These never reach callers of [`normalize`](crate::normalize); they are
/// logged and mapped to [`Normalized::NoDigitDetected`](crate::Normalized).
#[derive(Error, Debug)]
pub enum PreprocessError {
    /// The input has zero width or height.
    #[error("Empty image: {width}x{height}")]
    EmptyImage {
        /// Input width.
        width: u32,
        /// Input height.
        height: u32,
    },

    /// A configuration value makes a step impossible.
    #[error("Invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// The digit region collapsed to nothing.
    #[error("Degenerate geometry: {0}")]
    DegenerateGeometry(String),

    /// Building the output tensor failed.
    #[error("Core error: {0}")]
    Core(#[from] vforge_core::CoreError),
}
