//! Named layers of the digit classifier.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Identifier of a layer whose output the explanation engine can observe.
///
/// The set is fixed by the model contract: three convolutional stages, the
/// first dense layer and the softmax output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerName {
    /// First convolutional stage, pooled to 14×14×32.
    Conv1,
    /// Second convolutional stage, pooled to 7×7×64.
    Conv2,
    /// Third convolutional stage, 7×7×128. Absent from legacy models.
    Conv3,
    /// First dense layer, 256 units.
    Dense1,
    /// Class probabilities, 10 units.
    Predictions,
}

impl LayerName {
    /// All layer identifiers in forward order.
    pub const ALL: [LayerName; 5] = [
        LayerName::Conv1,
        LayerName::Conv2,
        LayerName::Conv3,
        LayerName::Dense1,
        LayerName::Predictions,
    ];

    /// Layers every model artifact must expose.
    pub const REQUIRED: [LayerName; 4] = [
        LayerName::Conv1,
        LayerName::Conv2,
        LayerName::Dense1,
        LayerName::Predictions,
    ];

    /// The canonical string form used in artifacts and on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LayerName::Conv1 => "conv1",
            LayerName::Conv2 => "conv2",
            LayerName::Conv3 => "conv3",
            LayerName::Dense1 => "dense1",
            LayerName::Predictions => "predictions",
        }
    }

    /// Whether the layer produces a spatial `(channels, height, width)` map.
    #[must_use]
    pub const fn is_spatial(self) -> bool {
        matches!(self, LayerName::Conv1 | LayerName::Conv2 | LayerName::Conv3)
    }

    /// Expected output shape without the batch dimension.
    ///
    /// Spatial layers are `[channels, height, width]`, dense layers `[units]`.
    #[must_use]
    pub fn output_shape(self) -> Vec<usize> {
        match self {
            LayerName::Conv1 => vec![32, 14, 14],
            LayerName::Conv2 => vec![64, 7, 7],
            LayerName::Conv3 => vec![128, 7, 7],
            LayerName::Dense1 => vec![256],
            LayerName::Predictions => vec![10],
        }
    }
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LayerName {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LayerName::ALL
            .into_iter()
            .find(|layer| layer.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownLayer(s.to_string()))
    }
}
