//! Per-layer activation capture.

use std::collections::BTreeMap;

use burn::prelude::*;
use ndarray::{Array1, Array4};
use tracing::warn;
use vforge_core::{CoreError, LayerName};
use vforge_models::LayerOutputs;

/// Output of one observable layer.
#[derive(Debug, Clone)]
pub enum LayerActivation<B: Backend> {
    /// Convolutional output, `[batch, channels, height, width]`.
    Spatial(Tensor<B, 4>),
    /// Dense output, `[batch, units]`.
    Dense(Tensor<B, 2>),
}

impl<B: Backend> LayerActivation<B> {
    /// Tensor dimensions.
    pub fn dims(&self) -> Vec<usize> {
        match self {
            LayerActivation::Spatial(t) => t.dims().to_vec(),
            LayerActivation::Dense(t) => t.dims().to_vec(),
        }
    }

    /// The spatial tensor, if this is a convolutional output.
    pub fn as_spatial(&self) -> Option<&Tensor<B, 4>> {
        match self {
            LayerActivation::Spatial(t) => Some(t),
            LayerActivation::Dense(_) => None,
        }
    }

    /// The dense tensor, if this is a dense output.
    pub fn as_dense(&self) -> Option<&Tensor<B, 2>> {
        match self {
            LayerActivation::Dense(t) => Some(t),
            LayerActivation::Spatial(_) => None,
        }
    }
}

/// Activations of every named layer from one forward pass.
///
/// All five names are always present. For a model without `conv3` the
/// `conv2` output is stored under `conv3` as well, and
/// [`conv3_substituted`](Self::conv3_substituted) reports it.
#[derive(Debug, Clone)]
pub struct LayerActivationSet<B: Backend> {
    activations: BTreeMap<LayerName, LayerActivation<B>>,
    conv3_substituted: bool,
}

impl<B: Backend> LayerActivationSet<B> {
    /// Build from a model's layer outputs.
    pub fn from_outputs(outputs: LayerOutputs<B>) -> Self {
        let LayerOutputs {
            conv1,
            conv2,
            conv3,
            dense1,
            predictions,
        } = outputs;

        let conv3_substituted = conv3.is_none();
        if conv3_substituted {
            warn!("Model has no conv3 layer, reporting conv2 activations in its place");
        }
        let conv3 = conv3.unwrap_or_else(|| conv2.clone());

        let mut activations = BTreeMap::new();
        activations.insert(LayerName::Conv1, LayerActivation::Spatial(conv1));
        activations.insert(LayerName::Conv2, LayerActivation::Spatial(conv2));
        activations.insert(LayerName::Conv3, LayerActivation::Spatial(conv3));
        activations.insert(LayerName::Dense1, LayerActivation::Dense(dense1));
        activations.insert(LayerName::Predictions, LayerActivation::Dense(predictions));

        Self {
            activations,
            conv3_substituted,
        }
    }

    /// Get an activation by layer.
    pub fn get(&self, layer: LayerName) -> Option<&LayerActivation<B>> {
        self.activations.get(&layer)
    }

    /// Spatial activation of a convolutional layer.
    pub fn spatial(&self, layer: LayerName) -> Option<&Tensor<B, 4>> {
        self.get(layer).and_then(LayerActivation::as_spatial)
    }

    /// Dense activation of `dense1` or `predictions`.
    pub fn dense(&self, layer: LayerName) -> Option<&Tensor<B, 2>> {
        self.get(layer).and_then(LayerActivation::as_dense)
    }

    /// Get all layer names, in forward order.
    pub fn names(&self) -> Vec<LayerName> {
        self.activations.keys().copied().collect()
    }

    /// Whether `conv3` holds the `conv2` output.
    pub fn conv3_substituted(&self) -> bool {
        self.conv3_substituted
    }

    /// Iterate over `(layer, activation)` pairs in forward order.
    pub fn iter(&self) -> impl Iterator<Item = (LayerName, &LayerActivation<B>)> {
        self.activations.iter().map(|(&name, act)| (name, act))
    }
}

/// Copy a 4D tensor into an `ndarray` array.
///
/// # Errors
///
/// Returns [`CoreError::TensorData`] if the backend cannot produce `f32` data.
pub fn to_array4<B: Backend>(tensor: &Tensor<B, 4>) -> Result<Array4<f32>, CoreError> {
    let [n, c, h, w] = tensor.dims();
    let values = tensor
        .to_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CoreError::TensorData(format!("{e:?}")))?;
    Array4::from_shape_vec((n, c, h, w), values).map_err(|e| CoreError::TensorData(e.to_string()))
}

/// First row of a `[batch, units]` tensor as an `ndarray` vector.
///
/// # Errors
///
/// Returns [`CoreError::TensorData`] if the backend cannot produce `f32` data.
pub fn first_row<B: Backend>(tensor: &Tensor<B, 2>) -> Result<Array1<f32>, CoreError> {
    let [_, units] = tensor.dims();
    let values = tensor
        .clone()
        .slice([0..1, 0..units])
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CoreError::TensorData(format!("{e:?}")))?;
    Ok(Array1::from(values))
}
