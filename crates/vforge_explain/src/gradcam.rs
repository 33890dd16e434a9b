//! Gradient-weighted class activation mapping.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vforge_core::{CoreError, LayerName};
use vforge_models::DigitCnn;

use crate::error::{ExplainError, InvalidTargetError, Result};

/// Grad-CAM settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GradCamConfig {
    /// Layer whose output is explained when the caller does not choose one.
    pub target_layer: LayerName,
    /// Floor for the normalization divisor.
    pub epsilon: f32,
}

impl Default for GradCamConfig {
    fn default() -> Self {
        Self {
            target_layer: LayerName::Conv2,
            epsilon: 1e-7,
        }
    }
}

/// A class-discriminative localization map at a layer's spatial resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Heatmap {
    values: Array2<f32>,
    layer: LayerName,
    class_index: usize,
}

impl Heatmap {
    /// Wrap precomputed values. Values are clamped to `[0, 1]`.
    pub fn new(mut values: Array2<f32>, layer: LayerName, class_index: usize) -> Self {
        values.mapv_inplace(|v| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) });
        Self {
            values,
            layer,
            class_index,
        }
    }

    /// Map values, `[height, width]`, each in `[0, 1]`.
    pub fn values(&self) -> &Array2<f32> {
        &self.values
    }

    /// Consume and return the values.
    pub fn into_values(self) -> Array2<f32> {
        self.values
    }

    /// Layer the map was computed at.
    pub fn layer(&self) -> LayerName {
        self.layer
    }

    /// Class the map explains.
    pub fn class_index(&self) -> usize {
        self.class_index
    }

    /// `(height, width)`.
    pub fn dims(&self) -> (usize, usize) {
        self.values.dim()
    }

    /// Largest value.
    pub fn max(&self) -> f32 {
        self.values.iter().copied().fold(0.0, f32::max)
    }

    /// Whether every value is zero.
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }
}

/// Channel-weighted, rectified activation map.
///
/// Gradients are averaged over height and width to give one weight per
/// channel; the activation channels are summed with those weights and
/// negative values are clamped to zero.
///
/// # Arguments
///
/// * `activation` - Layer output `[1, channels, height, width]`
/// * `gradients` - Gradient of the class score w.r.t. `activation`
///
/// # Returns
///
/// Unnormalized map `[height, width]`.
pub fn weighted_cam<B: Backend>(activation: Tensor<B, 4>, gradients: Tensor<B, 4>) -> Tensor<B, 2> {
    let [_, _, height, width] = activation.dims();

    // Global average pool the gradients: (1, C, H, W) -> (1, C, 1, 1)
    let weights = gradients.mean_dim(3).mean_dim(2);

    // Sum across channels: (1, C, H, W) -> (1, 1, H, W)
    let cam = (activation * weights).sum_dim(1);

    cam.clamp_min(0.0).reshape([height, width])
}

/// Scale a rectified map so its maximum becomes 1.
///
/// Non-finite and negative cells count as zero. The divisor is floored at
/// `epsilon`, so an all-zero map stays all-zero.
pub fn normalize_cam(mut cam: Array2<f32>, epsilon: f32) -> Array2<f32> {
    cam.mapv_inplace(|v| if v.is_finite() { v.max(0.0) } else { 0.0 });
    let max = cam.iter().copied().fold(0.0f32, f32::max);
    let divisor = max.max(epsilon);
    cam.mapv_inplace(|v| (v / divisor).clamp(0.0, 1.0));
    cam
}

/// One recorded forward pass, good for exactly one backward pass.
///
/// The target layer's output is cut from the graph and re-entered as a leaf,
/// so the backward pass yields its gradient directly. Dropping the tape
/// releases the recorded graph; [`GradientTape::backward`] consumes it.
pub struct GradientTape<B: AutodiffBackend> {
    layer: LayerName,
    activation: Tensor<B, 4>,
    probabilities: Tensor<B, 2>,
}

impl<B: AutodiffBackend> GradientTape<B> {
    /// Run `input` through `model`, tracking the output of `layer`.
    ///
    /// The pass runs on a `no_grad` view of the model, so only the layer
    /// output is tracked.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidTargetError`] if `layer` is absent or not spatial.
    pub fn record(model: &DigitCnn<B>, input: Tensor<B, 4>, layer: LayerName) -> Result<Self> {
        let model = model.clone().no_grad();
        let activation = model.forward_until(input, layer)?.detach().require_grad();
        let probabilities = model.forward_from(layer, activation.clone())?;
        Ok(Self {
            layer,
            activation,
            probabilities,
        })
    }

    /// Class probabilities of the recorded pass, `[1, n_classes]`.
    pub fn probabilities(&self) -> Tensor<B::InnerBackend, 2> {
        self.probabilities.clone().inner()
    }

    /// Backpropagate the probability of `class_index` into the target layer.
    ///
    /// Returns the layer output and its gradient, both detached from the
    /// recording.
    ///
    /// # Errors
    ///
    /// - [`InvalidTargetError::ClassOutOfRange`] for a bad class
    /// - [`ExplainError::NonFiniteScore`] if the score is NaN or infinite
    /// - [`ExplainError::MissingGradient`] if no gradient reaches the layer
    #[allow(clippy::type_complexity)]
    pub fn backward(
        self,
        class_index: usize,
    ) -> Result<(Tensor<B::InnerBackend, 4>, Tensor<B::InnerBackend, 4>)> {
        let [_, n_classes] = self.probabilities.dims();
        if class_index >= n_classes {
            return Err(InvalidTargetError::ClassOutOfRange {
                class_index,
                n_classes,
            }
            .into());
        }

        let score = self
            .probabilities
            .slice([0..1, class_index..class_index + 1])
            .sum();
        let value: f32 = score.clone().into_scalar().elem();
        if !value.is_finite() {
            return Err(ExplainError::NonFiniteScore(value));
        }
        debug!(layer = %self.layer, class_index, score = value, "Backpropagating class score");

        let grads = score.backward();
        let gradient = self
            .activation
            .grad(&grads)
            .ok_or(ExplainError::MissingGradient(self.layer))?;
        Ok((self.activation.inner(), gradient))
    }
}

/// Index of the largest value; the first one wins ties.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Compute a Grad-CAM heatmap.
///
/// `class_index = None` explains the most probable class. The layer must be
/// convolutional and present in `model`.
///
/// # Errors
///
/// Returns [`ExplainError::InvalidTarget`] for an unusable layer or class, and
/// the numeric errors of [`GradientTape::backward`].
pub fn grad_cam<B: AutodiffBackend>(
    model: &DigitCnn<B>,
    input: Tensor<B, 4>,
    target_layer: LayerName,
    class_index: Option<usize>,
    config: &GradCamConfig,
) -> Result<Heatmap> {
    if !target_layer.is_spatial() {
        return Err(InvalidTargetError::NotSpatial(target_layer).into());
    }
    if !model.layer_names().contains(&target_layer) {
        return Err(InvalidTargetError::MissingLayer(target_layer).into());
    }

    let tape = GradientTape::record(model, input, target_layer)?;
    let class_index = match class_index {
        Some(index) => index,
        None => {
            let probs = tape
                .probabilities()
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .map_err(|e| CoreError::TensorData(format!("{e:?}")))?;
            argmax(&probs)
        }
    };

    let (activation, gradients) = tape.backward(class_index)?;
    let cam = weighted_cam(activation, gradients);
    let [height, width] = cam.dims();
    let values = cam
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| CoreError::TensorData(format!("{e:?}")))?;
    let values = Array2::from_shape_vec((height, width), values)
        .map_err(|e| CoreError::TensorData(e.to_string()))?;

    Ok(Heatmap {
        values: normalize_cam(values, config.epsilon),
        layer: target_layer,
        class_index,
    })
}
