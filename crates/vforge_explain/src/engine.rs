//! The shared, read-only explanation service.

use std::path::Path;
use std::sync::Arc;

use burn::module::AutodiffModule;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use serde::{Deserialize, Serialize};
use vforge_core::{CanonicalTensor, LayerName};
use vforge_models::{load_model, ArtifactMetadata, DigitCnn, ModelError};

use crate::activation::{first_row, LayerActivationSet};
use crate::error::Result;
use crate::gradcam::{argmax, grad_cam, GradCamConfig, Heatmap};

/// Class prediction for one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Most probable class; the lowest index wins ties.
    pub class_index: usize,
    /// Probability of `class_index`.
    pub confidence: f32,
    /// Probability of every class.
    pub probabilities: Vec<f32>,
}

impl Prediction {
    /// Build from a probability vector.
    pub fn from_probabilities(probabilities: Vec<f32>) -> Self {
        let class_index = argmax(&probabilities);
        let confidence = probabilities.get(class_index).copied().unwrap_or(0.0);
        Self {
            class_index,
            confidence,
            probabilities,
        }
    }
}

/// Prediction plus its Grad-CAM heatmap.
#[derive(Debug, Clone)]
pub struct Explanation {
    /// The model's prediction.
    pub prediction: Prediction,
    /// Heatmap for the requested class, or the predicted one.
    pub heatmap: Heatmap,
}

struct EngineState<B: AutodiffBackend> {
    tracked: DigitCnn<B>,
    inference: DigitCnn<B::InnerBackend>,
    device: B::Device,
    config: GradCamConfig,
    metadata: Option<ArtifactMetadata>,
}

/// Serves activations, predictions and Grad-CAM heatmaps from one model.
///
/// The model is loaded once and never modified; clones share it. Each call
/// is independent: gradient recording is opened and released inside
/// [`grad_cam`](Self::grad_cam) and never outlives it.
///
/// # Example
///
/// ```rust,ignore
/// use burn_autodiff::Autodiff;
/// use vforge_explain::ExplanationEngine;
///
/// let engine = ExplanationEngine::<Autodiff<NdArray>>::from_artifact("model/", &device)?;
/// let explanation = engine.explain(&tensor, None)?;
/// println!("{} ({:.2})", explanation.prediction.class_index, explanation.prediction.confidence);
/// ```
pub struct ExplanationEngine<B: AutodiffBackend> {
    state: Arc<EngineState<B>>,
}

impl<B: AutodiffBackend> Clone for ExplanationEngine<B> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
        }
    }
}

impl<B: AutodiffBackend> std::fmt::Debug for ExplanationEngine<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplanationEngine")
            .field("layers", &self.layer_names())
            .field("config", &self.state.config)
            .finish()
    }
}

impl<B: AutodiffBackend> ExplanationEngine<B> {
    /// Wrap an already-built model.
    pub fn new(model: DigitCnn<B>, device: &B::Device) -> Self {
        Self::build(model, device, GradCamConfig::default(), None)
    }

    /// Load and validate an artifact directory.
    ///
    /// # Errors
    ///
    /// Any [`ModelError`]; in particular [`ModelError::MissingLayer`] when the
    /// artifact does not expose the required layers.
    pub fn from_artifact(
        dir: impl AsRef<Path>,
        device: &B::Device,
    ) -> std::result::Result<Self, ModelError> {
        let (model, metadata) = load_model::<B>(dir, device)?;
        Ok(Self::build(model, device, GradCamConfig::default(), Some(metadata)))
    }

    /// Replace the Grad-CAM settings.
    #[must_use]
    pub fn with_config(self, config: GradCamConfig) -> Self {
        let state = &self.state;
        Self::build(
            state.tracked.clone(),
            &state.device,
            config,
            state.metadata.clone(),
        )
    }

    fn build(
        model: DigitCnn<B>,
        device: &B::Device,
        config: GradCamConfig,
        metadata: Option<ArtifactMetadata>,
    ) -> Self {
        // Weights never need gradients; only the explained layer does.
        let tracked = model.no_grad();
        let inference = tracked.valid();
        Self {
            state: Arc::new(EngineState {
                tracked,
                inference,
                device: device.clone(),
                config,
                metadata,
            }),
        }
    }

    /// Grad-CAM settings in use.
    pub fn config(&self) -> &GradCamConfig {
        &self.state.config
    }

    /// Artifact metadata, when loaded from disk.
    pub fn metadata(&self) -> Option<&ArtifactMetadata> {
        self.state.metadata.as_ref()
    }

    /// Layers the model exposes.
    pub fn layer_names(&self) -> Vec<LayerName> {
        self.state.inference.layer_names()
    }

    /// Class probabilities and the winning class.
    ///
    /// # Errors
    ///
    /// Fails only if tensor data cannot be read back.
    pub fn predict(&self, input: &CanonicalTensor) -> Result<Prediction> {
        let x = input.to_tensor::<B::InnerBackend>(&self.state.device);
        let probs = self.state.inference.forward_probs(x);
        Ok(Prediction::from_probabilities(first_row(&probs)?.to_vec()))
    }

    /// Outputs of every named layer for one forward pass.
    ///
    /// Models without `conv3` report the `conv2` output under that name.
    pub fn activations(&self, input: &CanonicalTensor) -> LayerActivationSet<B::InnerBackend> {
        let x = input.to_tensor::<B::InnerBackend>(&self.state.device);
        LayerActivationSet::from_outputs(self.state.inference.forward_layers(x))
    }

    /// Grad-CAM heatmap at `target_layer` for `class_index`, or for the
    /// predicted class when `None`.
    ///
    /// # Errors
    ///
    /// [`ExplainError::InvalidTarget`](crate::ExplainError::InvalidTarget) for
    /// a missing or non-convolutional layer or an out-of-range class.
    pub fn grad_cam(
        &self,
        input: &CanonicalTensor,
        target_layer: LayerName,
        class_index: Option<usize>,
    ) -> Result<Heatmap> {
        let x = input.to_tensor::<B>(&self.state.device);
        grad_cam(
            &self.state.tracked,
            x,
            target_layer,
            class_index,
            &self.state.config,
        )
    }

    /// Predict, then explain at the configured default layer.
    ///
    /// # Errors
    ///
    /// Same as [`grad_cam`](Self::grad_cam).
    pub fn explain(&self, input: &CanonicalTensor, class_index: Option<usize>) -> Result<Explanation> {
        let prediction = self.predict(input)?;
        let target = class_index.unwrap_or(prediction.class_index);
        let heatmap = self.grad_cam(input, self.state.config.target_layer, Some(target))?;
        Ok(Explanation {
            prediction,
            heatmap,
        })
    }
}
