//! Convolutional digit classifier with named, observable layers.
//!
//! The architecture is fixed by the explanation contract: every layer the
//! explanation engine observes has a stable name and shape, and the network
//! can be run in two stages around any convolutional layer so gradients can
//! be taken with respect to that layer's output.

use burn::nn::{
    conv::{Conv2d, Conv2dConfig},
    pool::{MaxPool2d, MaxPool2dConfig},
    BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
};
use burn::prelude::*;
use burn::tensor::activation::softmax;
use serde::{Deserialize, Serialize};
use vforge_core::{LayerName, CANVAS_SIZE};

use crate::error::{ModelError, Result};

/// Configuration for [`DigitCnn`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DigitCnnConfig {
    /// Filters of `conv1`, `conv2` and `conv3`.
    pub conv_filters: [usize; 3],
    /// Units of `dense1` and the hidden `dense2` layer.
    pub dense_units: [usize; 2],
    /// Number of output classes.
    pub n_classes: usize,
    /// Include the third convolutional stage. Legacy artifacts lack it.
    pub with_conv3: bool,
    /// Batch-norm variance epsilon.
    pub bn_epsilon: f64,
}

impl Default for DigitCnnConfig {
    fn default() -> Self {
        Self {
            conv_filters: [32, 64, 128],
            dense_units: [256, 128],
            n_classes: 10,
            with_conv3: true,
            bn_epsilon: 1e-3,
        }
    }
}

impl DigitCnnConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration of a legacy model without `conv3`.
    #[must_use]
    pub fn legacy() -> Self {
        Self {
            with_conv3: false,
            ..Self::default()
        }
    }

    /// Set whether `conv3` is present.
    #[must_use]
    pub fn with_conv3(mut self, with_conv3: bool) -> Self {
        self.with_conv3 = with_conv3;
        self
    }

    /// Layers this configuration exposes, in forward order.
    pub fn layers(&self) -> Vec<LayerName> {
        LayerName::ALL
            .into_iter()
            .filter(|&layer| layer != LayerName::Conv3 || self.with_conv3)
            .collect()
    }

    /// Output shape of `layer` without the batch dimension, or `None` if the
    /// layer is not present.
    pub fn output_shape(&self, layer: LayerName) -> Option<Vec<usize>> {
        let pooled = CANVAS_SIZE / 4;
        match layer {
            LayerName::Conv1 => Some(vec![self.conv_filters[0], CANVAS_SIZE / 2, CANVAS_SIZE / 2]),
            LayerName::Conv2 => Some(vec![self.conv_filters[1], pooled, pooled]),
            LayerName::Conv3 if self.with_conv3 => Some(vec![self.conv_filters[2], pooled, pooled]),
            LayerName::Conv3 => None,
            LayerName::Dense1 => Some(vec![self.dense_units[0]]),
            LayerName::Predictions => Some(vec![self.n_classes]),
        }
    }

    /// Check every exposed layer against the shapes the explanation engine
    /// relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InconsistentArtifact`] for the first mismatch.
    pub fn check_contract(&self) -> Result<()> {
        for layer in self.layers() {
            let actual = self.output_shape(layer).unwrap_or_default();
            let expected = layer.output_shape();
            if actual != expected {
                return Err(ModelError::InconsistentArtifact(format!(
                    "layer `{layer}` has shape {actual:?}, contract requires {expected:?}"
                )));
            }
        }
        Ok(())
    }

    /// Width of the flattened feature map feeding `dense1`.
    pub fn flatten_size(&self) -> usize {
        let [_, f2, f3] = self.conv_filters;
        let filters = if self.with_conv3 { f3 } else { f2 };
        let pooled = CANVAS_SIZE / 4;
        filters * pooled * pooled
    }

    /// Initialize the model with fresh weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> DigitCnn<B> {
        DigitCnn::new(self, device)
    }
}

/// Conv2d -> BatchNorm -> ReLU, optionally followed by 2×2 max pooling.
#[derive(Module, Debug)]
pub struct ConvStage<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
    pool: Option<MaxPool2d>,
}

impl<B: Backend> ConvStage<B> {
    /// Create a stage with a 3×3 same-padded convolution.
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        pooled: bool,
        epsilon: f64,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);
        let bn = BatchNormConfig::new(out_channels)
            .with_epsilon(epsilon)
            .init(device);
        let pool = pooled.then(|| MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init());

        Self { conv, bn, pool }
    }

    /// Forward pass.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(x);
        let out = batch_norm_inference(&self.bn, out);
        let out = Relu::new().forward(out);
        match &self.pool {
            Some(pool) => pool.forward(out),
            None => out,
        }
    }
}

/// Batch normalization with the stored running statistics.
///
/// burn's `BatchNorm::forward` switches to batch statistics whenever the
/// backend tracks gradients; explanations must see the trained statistics
/// regardless of backend.
fn batch_norm_inference<B: Backend>(bn: &BatchNorm<B, 2>, x: Tensor<B, 4>) -> Tensor<B, 4> {
    let gamma = bn.gamma.val();
    let channels = gamma.dims()[0];
    let shape = [1, channels, 1, 1];

    let mean = bn.running_mean.value().reshape(shape);
    let var = bn.running_var.value().reshape(shape);
    let std = var.add_scalar(bn.epsilon).sqrt();

    x.sub(mean)
        .div(std)
        .mul(gamma.reshape(shape))
        .add(bn.beta.val().reshape(shape))
}

/// Outputs of every observable layer for one forward pass.
#[derive(Debug, Clone)]
pub struct LayerOutputs<B: Backend> {
    /// `conv1`, shape `[batch, 32, 14, 14]`.
    pub conv1: Tensor<B, 4>,
    /// `conv2`, shape `[batch, 64, 7, 7]`.
    pub conv2: Tensor<B, 4>,
    /// `conv3`, shape `[batch, 128, 7, 7]`; `None` for legacy models.
    pub conv3: Option<Tensor<B, 4>>,
    /// `dense1`, shape `[batch, 256]`.
    pub dense1: Tensor<B, 2>,
    /// Class probabilities, shape `[batch, 10]`.
    pub predictions: Tensor<B, 2>,
}

/// The digit classifier.
///
/// Architecture:
/// - `conv1`: Conv(1→32) → BN → ReLU → MaxPool 2×2
/// - `conv2`: Conv(32→64) → BN → ReLU → MaxPool 2×2
/// - `conv3`: Conv(64→128) → BN → ReLU (optional)
/// - Flatten → `dense1` (256, ReLU) → `dense2` (128, ReLU)
/// - `predictions`: Linear(128→10) → softmax
///
/// Input is NCHW `[batch, 1, 28, 28]` with values in `[0, 1]`.
///
/// # Example
///
/// ```rust,ignore
/// use vforge_models::DigitCnnConfig;
///
/// let model = DigitCnnConfig::new().init::<NdArray>(&device);
/// let probs = model.forward_probs(x);
/// // probs shape: [1, 10]
/// ```
#[derive(Module, Debug)]
pub struct DigitCnn<B: Backend> {
    conv1: ConvStage<B>,
    conv2: ConvStage<B>,
    conv3: Option<ConvStage<B>>,
    dense1: Linear<B>,
    dense2: Linear<B>,
    predictions: Linear<B>,
}

impl<B: Backend> DigitCnn<B> {
    /// Create a new model.
    pub fn new(config: &DigitCnnConfig, device: &B::Device) -> Self {
        let [f1, f2, f3] = config.conv_filters;
        let eps = config.bn_epsilon;

        let conv1 = ConvStage::new(1, f1, true, eps, device);
        let conv2 = ConvStage::new(f1, f2, true, eps, device);
        let conv3 = config
            .with_conv3
            .then(|| ConvStage::new(f2, f3, false, eps, device));

        let flat = config.flatten_size();

        let [d1, d2] = config.dense_units;
        let dense1 = LinearConfig::new(flat, d1).init(device);
        let dense2 = LinearConfig::new(d1, d2).init(device);
        let predictions = LinearConfig::new(d2, config.n_classes).init(device);

        Self {
            conv1,
            conv2,
            conv3,
            dense1,
            dense2,
            predictions,
        }
    }

    /// Whether the third convolutional stage is present.
    pub fn has_conv3(&self) -> bool {
        self.conv3.is_some()
    }

    /// Check that the weights have the shapes `config` describes.
    ///
    /// Loading a record never resizes parameters, so a record saved from a
    /// different architecture only shows up here.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::InconsistentArtifact`] naming the first
    /// parameter whose shape differs.
    pub fn check_shapes(&self, config: &DigitCnnConfig) -> Result<()> {
        if self.has_conv3() != config.with_conv3 {
            return Err(ModelError::InconsistentArtifact(format!(
                "weights {} conv3 but config has with_conv3 = {}",
                if self.has_conv3() { "include" } else { "omit" },
                config.with_conv3
            )));
        }

        let [f1, f2, f3] = config.conv_filters;
        let [d1, d2] = config.dense_units;
        let mut params = vec![
            ("conv1", self.conv1.conv.weight.dims().to_vec(), vec![f1, 1, 3, 3]),
            ("conv2", self.conv2.conv.weight.dims().to_vec(), vec![f2, f1, 3, 3]),
            ("dense1", self.dense1.weight.dims().to_vec(), vec![config.flatten_size(), d1]),
            ("dense2", self.dense2.weight.dims().to_vec(), vec![d1, d2]),
            ("predictions", self.predictions.weight.dims().to_vec(), vec![d2, config.n_classes]),
        ];
        if let Some(conv3) = &self.conv3 {
            params.push(("conv3", conv3.conv.weight.dims().to_vec(), vec![f3, f2, 3, 3]));
        }

        for (name, actual, expected) in params {
            if actual != expected {
                return Err(ModelError::InconsistentArtifact(format!(
                    "`{name}` weight has shape {actual:?}, config requires {expected:?}"
                )));
            }
        }
        Ok(())
    }

    /// Names of the layers this model exposes, in forward order.
    pub fn layer_names(&self) -> Vec<LayerName> {
        LayerName::ALL
            .into_iter()
            .filter(|&layer| layer != LayerName::Conv3 || self.has_conv3())
            .collect()
    }

    /// Device holding the weights.
    pub fn device(&self) -> B::Device {
        self.predictions.weight.device()
    }

    /// Forward pass returning logits `[batch, n_classes]`.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let out = self.conv1.forward(x);
        let out = self.conv2.forward(out);
        let out = match &self.conv3 {
            Some(conv3) => conv3.forward(out),
            None => out,
        };
        self.head_logits(out)
    }

    /// Forward pass returning probabilities.
    pub fn forward_probs(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward(x), 1)
    }

    /// Forward pass capturing every observable layer.
    pub fn forward_layers(&self, x: Tensor<B, 4>) -> LayerOutputs<B> {
        let conv1 = self.conv1.forward(x);
        let conv2 = self.conv2.forward(conv1.clone());
        let conv3 = self.conv3.as_ref().map(|stage| stage.forward(conv2.clone()));

        let last = conv3.clone().unwrap_or_else(|| conv2.clone());
        let dense1 = self.dense1_forward(last);
        let predictions = softmax(self.tail_logits(dense1.clone()), 1);

        LayerOutputs {
            conv1,
            conv2,
            conv3,
            dense1,
            predictions,
        }
    }

    /// Run the network up to and including the convolutional `layer`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::NotSpatial`] for dense layers and
    /// [`ModelError::MissingLayer`] for `conv3` on a legacy model.
    pub fn forward_until(&self, x: Tensor<B, 4>, layer: LayerName) -> Result<Tensor<B, 4>> {
        match layer {
            LayerName::Conv1 => Ok(self.conv1.forward(x)),
            LayerName::Conv2 => Ok(self.conv2.forward(self.conv1.forward(x))),
            LayerName::Conv3 => {
                let conv3 = self.conv3.as_ref().ok_or(ModelError::MissingLayer(layer))?;
                Ok(conv3.forward(self.conv2.forward(self.conv1.forward(x))))
            }
            LayerName::Dense1 | LayerName::Predictions => Err(ModelError::NotSpatial(layer)),
        }
    }

    /// Resume from the output of the convolutional `layer` to class
    /// probabilities.
    ///
    /// # Errors
    ///
    /// Same conditions as [`DigitCnn::forward_until`].
    pub fn forward_from(&self, layer: LayerName, activation: Tensor<B, 4>) -> Result<Tensor<B, 2>> {
        let last = match layer {
            LayerName::Conv1 => {
                let out = self.conv2.forward(activation);
                match &self.conv3 {
                    Some(conv3) => conv3.forward(out),
                    None => out,
                }
            }
            LayerName::Conv2 => match &self.conv3 {
                Some(conv3) => conv3.forward(activation),
                None => activation,
            },
            LayerName::Conv3 => {
                if self.conv3.is_none() {
                    return Err(ModelError::MissingLayer(layer));
                }
                activation
            }
            LayerName::Dense1 | LayerName::Predictions => {
                return Err(ModelError::NotSpatial(layer))
            }
        };
        Ok(softmax(self.head_logits(last), 1))
    }

    fn dense1_forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let flat: Tensor<B, 2> = features.flatten(1, 3);
        Relu::new().forward(self.dense1.forward(flat))
    }

    fn tail_logits(&self, dense1: Tensor<B, 2>) -> Tensor<B, 2> {
        let out = Relu::new().forward(self.dense2.forward(dense1));
        self.predictions.forward(out)
    }

    fn head_logits(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        self.tail_logits(self.dense1_forward(features))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_autodiff::Autodiff;
    use burn::module::AutodiffModule;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn input<B: Backend>(device: &B::Device) -> Tensor<B, 4> {
        Tensor::random(
            [1, 1, 28, 28],
            burn::tensor::Distribution::Uniform(0.0, 1.0),
            device,
        )
    }

    #[test]
    fn test_config_default() {
        let config = DigitCnnConfig::default();
        assert_eq!(config.conv_filters, [32, 64, 128]);
        assert_eq!(config.dense_units, [256, 128]);
        assert_eq!(config.n_classes, 10);
        assert!(config.with_conv3);
        assert!(config.check_contract().is_ok());
    }

    #[test]
    fn test_config_layers() {
        assert_eq!(DigitCnnConfig::new().layers().len(), 5);
        let legacy = DigitCnnConfig::legacy();
        assert_eq!(legacy.layers().len(), 4);
        assert!(!legacy.layers().contains(&LayerName::Conv3));
        assert!(legacy.check_contract().is_ok());
    }

    #[test]
    fn test_contract_violation() {
        let config = DigitCnnConfig {
            dense_units: [64, 32],
            ..Default::default()
        };
        assert!(matches!(
            config.check_contract(),
            Err(ModelError::InconsistentArtifact(_))
        ));
    }

    #[test]
    fn test_forward_layers_shapes() {
        let device = Default::default();
        let model = DigitCnnConfig::new().init::<TestBackend>(&device);
        let outputs = model.forward_layers(input(&device));

        assert_eq!(outputs.conv1.dims(), [1, 32, 14, 14]);
        assert_eq!(outputs.conv2.dims(), [1, 64, 7, 7]);
        assert_eq!(outputs.conv3.map(|t| t.dims()), Some([1, 128, 7, 7]));
        assert_eq!(outputs.dense1.dims(), [1, 256]);
        assert_eq!(outputs.predictions.dims(), [1, 10]);

        let total: f32 = outputs.predictions.sum().into_scalar();
        assert!((total - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_legacy_model_has_no_conv3() {
        let device = Default::default();
        let model = DigitCnnConfig::legacy().init::<TestBackend>(&device);
        assert!(!model.has_conv3());
        assert_eq!(model.layer_names().len(), 4);

        let outputs = model.forward_layers(input(&device));
        assert!(outputs.conv3.is_none());
        assert_eq!(outputs.predictions.dims(), [1, 10]);

        let err = model.forward_until(input(&device), LayerName::Conv3).unwrap_err();
        assert!(matches!(err, ModelError::MissingLayer(LayerName::Conv3)));
    }

    #[test]
    fn test_staged_forward_matches_full_forward() {
        let device = Default::default();
        let model = DigitCnnConfig::new().init::<TestBackend>(&device);
        let x = input(&device);

        let full: Vec<f32> = model.forward_probs(x.clone()).into_data().to_vec().unwrap();
        for layer in [LayerName::Conv1, LayerName::Conv2, LayerName::Conv3] {
            let act = model.forward_until(x.clone(), layer).unwrap();
            let staged: Vec<f32> = model
                .forward_from(layer, act)
                .unwrap()
                .into_data()
                .to_vec()
                .unwrap();
            for (a, b) in full.iter().zip(&staged) {
                assert!((a - b).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_dense_layers_are_not_stages() {
        let device = Default::default();
        let model = DigitCnnConfig::new().init::<TestBackend>(&device);
        let err = model.forward_until(input(&device), LayerName::Dense1).unwrap_err();
        assert!(matches!(err, ModelError::NotSpatial(LayerName::Dense1)));
    }

    #[test]
    fn test_autodiff_matches_inner_backend() {
        type Ad = Autodiff<TestBackend>;
        let device = Default::default();
        let model = DigitCnnConfig::new().init::<Ad>(&device);
        let x = input::<Ad>(&device);

        let tracked: Vec<f32> = model.forward_probs(x.clone()).into_data().to_vec().unwrap();
        let inner: Vec<f32> = model
            .valid()
            .forward_probs(x.inner())
            .into_data()
            .to_vec()
            .unwrap();
        for (a, b) in tracked.iter().zip(&inner) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_flatten_size() {
        assert_eq!(DigitCnnConfig::new().flatten_size(), 128 * 7 * 7);
        assert_eq!(DigitCnnConfig::legacy().flatten_size(), 64 * 7 * 7);
    }

    #[test]
    fn test_check_shapes() {
        let device = Default::default();
        let full = DigitCnnConfig::new().init::<TestBackend>(&device);
        let legacy = DigitCnnConfig::legacy().init::<TestBackend>(&device);

        assert!(full.check_shapes(&DigitCnnConfig::new()).is_ok());
        assert!(legacy.check_shapes(&DigitCnnConfig::legacy()).is_ok());
        assert!(matches!(
            full.check_shapes(&DigitCnnConfig::legacy()),
            Err(ModelError::InconsistentArtifact(_))
        ));

        let wider = DigitCnnConfig {
            dense_units: [512, 128],
            ..DigitCnnConfig::new()
        };
        assert!(matches!(
            full.check_shapes(&wider),
            Err(ModelError::InconsistentArtifact(_))
        ));
    }
}
