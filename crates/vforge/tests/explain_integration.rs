//! Integration tests for model artifacts and the explanation engine.
//!
//! Most tests use a freshly initialized model. Tests that need a trained
//! digit classifier are ignored by default and read the artifact directory
//! from `VFORGE_MODEL_DIR`:
//!
//! ```text
//! VFORGE_MODEL_DIR=./model cargo test -p vforge -- --ignored
//! ```

use burn::module::{ModuleMapper, ParamId};
use burn::prelude::*;
use image::{DynamicImage, GrayImage, Luma};

use vforge::core::CANVAS_SIZE;
use vforge::explain::overlay::resize_map;
use vforge::models::checkpoint::{ArtifactMetadata, METADATA_FILE};
use vforge::prelude::*;

type ExplainBackend = Autodiff<NdArray>;

fn engine_with(config: DigitCnnConfig) -> ExplanationEngine<ExplainBackend> {
    let device = Default::default();
    <NdArray as Backend>::seed(7);
    ExplanationEngine::new(config.init::<ExplainBackend>(&device), &device)
}

fn zero_drawing() -> GrayImage {
    let mut image = GrayImage::from_pixel(280, 280, Luma([255]));
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let dx = (x as f32 - 140.0) / 70.0;
        let dy = (y as f32 - 140.0) / 100.0;
        let d = (dx * dx + dy * dy).sqrt();
        if (0.75..=1.0).contains(&d) {
            *pixel = Luma([0]);
        }
    }
    image
}

fn zero_tensor() -> CanonicalTensor {
    normalize(&DynamicImage::ImageLuma8(zero_drawing())).into_tensor()
}

#[test]
fn test_heatmap_resolution_follows_layer() {
    let engine = engine_with(DigitCnnConfig::new());
    let tensor = zero_tensor();

    for (layer, side) in [
        (LayerName::Conv1, 14),
        (LayerName::Conv2, 7),
        (LayerName::Conv3, 7),
    ] {
        let heatmap = engine.grad_cam(&tensor, layer, None).unwrap();
        assert_eq!(heatmap.dims(), (side, side), "{layer}");
        assert!(heatmap.values().iter().all(|v| (0.0..=1.0).contains(v)));
        if !heatmap.is_zero() {
            assert!((heatmap.max() - 1.0).abs() < 1e-6, "{layer}");
        }
    }
}

#[test]
fn test_every_class_can_be_explained() {
    let engine = engine_with(DigitCnnConfig::new());
    let tensor = zero_tensor();

    for class in 0..10 {
        let heatmap = engine
            .grad_cam(&tensor, LayerName::Conv2, Some(class))
            .unwrap();
        assert_eq!(heatmap.class_index(), class);
    }
}

#[test]
fn test_invalid_targets_are_reported() {
    let engine = engine_with(DigitCnnConfig::new());
    let tensor = zero_tensor();

    let err = engine
        .grad_cam(&tensor, LayerName::Conv2, Some(10))
        .unwrap_err();
    assert!(matches!(
        err,
        ExplainError::InvalidTarget(InvalidTargetError::ClassOutOfRange {
            class_index: 10,
            n_classes: 10
        })
    ));

    let err = engine
        .grad_cam(&tensor, LayerName::Dense1, None)
        .unwrap_err();
    assert!(matches!(
        err,
        ExplainError::InvalidTarget(InvalidTargetError::NotSpatial(LayerName::Dense1))
    ));
}

#[test]
fn test_empty_canvas_is_explained_without_error() {
    let engine = engine_with(DigitCnnConfig::new());
    let blank = normalize(&DynamicImage::ImageLuma8(GrayImage::from_pixel(
        280,
        280,
        Luma([255]),
    )))
    .into_tensor();
    assert!(blank.is_blank());

    let explanation = engine.explain(&blank, None).unwrap();
    assert_eq!(explanation.heatmap.dims(), (7, 7));
    assert!(explanation
        .heatmap
        .values()
        .iter()
        .all(|v| (0.0..=1.0).contains(v)));
}

/// Replaces every float parameter with zeros.
struct Zeroed;

impl<B: Backend> ModuleMapper<B> for Zeroed {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        tensor.zeros_like()
    }
}

#[test]
fn test_zero_weight_model_gives_zero_heatmap() {
    let device = Default::default();
    let model = DigitCnnConfig::new()
        .init::<ExplainBackend>(&device)
        .map(&mut Zeroed);
    let engine = ExplanationEngine::new(model, &device);

    for tensor in [zero_tensor(), CanonicalTensor::zeros()] {
        let explanation = engine.explain(&tensor, None).unwrap();
        assert!(explanation
            .prediction
            .probabilities
            .iter()
            .all(|p| (p - 0.1).abs() < 1e-6));
        assert_eq!(explanation.heatmap.dims(), (7, 7));
        assert!(explanation.heatmap.is_zero());
        assert_eq!(explanation.heatmap.max(), 0.0);

        for layer in [LayerName::Conv1, LayerName::Conv3] {
            assert!(engine.grad_cam(&tensor, layer, None).unwrap().is_zero());
        }
    }
}

#[test]
fn test_legacy_model_activations_fall_back() {
    let engine = engine_with(DigitCnnConfig::legacy());
    let activations = engine.activations(&zero_tensor());

    assert!(activations.conv3_substituted());
    assert_eq!(
        activations.get(LayerName::Conv3).unwrap().dims(),
        vec![1, 64, 7, 7]
    );

    let err = engine
        .grad_cam(&zero_tensor(), LayerName::Conv3, None)
        .unwrap_err();
    assert!(err.is_invalid_target());
}

#[test]
fn test_artifact_round_trip_through_engine() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = DigitCnnConfig::new();
    let model = config.init::<NdArray>(&device);
    save_model(&model, &config, dir.path()).unwrap();

    let engine = ExplanationEngine::<ExplainBackend>::from_artifact(dir.path(), &device).unwrap();
    assert_eq!(engine.layer_names(), LayerName::ALL.to_vec());
    assert_eq!(engine.metadata().unwrap().config, config);

    let tensor = zero_tensor();
    let expected = model.forward_probs(tensor.to_tensor::<NdArray>(&device));
    let expected = vforge::explain::first_row(&expected).unwrap();
    let prediction = engine.predict(&tensor).unwrap();
    for (a, b) in expected.iter().zip(&prediction.probabilities) {
        assert!((a - b).abs() < 1e-5);
    }
}

#[test]
fn test_artifact_missing_layer_fails_at_load() {
    let dir = tempfile::tempdir().unwrap();
    let device = Default::default();
    let config = DigitCnnConfig::new();
    save_model(&config.init::<NdArray>(&device), &config, dir.path()).unwrap();

    let path = dir.path().join(METADATA_FILE);
    let mut metadata = ArtifactMetadata::load(&path).unwrap();
    metadata.layers.retain(|&layer| layer != LayerName::Dense1);
    metadata.save(&path).unwrap();

    let err = ExplanationEngine::<ExplainBackend>::from_artifact(dir.path(), &device).unwrap_err();
    assert!(matches!(err, ModelError::MissingLayer(LayerName::Dense1)));
}

#[test]
fn test_overlay_matches_original_resolution() {
    let engine = engine_with(DigitCnnConfig::new());
    let drawing = DynamicImage::ImageLuma8(zero_drawing());
    let tensor = normalize(&drawing).into_tensor();
    let explanation = engine.explain(&tensor, None).unwrap();

    let picture = overlay(&drawing, &explanation.heatmap, &OverlayOptions::default());
    assert_eq!(picture.dimensions(), (280, 280));
}

#[test]
fn test_clones_give_identical_explanations() {
    let engine = engine_with(DigitCnnConfig::new());
    let tensor = zero_tensor();
    let reference = engine.explain(&tensor, None).unwrap();

    for _ in 0..3 {
        let explanation = engine.clone().explain(&tensor, None).unwrap();
        assert_eq!(explanation.prediction, reference.prediction);
        assert_eq!(explanation.heatmap.values(), reference.heatmap.values());
    }
}

fn trained_engine() -> ExplanationEngine<ExplainBackend> {
    let dir = std::env::var("VFORGE_MODEL_DIR").expect("VFORGE_MODEL_DIR is not set");
    ExplanationEngine::from_artifact(dir, &Default::default()).unwrap()
}

#[test]
#[ignore = "requires a trained model in VFORGE_MODEL_DIR"]
fn test_trained_model_recognizes_zero() {
    let engine = trained_engine();
    let prediction = engine.predict(&zero_tensor()).unwrap();
    assert_eq!(prediction.class_index, 0);
    assert!(prediction.confidence > 0.9);
}

#[test]
#[ignore = "requires a trained model in VFORGE_MODEL_DIR"]
fn test_trained_heatmap_peaks_on_stroke() {
    let engine = trained_engine();
    let tensor = zero_tensor();
    let heatmap = engine.grad_cam(&tensor, LayerName::Conv2, Some(0)).unwrap();

    let side = CANVAS_SIZE as u32;
    let upsampled = resize_map(heatmap.values(), side, side);
    let (peak, _) = upsampled
        .indexed_iter()
        .fold(((0, 0), f32::MIN), |best, (idx, &v)| {
            if v > best.1 {
                (idx, v)
            } else {
                best
            }
        });

    let pixels = tensor.pixels();
    let (row, col) = peak;
    let near_ink = (row.saturating_sub(1)..=(row + 1).min(CANVAS_SIZE - 1)).any(|r| {
        (col.saturating_sub(1)..=(col + 1).min(CANVAS_SIZE - 1)).any(|c| pixels[[r, c]] > 0.5)
    });
    assert!(near_ink, "heatmap peak at {peak:?} is not on the stroke");
}

#[test]
#[ignore = "requires a trained model in VFORGE_MODEL_DIR"]
fn test_renormalized_digit_keeps_confidence() {
    let engine = trained_engine();
    let first = zero_tensor();
    let second = normalize(&DynamicImage::ImageLuma8(first.to_gray_image())).into_tensor();

    let a = engine.predict(&first).unwrap();
    let b = engine.predict(&second).unwrap();
    assert_eq!(a.class_index, b.class_index);
    assert!((a.confidence - b.confidence).abs() < 0.05);
}
