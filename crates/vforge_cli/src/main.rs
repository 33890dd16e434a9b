//! visionforge CLI for digit normalization, layer inspection, and Grad-CAM.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use image::imageops::{self, FilterType};
use image::DynamicImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use burn::prelude::*;
use burn_ndarray::NdArray;
use vforge_core::{CanonicalTensor, LayerName};
use vforge_explain::render::{
    feature_map_images, heatmap_image, DEFAULT_FEATURE_MAP_SIZE, DEFAULT_HEATMAP_SIZE,
    DEFAULT_MAX_MAPS,
};
use vforge_explain::{first_row, overlay, Autodiff, ExplanationEngine, OverlayOptions};
use vforge_models::{save_model, DigitCnnConfig};
use vforge_preprocess::{DigitNormalizer, Normalized, PipelineConfig};

/// Backend used for inference and gradients.
type ExplainBackend = Autodiff<NdArray>;

#[derive(Parser)]
#[command(name = "vforge")]
#[command(author, version)]
#[command(about = "Normalize handwritten digits and explain a CNN digit classifier")]
#[command(long_about = "visionforge: digit normalization, layer activations and Grad-CAM.

EXAMPLES:
  # Write an untrained model artifact
  vforge init --out ./model

  # Normalize a drawing to the 28x28 classifier input
  vforge preprocess drawing.png --out digit.png

  # Predict and dump feature maps
  vforge scan --model ./model drawing.png --out ./scan

  # Grad-CAM overlay for the predicted class
  vforge explain --model ./model drawing.png --out cam.png")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a freshly initialized model artifact
    Init {
        /// Artifact directory
        #[arg(long, value_name = "DIR")]
        out: PathBuf,

        /// Omit the conv3 stage
        #[arg(long, default_value = "false")]
        legacy: bool,

        /// Random seed for weight initialization
        #[arg(long, default_value = "42", value_name = "SEED")]
        seed: u64,
    },
    /// Run the preprocessing pipeline only
    Preprocess {
        /// Input image
        image: PathBuf,

        /// Output PNG for the 28x28 result
        #[arg(long, value_name = "PNG")]
        out: PathBuf,

        /// Pipeline configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Predict a digit and report layer activations
    Scan {
        /// Model artifact directory
        #[arg(long, value_name = "DIR")]
        model: PathBuf,

        /// Input image
        image: PathBuf,

        /// Directory for the processed image and feature maps
        #[arg(long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Pipeline configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
    /// Write a Grad-CAM overlay for one class
    Explain {
        /// Model artifact directory
        #[arg(long, value_name = "DIR")]
        model: PathBuf,

        /// Input image
        image: PathBuf,

        /// Class to explain (defaults to the predicted class)
        #[arg(long, value_name = "N")]
        class: Option<usize>,

        /// Convolutional layer to explain: conv1, conv2, conv3
        #[arg(long, default_value = "conv2", value_name = "NAME")]
        layer: LayerName,

        /// Heatmap opacity
        #[arg(long, default_value = "0.4", value_name = "A")]
        alpha: f32,

        /// Output PNG for the overlay
        #[arg(long, value_name = "PNG")]
        out: PathBuf,

        /// Output PNG for the raw heatmap
        #[arg(long, value_name = "PNG")]
        heatmap: Option<PathBuf>,

        /// Pipeline configuration (JSON)
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::filter::LevelFilter::from_level(log_level))
        .init();

    match cli.command {
        Commands::Init { out, legacy, seed } => handle_init(&out, legacy, seed),
        Commands::Preprocess { image, out, config } => {
            handle_preprocess(&image, &out, config.as_deref())
        }
        Commands::Scan {
            model,
            image,
            out,
            config,
        } => handle_scan(&model, &image, out.as_deref(), config.as_deref()),
        Commands::Explain {
            model,
            image,
            class,
            layer,
            alpha,
            out,
            heatmap,
            config,
        } => handle_explain(ExplainArgs {
            model,
            image,
            class,
            layer,
            alpha,
            out,
            heatmap,
            config,
        }),
    }
}

fn handle_init(out: &Path, legacy: bool, seed: u64) -> Result<()> {
    let config = if legacy {
        DigitCnnConfig::legacy()
    } else {
        DigitCnnConfig::new()
    };

    <NdArray as Backend>::seed(seed);
    let device = Default::default();
    let model = config.init::<NdArray>(&device);
    save_model(&model, &config, out)
        .with_context(|| format!("Failed to write model artifact to {}", out.display()))?;

    println!("Wrote untrained model to {}", out.display());
    println!(
        "  Layers: {}",
        config
            .layers()
            .iter()
            .map(|layer| layer.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(())
}

fn handle_preprocess(image: &Path, out: &Path, config: Option<&Path>) -> Result<()> {
    let normalizer = load_normalizer(config)?;
    let tensor = normalize_file(&normalizer, image)?;
    save_png(&DynamicImage::ImageLuma8(tensor.to_gray_image()), out)?;
    println!("Wrote {}", out.display());
    Ok(())
}

fn handle_scan(model: &Path, image: &Path, out: Option<&Path>, config: Option<&Path>) -> Result<()> {
    let engine = load_engine(model)?;
    let normalizer = load_normalizer(config)?;
    let tensor = normalize_file(&normalizer, image)?;

    let prediction = engine.predict(&tensor)?;
    let activations = engine.activations(&tensor);

    println!("Prediction: {} ({:.1}%)", prediction.class_index, prediction.confidence * 100.0);
    println!("─────────────────────────────────────────");
    for (digit, p) in prediction.probabilities.iter().enumerate() {
        println!("  {digit}: {:>6.2}%", p * 100.0);
    }

    if let Some(dense1) = activations.dense(LayerName::Dense1) {
        let values = first_row(dense1)?;
        let active = values.iter().filter(|&&v| v > 0.0).count();
        let max = values.iter().copied().fold(0.0f32, f32::max);
        println!();
        println!("dense1: {active}/{} units active, max {max:.3}", values.len());
    }
    if activations.conv3_substituted() {
        println!("conv3: not present, showing conv2 activations");
    }

    let Some(out) = out else {
        return Ok(());
    };
    fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;
    save_png(
        &DynamicImage::ImageLuma8(tensor.to_gray_image()),
        &out.join("processed.png"),
    )?;

    for layer in [LayerName::Conv1, LayerName::Conv2] {
        let Some(activation) = activations.spatial(layer) else {
            continue;
        };
        let maps = feature_map_images(activation, DEFAULT_MAX_MAPS, DEFAULT_FEATURE_MAP_SIZE)?;
        for (i, map) in maps.into_iter().enumerate() {
            save_png(
                &DynamicImage::ImageLuma8(map),
                &out.join(format!("{layer}_{i:02}.png")),
            )?;
        }
    }

    println!();
    println!("Wrote feature maps to {}", out.display());
    Ok(())
}

struct ExplainArgs {
    model: PathBuf,
    image: PathBuf,
    class: Option<usize>,
    layer: LayerName,
    alpha: f32,
    out: PathBuf,
    heatmap: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn handle_explain(args: ExplainArgs) -> Result<()> {
    if !(0.0..=1.0).contains(&args.alpha) {
        bail!("--alpha must be within [0, 1], got {}", args.alpha);
    }

    let engine = load_engine(&args.model)?;
    let normalizer = load_normalizer(args.config.as_deref())?;
    let tensor = normalize_file(&normalizer, &args.image)?;

    let prediction = engine.predict(&tensor)?;
    let class_index = args.class.unwrap_or(prediction.class_index);
    let heatmap = engine
        .grad_cam(&tensor, args.layer, Some(class_index))
        .with_context(|| format!("Grad-CAM failed for class {class_index} at {}", args.layer))?;

    let base = imageops::resize(
        &tensor.to_gray_image(),
        DEFAULT_HEATMAP_SIZE,
        DEFAULT_HEATMAP_SIZE,
        FilterType::Nearest,
    );
    let options = OverlayOptions {
        alpha: args.alpha,
        ..Default::default()
    };
    let blended = overlay(&DynamicImage::ImageLuma8(base), &heatmap, &options);
    save_png(&DynamicImage::ImageRgb8(blended), &args.out)?;

    if let Some(path) = &args.heatmap {
        let raw = heatmap_image(&heatmap, DEFAULT_HEATMAP_SIZE);
        save_png(&DynamicImage::ImageLuma8(raw), path)?;
    }

    println!(
        "Prediction: {} ({:.1}%)",
        prediction.class_index,
        prediction.confidence * 100.0
    );
    println!(
        "Explained class {class_index} at {} ({}x{}), wrote {}",
        heatmap.layer(),
        heatmap.dims().0,
        heatmap.dims().1,
        args.out.display()
    );
    Ok(())
}

fn load_engine(dir: &Path) -> Result<ExplanationEngine<ExplainBackend>> {
    let device = Default::default();
    let engine = ExplanationEngine::<ExplainBackend>::from_artifact(dir, &device)
        .with_context(|| format!("Failed to load model from {}", dir.display()))?;
    info!(layers = ?engine.layer_names(), "Model ready");
    Ok(engine)
}

fn load_normalizer(config: Option<&Path>) -> Result<DigitNormalizer> {
    let Some(path) = config else {
        return Ok(DigitNormalizer::new());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline config {}", path.display()))?;
    let config: PipelineConfig = serde_json::from_str(&text)
        .with_context(|| format!("Invalid pipeline config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid pipeline config {}", path.display()))?;
    Ok(DigitNormalizer::from_config(config))
}

fn normalize_file(normalizer: &DigitNormalizer, path: &Path) -> Result<CanonicalTensor> {
    let image =
        image::open(path).with_context(|| format!("Failed to read image {}", path.display()))?;
    match normalizer.normalize(&image) {
        Normalized::Digit(tensor) => Ok(tensor),
        Normalized::NoDigitDetected => {
            println!("No digit detected in {}, using a blank canvas", path.display());
            Ok(CanonicalTensor::zeros())
        }
    }
}

fn save_png(image: &DynamicImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    image
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}
