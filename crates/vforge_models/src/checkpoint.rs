//! Model artifacts: weights plus a metadata manifest.
//!
//! An artifact is a directory holding
//!
//! - `model.mpk`: the weights, written with Burn's named MessagePack recorder
//!   at full precision
//! - `model.json`: [`ArtifactMetadata`], describing the architecture and the
//!   layers the model exposes
//!
//! Loading validates the manifest before touching the weights, so a model that
//! cannot serve explanations is rejected at startup rather than on the first
//! request.
//!
//! # Example
//!
//! ```rust,ignore
//! use vforge_models::{load_model, save_model, DigitCnnConfig};
//!
//! let config = DigitCnnConfig::new();
//! let model = config.init::<NdArray>(&device);
//! save_model(&model, &config, "artifacts/digits")?;
//!
//! let loaded = load_model::<NdArray>("artifacts/digits", &device)?;
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use burn::module::Module;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use vforge_core::LayerName;

use crate::digit_cnn::{DigitCnn, DigitCnnConfig, DigitCnnRecord};
use crate::error::{ModelError, Result};

/// Architecture name written to the manifest.
pub const ARCH: &str = "digit_cnn";

/// Manifest format understood by this version.
pub const FORMAT_VERSION: u32 = 1;

/// Weights file stem; the recorder appends `.mpk`.
const WEIGHTS_STEM: &str = "model";

/// Manifest file name.
pub const METADATA_FILE: &str = "model.json";

/// Description of a saved model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    /// Manifest format version.
    pub format_version: u32,
    /// Model architecture name.
    pub arch: String,
    /// Architecture configuration.
    pub config: DigitCnnConfig,
    /// Layers the model exposes, by name.
    pub layers: Vec<LayerName>,
    /// Additional metadata.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl ArtifactMetadata {
    /// Create metadata for a model built from `config`.
    pub fn new(config: &DigitCnnConfig) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            arch: ARCH.to_string(),
            config: config.clone(),
            layers: config.layers(),
            extra: BTreeMap::new(),
        }
    }

    /// Add extra metadata.
    #[must_use]
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Check the manifest against the layer contract.
    ///
    /// # Errors
    ///
    /// - [`ModelError::MissingLayer`] if a required layer is not listed
    /// - [`ModelError::InconsistentArtifact`] for an unknown format or
    ///   architecture, a layer list that disagrees with the configuration, or
    ///   a configuration whose shapes break the contract
    pub fn validate(&self) -> Result<()> {
        if self.format_version != FORMAT_VERSION {
            return Err(ModelError::InconsistentArtifact(format!(
                "unsupported format version {} (expected {FORMAT_VERSION})",
                self.format_version
            )));
        }
        if self.arch != ARCH {
            return Err(ModelError::InconsistentArtifact(format!(
                "unknown architecture `{}`",
                self.arch
            )));
        }

        if let Some(&missing) = LayerName::REQUIRED
            .iter()
            .find(|layer| !self.layers.contains(layer))
        {
            return Err(ModelError::MissingLayer(missing));
        }

        let lists_conv3 = self.layers.contains(&LayerName::Conv3);
        if lists_conv3 != self.config.with_conv3 {
            return Err(ModelError::InconsistentArtifact(format!(
                "layer list {} conv3 but config has with_conv3 = {}",
                if lists_conv3 { "includes" } else { "omits" },
                self.config.with_conv3
            )));
        }

        self.config.check_contract()
    }

    /// Save metadata to a JSON file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load metadata from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// Write a model artifact into `dir`, creating it if needed.
///
/// # Errors
///
/// Fails if `config` does not describe `model`, or on any IO error.
pub fn save_model<B: Backend>(
    model: &DigitCnn<B>,
    config: &DigitCnnConfig,
    dir: impl AsRef<Path>,
) -> Result<()> {
    save_model_with(model, ArtifactMetadata::new(config), dir)
}

/// Write a model artifact with caller-supplied metadata.
///
/// # Errors
///
/// Fails if the metadata is invalid or does not describe `model`, or on any
/// IO error.
pub fn save_model_with<B: Backend>(
    model: &DigitCnn<B>,
    metadata: ArtifactMetadata,
    dir: impl AsRef<Path>,
) -> Result<()> {
    metadata.validate()?;
    if metadata.config.with_conv3 != model.has_conv3() {
        return Err(ModelError::InconsistentArtifact(
            "config and model disagree on conv3".to_string(),
        ));
    }

    let dir = dir.as_ref();
    std::fs::create_dir_all(dir)?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    recorder
        .record(model.clone().into_record(), dir.join(WEIGHTS_STEM))
        .map_err(|e| ModelError::Save(e.to_string()))?;
    metadata.save(dir.join(METADATA_FILE))?;

    debug!(dir = %dir.display(), "Saved model artifact");
    Ok(())
}

/// Load and validate a model artifact.
///
/// The manifest is checked first; weights are only read once the layer
/// contract is known to hold. The loaded weights are then checked against the
/// manifest's configuration.
///
/// # Errors
///
/// Returns [`ModelError::MissingLayer`] or
/// [`ModelError::InconsistentArtifact`] for a bad manifest,
/// [`ModelError::Load`] for an unreadable weights file, and
/// [`ModelError::InconsistentArtifact`] if the weights were saved from a
/// different architecture.
pub fn load_model<B: Backend>(
    dir: impl AsRef<Path>,
    device: &B::Device,
) -> Result<(DigitCnn<B>, ArtifactMetadata)> {
    let dir = dir.as_ref();
    let metadata = ArtifactMetadata::load(dir.join(METADATA_FILE))?;
    metadata.validate()?;

    let recorder = NamedMpkFileRecorder::<FullPrecisionSettings>::new();
    let record: DigitCnnRecord<B> = recorder
        .load(dir.join(WEIGHTS_STEM), device)
        .map_err(|e| ModelError::Load(e.to_string()))?;
    let model = metadata.config.init::<B>(device).load_record(record);
    model.check_shapes(&metadata.config)?;

    info!(
        dir = %dir.display(),
        layers = ?metadata.layers,
        "Loaded model"
    );
    Ok((model, metadata))
}
