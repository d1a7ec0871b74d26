//! Model directory handling.
//!
//! A model directory contains the serialized network weights plus a
//! `config.toml` describing how features are built for it. The correction
//! engine only interprets the config; the weights file is handed to the
//! inference backend untouched.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::errors::{CorralError, Result};

/// Name of the config file inside a model directory.
pub const MODEL_CONFIG_FILE: &str = "config.toml";

fn default_weights_file() -> String {
    "weights.pt".to_string()
}

fn default_min_supported_coverage() -> usize {
    1
}

fn default_min_window_overlap_frac() -> f32 {
    0.0
}

/// Typed view of a model directory's `config.toml`.
///
/// `window_size` is mandatory; the remaining fields carry defaults so older
/// model packages keep loading.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Width of a correction window in target bases.
    pub window_size: usize,

    /// File name of the serialized weights, relative to the model directory.
    #[serde(default = "default_weights_file")]
    pub weights_file: String,

    /// Minimum query-row coverage for an MSA column to be eligible for
    /// model-driven correction.
    #[serde(default = "default_min_supported_coverage")]
    pub min_supported_coverage: usize,

    /// Minimum fraction of a window an overlap must cover to contribute a
    /// row. Zero accepts any nonzero overlap.
    #[serde(default = "default_min_window_overlap_frac")]
    pub min_window_overlap_frac: f32,

    /// Directory the config was loaded from. Not part of the TOML.
    #[serde(skip)]
    pub model_dir: PathBuf,
}

impl ModelConfig {
    /// Loads and validates `config.toml` from a model directory.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::ModelLoad`] if the file is missing, fails to
    /// parse, or describes an unusable model.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let path = model_dir.join(MODEL_CONFIG_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| CorralError::ModelLoad {
            path: model_dir.display().to_string(),
            reason: format!("reading {MODEL_CONFIG_FILE}: {e}"),
        })?;

        let mut config: ModelConfig =
            toml::from_str(&text).map_err(|e| CorralError::ModelLoad {
                path: model_dir.display().to_string(),
                reason: format!("parsing {MODEL_CONFIG_FILE}: {e}"),
            })?;
        config.model_dir = model_dir.to_path_buf();
        config.validate()?;
        Ok(config)
    }

    /// Absolute path of the weights file.
    #[must_use]
    pub fn weights_path(&self) -> PathBuf {
        self.model_dir.join(&self.weights_file)
    }

    fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(CorralError::ModelLoad {
                path: self.model_dir.display().to_string(),
                reason: "window_size must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_window_overlap_frac) {
            return Err(CorralError::ModelLoad {
                path: self.model_dir.display().to_string(),
                reason: format!(
                    "min_window_overlap_frac {} outside [0, 1]",
                    self.min_window_overlap_frac
                ),
            });
        }
        Ok(())
    }
}
