//! Common CLI options shared across commands.
//!
//! Shared argument structures composed into command structs with
//! `#[command(flatten)]`.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;

/// Validates that a required input file exists.
///
/// # Errors
///
/// Returns a descriptive error naming the file's role.
pub fn validate_file_exists(path: &Path, description: &str) -> Result<()> {
    if !path.exists() {
        bail!("{description} file not found: {}", path.display());
    }
    Ok(())
}

/// Threading and device options for the correction pipeline.
#[derive(Debug, Clone, Args)]
pub struct ComputeOptions {
    /// Number of input worker threads
    #[arg(short = 't', long = "threads", default_value = "4")]
    pub threads: usize,

    /// Inference device ("cpu", or a backend device string)
    #[arg(short = 'd', long = "device", default_value = "cpu")]
    pub device: String,

    /// Inference threads per device (forced to 1 on CPU)
    #[arg(long = "infer-threads", default_value = "1")]
    pub infer_threads: usize,

    /// Inference batch slot budget; 0 auto-sizes from device memory
    #[arg(short = 'b', long = "batch-size", default_value = "32")]
    pub batch_size: usize,
}

/// Model directory option.
#[derive(Debug, Clone, Args)]
pub struct ModelOptions {
    /// Model directory containing weights and config.toml
    #[arg(short = 'm', long = "model-dir")]
    pub model_dir: PathBuf,
}
