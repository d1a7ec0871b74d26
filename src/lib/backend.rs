//! Inference backend abstraction.
//!
//! The engine treats the neural network as an opaque tensor functor: collated
//! batches go in, per-column class logits come out. [`BackendFactory`]
//! enumerates devices and constructs one [`InferenceBackend`] per inference
//! worker at engine startup, so model-load failures surface before any data
//! flows.
//!
//! [`MajorityVoteBackend`] is the reference implementation: a deterministic,
//! quality-weighted vote over the MSA columns. It keeps the tool usable
//! without an accelerated runtime and gives tests a predictable oracle.

use ndarray::{Array1, Array2, Array3};
use thiserror::Error;

use crate::errors::{CorralError, Result};
use crate::features::{fold_strand, NO_COVERAGE_CODE};
use crate::model::ModelConfig;

/// Number of output classes: `A C G T *`.
pub const NUM_PRED_CLASSES: usize = 5;

/// Errors surfaced by a backend invocation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Worth one retry after a cache clear (e.g. device allocator pressure).
    #[error("transient backend failure: {0}")]
    Transient(String),
    /// Not recoverable; tears the inference worker down.
    #[error("fatal backend failure: {0}")]
    Fatal(String),
}

/// One collated inference batch.
///
/// `bases`/`quals` have shape `[B, W, R]` with `W`/`R` padded to the batch
/// maxima; `lengths[b]` is window `b`'s true column count; `indices[b]` lists
/// its supported columns.
pub struct BatchInputs {
    /// Padded base-class codes.
    pub bases: Array3<i32>,
    /// Padded normalized qualities.
    pub quals: Array3<f32>,
    /// True column count per window.
    pub lengths: Array1<i32>,
    /// Supported column indices per window.
    pub indices: Vec<Array1<i32>>,
}

/// Backend result: logits of shape `[Σ supported_i, NUM_PRED_CLASSES]`.
pub struct BackendOutput {
    /// Per-supported-column class logits, windows concatenated in order.
    pub logits: Array2<f32>,
}

/// An inference session bound to one device.
pub trait InferenceBackend: Send {
    /// Runs the model on a collated batch.
    ///
    /// # Errors
    ///
    /// [`BackendError::Transient`] invites a single retry after
    /// [`InferenceBackend::clear_cache`]; anything else is fatal.
    fn forward(&mut self, inputs: &BatchInputs) -> std::result::Result<BackendOutput, BackendError>;

    /// Drops device-side allocator caches. Called between a transient
    /// failure and its retry.
    fn clear_cache(&mut self) {}
}

/// Constructs backends and answers device questions for the engine.
pub trait BackendFactory: Send + Sync {
    /// Expands a device request into concrete device slots.
    ///
    /// # Errors
    ///
    /// Unparseable device strings are an error; an empty expansion is
    /// reported by the engine as [`CorralError::NoDevices`].
    fn enumerate_devices(&self, device: &str) -> Result<Vec<String>>;

    /// Loads the model onto a device.
    ///
    /// # Errors
    ///
    /// Model-load failures are fatal at engine startup.
    fn create(&self, device: &str, model: &ModelConfig) -> Result<Box<dyn InferenceBackend>>;

    /// Suggests a batch size targeting the given memory utilization.
    /// Returns 0 if the device cannot fit any batch.
    fn auto_batch_size(&self, device: &str, target_utilization: f32) -> usize;
}

/// Deterministic quality-weighted majority vote over MSA columns.
///
/// Each query row votes for its strand-folded class with weight
/// `1 + normalized_qual`, so counts dominate and quality breaks ties. A
/// column nobody covers falls back to the target row's class.
pub struct MajorityVoteBackend;

impl InferenceBackend for MajorityVoteBackend {
    fn forward(&mut self, inputs: &BatchInputs) -> std::result::Result<BackendOutput, BackendError> {
        let (batch, _, n_rows) = inputs.bases.dim();
        if inputs.indices.len() != batch {
            return Err(BackendError::Fatal(format!(
                "indices for {} windows, batch of {batch}",
                inputs.indices.len()
            )));
        }

        let total: usize = inputs.indices.iter().map(Array1::len).sum();
        let mut logits = Array2::zeros((total, NUM_PRED_CLASSES));
        let mut out_row = 0usize;

        for b in 0..batch {
            for &col in &inputs.indices[b] {
                let col = col as usize;
                let mut votes = [0f32; NUM_PRED_CLASSES];
                let mut covered = false;
                for r in 1..n_rows {
                    let code = inputs.bases[[b, col, r]];
                    if code >= i32::from(NO_COVERAGE_CODE) {
                        continue;
                    }
                    let class = fold_strand(code as i8) as usize;
                    votes[class] += 1.0 + inputs.quals[[b, col, r]];
                    covered = true;
                }
                if !covered {
                    let target = inputs.bases[[b, col, 0]];
                    if target < i32::from(NO_COVERAGE_CODE) {
                        votes[fold_strand(target as i8) as usize] = 1.0;
                    }
                }
                for (class, &v) in votes.iter().enumerate() {
                    logits[[out_row, class]] = v;
                }
                out_row += 1;
            }
        }

        Ok(BackendOutput { logits })
    }
}

/// Factory for [`MajorityVoteBackend`]. CPU only.
pub struct MajorityVoteFactory;

/// Batch size the reference backend reports for auto-sizing; it holds no
/// device memory, so any reasonable value works.
const MAJORITY_VOTE_BATCH_SIZE: usize = 32;

impl BackendFactory for MajorityVoteFactory {
    fn enumerate_devices(&self, device: &str) -> Result<Vec<String>> {
        if device == "cpu" {
            Ok(vec!["cpu".to_string()])
        } else {
            Ok(Vec::new())
        }
    }

    fn create(&self, _device: &str, model: &ModelConfig) -> Result<Box<dyn InferenceBackend>> {
        // The vote needs no weights, but a broken model package should still
        // fail loudly at startup.
        let weights = model.weights_path();
        if !weights.exists() {
            return Err(CorralError::ModelLoad {
                path: model.model_dir.display().to_string(),
                reason: format!("weights file '{}' not found", model.weights_file),
            });
        }
        Ok(Box::new(MajorityVoteBackend))
    }

    fn auto_batch_size(&self, _device: &str, _target_utilization: f32) -> usize {
        MAJORITY_VOTE_BATCH_SIZE
    }
}
