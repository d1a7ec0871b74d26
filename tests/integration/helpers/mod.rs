//! Shared helpers for engine integration tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use corral_lib::alignments::{CigarOp, CorrectionAlignments, Overlap};
use corral_lib::backend::{
    BackendError, BackendFactory, BackendOutput, BatchInputs, InferenceBackend,
    MajorityVoteBackend, NUM_PRED_CLASSES,
};
use corral_lib::engine::{CorrectedRead, CorrectionConfig, CorrectionEngine};
use corral_lib::fastx::MemorySource;
use corral_lib::model::ModelConfig;
use ndarray::Array2;

/// How a [`ScriptedBackend`] answers forward calls.
#[derive(Clone)]
pub enum Script {
    /// Every supported column gets this class.
    Constant(u8),
    /// Delegate to the quality-weighted majority vote.
    Majority,
    /// Fail transiently once, then behave like `Constant`.
    TransientOnce(u8),
    /// Fail transiently on every call; the retry fails too.
    AlwaysTransient,
}

/// Deterministic backend driven by a [`Script`], with shared call counters.
pub struct ScriptedBackend {
    script: Script,
    failed_once: bool,
    calls: Arc<AtomicUsize>,
    cache_clears: Arc<AtomicUsize>,
}

impl InferenceBackend for ScriptedBackend {
    fn forward(&mut self, inputs: &BatchInputs) -> Result<BackendOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Majority => MajorityVoteBackend.forward(inputs),
            Script::Constant(class) => Ok(constant_logits(inputs, class)),
            Script::TransientOnce(class) => {
                if self.failed_once {
                    Ok(constant_logits(inputs, class))
                } else {
                    self.failed_once = true;
                    Err(BackendError::Transient("scripted failure".to_string()))
                }
            }
            Script::AlwaysTransient => {
                Err(BackendError::Transient("scripted failure".to_string()))
            }
        }
    }

    fn clear_cache(&mut self) {
        self.cache_clears.fetch_add(1, Ordering::SeqCst);
    }
}

fn constant_logits(inputs: &BatchInputs, class: u8) -> BackendOutput {
    let total: usize = inputs.indices.iter().map(|ix| ix.len()).sum();
    let mut logits = Array2::zeros((total, NUM_PRED_CLASSES));
    for row in 0..total {
        logits[[row, class as usize]] = 1.0;
    }
    BackendOutput { logits }
}

/// CPU-only factory handing out [`ScriptedBackend`]s.
pub struct ScriptedFactory {
    pub script: Script,
    pub calls: Arc<AtomicUsize>,
    pub cache_clears: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: Arc::new(AtomicUsize::new(0)),
            cache_clears: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl BackendFactory for ScriptedFactory {
    fn enumerate_devices(&self, device: &str) -> corral_lib::Result<Vec<String>> {
        if device == "cpu" { Ok(vec!["cpu".to_string()]) } else { Ok(Vec::new()) }
    }

    fn create(
        &self,
        _device: &str,
        _model: &ModelConfig,
    ) -> corral_lib::Result<Box<dyn InferenceBackend>> {
        Ok(Box::new(ScriptedBackend {
            script: self.script.clone(),
            failed_once: false,
            calls: Arc::clone(&self.calls),
            cache_clears: Arc::clone(&self.cache_clears),
        }))
    }

    fn auto_batch_size(&self, _device: &str, _target_utilization: f32) -> usize {
        4
    }
}

/// A model config without any on-disk model directory.
pub fn test_model(window_size: usize) -> ModelConfig {
    ModelConfig {
        window_size,
        weights_file: "weights.pt".to_string(),
        min_supported_coverage: 1,
        min_window_overlap_frac: 0.0,
        model_dir: PathBuf::new(),
    }
}

/// Single-threaded default engine config.
pub fn test_config(batch_size: usize) -> CorrectionConfig {
    CorrectionConfig {
        device: "cpu".to_string(),
        threads: 1,
        infer_threads: 1,
        batch_size,
    }
}

/// Builds a source holding the given `(name, seq)` reads with uniform
/// quality.
pub fn source_from(reads: &[(&str, &[u8])]) -> Arc<MemorySource> {
    Arc::new(MemorySource::new(
        reads
            .iter()
            .map(|(name, seq)| ((*name).to_string(), seq.to_vec(), vec![b'I'; seq.len()]))
            .collect(),
    ))
}

/// A forward overlap covering `[tstart, tend)` x `[qstart, qend)`.
pub fn overlap(tstart: u32, tend: u32, qstart: u32, qend: u32, qlen: u32, tlen: u32) -> Overlap {
    Overlap { tstart, tend, qstart, qend, qlen, tlen, fwd: true }
}

/// A message with a single all-match overlap from `qname` onto `tname`.
pub fn simple_message(tname: &str, qname: &str, span: u32) -> CorrectionAlignments {
    CorrectionAlignments::new(
        tname.to_string(),
        vec![qname.to_string()],
        vec![overlap(0, span, 0, span, span, span)],
        vec![vec![CigarOp::Match(span)]],
    )
}

/// Runs `messages` through a fresh engine and collects every output.
///
/// Returns the outputs sorted by name for stable assertions.
pub fn run_engine(
    messages: Vec<CorrectionAlignments>,
    source: Arc<MemorySource>,
    factory: &ScriptedFactory,
    window_size: usize,
    batch_size: usize,
) -> anyhow::Result<Vec<CorrectedRead>> {
    let (sink, output_rx) = crossbeam_channel::unbounded();
    let mut engine = CorrectionEngine::new(
        &test_config(batch_size),
        test_model(window_size),
        source,
        factory,
        sink,
    )?;
    for message in messages {
        engine.submit(message)?;
    }
    engine.terminate()?;
    drop(engine);

    let mut outputs: Vec<CorrectedRead> = output_rx.iter().collect();
    outputs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(outputs)
}
