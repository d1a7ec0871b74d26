//! The correction pipeline.
//!
//! Three worker pools cooperate over two bounded queues:
//!
//! ```text
//! submit() ──> input workers ──> features_queue ──> infer workers
//!                  │                                     │
//!                  │ (all-trivial fast path)             ▼
//!                  │                            inferred_features_queue
//!                  ▼                                     │
//!             reassembly <──────── decode workers <──────┘
//!                  │
//!                  ▼
//!               output sink
//! ```
//!
//! Input workers populate and validate each message, partition it into
//! windows and build features. Windows that need no inference decode
//! immediately; the rest are registered in the reassembly maps and pushed to
//! the features queue. Inference workers batch windows up to a slot budget
//! and run the backend; decode workers translate predictions and complete
//! reads as their last window lands. Shutdown cascades through queue
//! termination: the last worker of each pool terminates the next queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::Sender;
use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::alignments::CorrectionAlignments;
use crate::backend::{BackendError, BackendFactory, InferenceBackend};
use crate::batcher::{argmax_classes, required_slots, InferenceBatch};
use crate::decode::{concatenate_windows, decode_window};
use crate::fastx::SequenceSource;
use crate::features::{extract_features, WindowFeatures};
use crate::model::ModelConfig;
use crate::progress::ProgressTracker;
use crate::queue::{AsyncQueue, PopResult};
use crate::windows::extract_windows;

/// Capacity of the engine's input queue.
pub const INPUT_QUEUE_CAPACITY: usize = 1000;

/// Capacity of the feature-extraction → inference queue.
pub const FEATURES_QUEUE_CAPACITY: usize = 1000;

/// Capacity of the inference → decode queue.
pub const INFERRED_QUEUE_CAPACITY: usize = 500;

/// Decode worker count.
pub const DECODE_THREADS: usize = 4;

/// How long an inference worker waits for input before flushing a partial
/// batch.
pub const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Memory-utilization target when auto-sizing batches.
const AUTO_BATCH_UTILIZATION: f32 = 0.8;

/// One corrected output sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrectedRead {
    /// Read name; gap-split sequences carry a `:<k>` suffix.
    pub name: String,
    /// Corrected bases.
    pub seq: String,
}

/// Engine configuration beyond the model package.
#[derive(Debug, Clone)]
pub struct CorrectionConfig {
    /// Device request handed to the backend factory.
    pub device: String,
    /// Input worker count.
    pub threads: usize,
    /// Inference workers per device; forced to 1 on CPU.
    pub infer_threads: usize,
    /// Batch slot budget; 0 auto-sizes from device memory.
    pub batch_size: usize,
}

/// A point-in-time snapshot of engine counters.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Reads fully processed (monotonic).
    pub num_reads_corrected: u64,
    /// Reads completed on the no-inference fast path.
    pub num_early_reads: u64,
    /// Total reads in the sequence source.
    pub total_reads_in_input: u64,
    /// Windows waiting for inference.
    pub features_queue_depth: usize,
    /// Windows waiting for decode.
    pub inferred_queue_depth: usize,
}

/// Per-read reassembly bookkeeping, guarded by one mutex.
#[derive(Default)]
struct ReassemblyState {
    /// Per-window consensus slots, indexed by read name.
    features_by_id: HashMap<String, Vec<String>>,
    /// Windows still awaiting inference, indexed by read name.
    pending_by_id: HashMap<String, usize>,
}

struct Shared {
    model: ModelConfig,
    source: Arc<dyn SequenceSource>,
    sink: Sender<CorrectedRead>,
    input_queue: AsyncQueue<CorrectionAlignments>,
    features_queue: AsyncQueue<WindowFeatures>,
    inferred_queue: AsyncQueue<WindowFeatures>,
    reassembly: Mutex<ReassemblyState>,
    gpu_mutexes: Vec<Mutex<()>>,
    feature_thread_ids: AtomicUsize,
    num_active_feature_threads: AtomicUsize,
    num_active_infer_threads: AtomicUsize,
    num_reads: AtomicU64,
    num_early_reads: AtomicU64,
    total_reads_in_input: AtomicU64,
    progress: ProgressTracker,
}

/// The three-stage read-correction pipeline.
///
/// Create with [`CorrectionEngine::new`], feed messages with
/// [`CorrectionEngine::submit`], then call [`CorrectionEngine::terminate`] to
/// drain and join. Corrected reads arrive on the output sink as they
/// complete, in no particular order across reads.
pub struct CorrectionEngine {
    shared: Arc<Shared>,
    input_handles: Vec<JoinHandle<()>>,
    infer_handles: Vec<JoinHandle<Result<()>>>,
    decode_handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for CorrectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrectionEngine").finish_non_exhaustive()
    }
}

impl CorrectionEngine {
    /// Builds the engine and spawns all workers.
    ///
    /// Backends are constructed here, one per inference worker, so model-load
    /// failures and empty device enumerations are fatal before any data
    /// flows.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, empty device enumeration, failed
    /// model loads, or an auto-sized batch of zero.
    pub fn new(
        config: &CorrectionConfig,
        model: ModelConfig,
        source: Arc<dyn SequenceSource>,
        factory: &dyn BackendFactory,
        sink: Sender<CorrectedRead>,
    ) -> Result<Self> {
        if config.threads == 0 {
            return Err(anyhow!("at least one input worker is required"));
        }
        if config.infer_threads == 0 {
            return Err(anyhow!("at least one inference worker is required"));
        }

        let devices = factory.enumerate_devices(&config.device)?;
        if devices.is_empty() {
            return Err(crate::errors::CorralError::NoDevices { device: config.device.clone() }
                .into());
        }
        let infer_threads = if config.device == "cpu" { 1 } else { config.infer_threads };

        // Resolve a backend and batch size per worker up front.
        let mut backends: Vec<(Box<dyn InferenceBackend>, usize, usize)> = Vec::new();
        for (mtx_idx, device) in devices.iter().enumerate() {
            for _ in 0..infer_threads {
                let batch_size = if config.batch_size == 0 {
                    let sized = factory.auto_batch_size(device, AUTO_BATCH_UTILIZATION);
                    if sized == 0 {
                        return Err(anyhow!("insufficient memory to run inference on {device}"));
                    }
                    debug!("Using auto batch size {sized} on device {device}");
                    sized
                } else {
                    config.batch_size
                };
                let backend = factory
                    .create(device, &model)
                    .with_context(|| format!("loading model on {device}"))?;
                backends.push((backend, mtx_idx, batch_size));
            }
        }

        let shared = Arc::new(Shared {
            model,
            source,
            sink,
            input_queue: AsyncQueue::new(INPUT_QUEUE_CAPACITY),
            features_queue: AsyncQueue::new(FEATURES_QUEUE_CAPACITY),
            inferred_queue: AsyncQueue::new(INFERRED_QUEUE_CAPACITY),
            reassembly: Mutex::new(ReassemblyState::default()),
            gpu_mutexes: devices.iter().map(|_| Mutex::new(())).collect(),
            feature_thread_ids: AtomicUsize::new(0),
            num_active_feature_threads: AtomicUsize::new(config.threads),
            num_active_infer_threads: AtomicUsize::new(backends.len()),
            num_reads: AtomicU64::new(0),
            num_early_reads: AtomicU64::new(0),
            total_reads_in_input: AtomicU64::new(0),
            progress: ProgressTracker::new("Corrected reads"),
        });

        let infer_handles = backends
            .into_iter()
            .map(|(backend, mtx_idx, batch_size)| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || infer_worker(&shared, backend, mtx_idx, batch_size))
            })
            .collect();

        let decode_handles = (0..DECODE_THREADS)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || decode_worker(&shared))
            })
            .collect();

        let input_handles = (0..config.threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || input_worker(&shared))
            })
            .collect();

        Ok(Self { shared, input_handles, infer_handles, decode_handles })
    }

    /// Queues one alignment message, blocking while the input queue is full.
    ///
    /// # Errors
    ///
    /// Fails once the engine has been terminated.
    pub fn submit(&self, alignments: CorrectionAlignments) -> Result<()> {
        self.shared
            .input_queue
            .push(alignments)
            .map_err(|_| anyhow!("correction engine is terminated"))
    }

    /// Drains the pipeline and joins all workers, input stage first.
    ///
    /// Safe to call more than once.
    ///
    /// # Errors
    ///
    /// Surfaces the first fatal worker error (e.g. a backend failure that
    /// survived its retry).
    pub fn terminate(&mut self) -> Result<()> {
        self.shared.input_queue.terminate();

        for handle in self.input_handles.drain(..) {
            handle.join().map_err(|_| anyhow!("input worker panicked"))?;
        }

        let mut first_error = None;
        for handle in self.infer_handles.drain(..) {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                Err(_) => {
                    first_error.get_or_insert_with(|| anyhow!("inference worker panicked"));
                }
            }
        }

        for handle in self.decode_handles.drain(..) {
            handle.join().map_err(|_| anyhow!("decode worker panicked"))?;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Snapshots the engine's counters and queue depths.
    #[must_use]
    pub fn sample_stats(&self) -> EngineStats {
        EngineStats {
            num_reads_corrected: self.shared.num_reads.load(Ordering::Relaxed),
            num_early_reads: self.shared.num_early_reads.load(Ordering::Relaxed),
            total_reads_in_input: self.shared.total_reads_in_input.load(Ordering::Relaxed),
            features_queue_depth: self.shared.features_queue.len(),
            inferred_queue_depth: self.shared.inferred_queue.len(),
        }
    }

    /// Logs the final progress count.
    pub fn log_final_progress(&self) {
        self.shared.progress.log_final();
    }
}

impl Drop for CorrectionEngine {
    fn drop(&mut self) {
        let _ = self.terminate();
    }
}

/// Concatenates a read's window strings and emits the resulting sequences.
fn emit_read(shared: &Shared, read_name: &str, windows: &[String]) {
    let corrected_seqs = concatenate_windows(windows);
    if corrected_seqs.len() == 1 {
        let mut seqs = corrected_seqs;
        let read = CorrectedRead { name: read_name.to_string(), seq: seqs.pop().unwrap() };
        if shared.sink.send(read).is_err() {
            debug!("Output sink disconnected");
        }
    } else {
        for (k, seq) in corrected_seqs.into_iter().enumerate() {
            let read = CorrectedRead { name: format!("{read_name}:{k}"), seq };
            if shared.sink.send(read).is_err() {
                debug!("Output sink disconnected");
            }
        }
    }
}

fn input_worker(shared: &Shared) {
    let thread_id = shared.feature_thread_ids.fetch_add(1, Ordering::SeqCst);
    if thread_id == 0 {
        shared
            .total_reads_in_input
            .store(shared.source.num_entries() as u64, Ordering::Relaxed);
    }

    while let PopResult::Item(alignments) = shared.input_queue.pop() {
        process_input_message(shared, alignments);
    }

    if shared.num_active_feature_threads.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.features_queue.terminate();
    }
}

fn process_input_message(shared: &Shared, mut alignments: CorrectionAlignments) {
    let tname = alignments.read_name.clone();

    if let Err(e) = alignments.populate(shared.source.as_ref()) {
        warn!("Dropping '{tname}': {e}");
        return;
    }

    let windows = match extract_windows(
        &alignments,
        shared.model.window_size,
        shared.model.min_window_overlap_frac,
    ) {
        Ok(windows) => windows,
        Err(e) => {
            error!("Dropping '{tname}': {e}");
            return;
        }
    };

    let wfs = match extract_features(&alignments, &windows, &shared.model) {
        Ok(wfs) => wfs,
        Err(e) => {
            error!("Dropping '{tname}': {e}");
            return;
        }
    };
    drop(alignments);

    // Windows that skip inference decode right here; the rest fan out.
    let mut corrected_seqs: Vec<String> = vec![String::new(); wfs.len()];
    let mut features_to_infer = Vec::new();
    for wf in wfs {
        if wf.needs_inference() {
            features_to_infer.push(wf);
        } else {
            corrected_seqs[wf.window_idx] = decode_window(&wf);
        }
    }

    if features_to_infer.is_empty() {
        shared.num_early_reads.fetch_add(1, Ordering::Relaxed);
        emit_read(shared, &tname, &corrected_seqs);
    } else {
        {
            let mut state = shared.reassembly.lock();
            if state.features_by_id.contains_key(&tname) {
                error!("Features for '{tname}' already exist, skipping duplicate");
                return;
            }
            state.features_by_id.insert(tname.clone(), corrected_seqs);
            state.pending_by_id.insert(tname.clone(), features_to_infer.len());
        }
        for wf in features_to_infer {
            if shared.features_queue.push(wf).is_err() {
                debug!("Features queue terminated while dispatching '{tname}'");
                break;
            }
        }
    }

    shared.num_reads.fetch_add(1, Ordering::Relaxed);
    shared.progress.add(1);
}

fn infer_worker(
    shared: &Shared,
    mut backend: Box<dyn InferenceBackend>,
    mtx_idx: usize,
    batch_size: usize,
) -> Result<()> {
    let result = infer_loop(shared, backend.as_mut(), mtx_idx, batch_size);

    if let Err(e) = &result {
        // Unwind the pipeline so upstream workers cannot block forever on a
        // stage that no longer drains.
        error!("Inference worker failed: {e:#}");
        shared.input_queue.terminate();
        shared.features_queue.terminate();
    }
    if shared.num_active_infer_threads.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.inferred_queue.terminate();
    }
    result
}

fn infer_loop(
    shared: &Shared,
    backend: &mut dyn InferenceBackend,
    mtx_idx: usize,
    batch_size: usize,
) -> Result<()> {
    let mut batch = InferenceBatch::new(batch_size);
    let mut last_reserve = Instant::now();

    loop {
        match shared.features_queue.pop_until(last_reserve + FLUSH_TIMEOUT) {
            PopResult::Terminate => break,
            PopResult::Timeout => {
                if !batch.is_empty() {
                    run_batch(shared, backend, &mut batch, mtx_idx)?;
                }
                last_reserve = Instant::now();
            }
            PopResult::Item(wf) => {
                if !batch.is_empty() && !batch.has_room(required_slots(&wf)) {
                    run_batch(shared, backend, &mut batch, mtx_idx)?;
                }
                batch.push(wf);
                last_reserve = Instant::now();
            }
        }
    }

    if !batch.is_empty() {
        run_batch(shared, backend, &mut batch, mtx_idx)?;
    }
    Ok(())
}

fn run_batch(
    shared: &Shared,
    backend: &mut dyn InferenceBackend,
    batch: &mut InferenceBatch,
    mtx_idx: usize,
) -> Result<()> {
    let inputs = batch.collate();

    let output = {
        let _device = shared.gpu_mutexes[mtx_idx].lock();
        match backend.forward(&inputs) {
            Ok(output) => output,
            Err(BackendError::Transient(msg)) => {
                warn!("Transient backend failure ('{msg}'), clearing cache and retrying");
                backend.clear_cache();
                backend.forward(&inputs).context("backend failed after cache-clear retry")?
            }
            Err(e @ BackendError::Fatal(_)) => return Err(anyhow!(e)),
        }
    };

    let preds = argmax_classes(&output.logits);
    for wf in batch.finish(&preds) {
        if shared.inferred_queue.push(wf).is_err() {
            debug!("Inferred queue terminated during flush");
            break;
        }
    }
    Ok(())
}

fn decode_worker(shared: &Shared) {
    while let PopResult::Item(wf) = shared.inferred_queue.pop() {
        let read_name = wf.read_name.clone();
        let window_idx = wf.window_idx;
        let corrected_seq = decode_window(&wf);
        if let Some(windows) = record_decoded(shared, &read_name, window_idx, corrected_seq) {
            emit_read(shared, &read_name, &windows);
        }
    }
}

/// Writes one decoded window into the reassembly maps; returns the full slot
/// vector once the read's last pending window lands.
fn record_decoded(
    shared: &Shared,
    read_name: &str,
    window_idx: usize,
    corrected_seq: String,
) -> Option<Vec<String>> {
    let mut state = shared.reassembly.lock();
    let Some(output_features) = state.features_by_id.get_mut(read_name) else {
        error!("Decoded feature list not found for '{read_name}'");
        return None;
    };
    output_features[window_idx] = corrected_seq;

    let pending = state
        .pending_by_id
        .get_mut(read_name)
        .expect("pending entry tracks every feature entry");
    *pending -= 1;
    if *pending > 0 {
        return None;
    }

    let windows = state.features_by_id.remove(read_name);
    state.pending_by_id.remove(read_name);
    windows
}
