//! Inference batch accumulation and collation.
//!
//! Windows vary wildly in MSA width, so batches are budgeted in slots rather
//! than window counts: a window claims `length / SLOT_COLUMNS + 1` slots and
//! the accumulator flushes when a window no longer fits. Collation transposes
//! each window to `[W, R]` and right-pads both axes to the batch maxima.

use ndarray::{Array1, Array2, Array3};

use crate::backend::{BatchInputs, NUM_PRED_CLASSES};
use crate::decode::PRED_DECODING;
use crate::features::WindowFeatures;

/// Window columns per batch slot. A window claims
/// `length / SLOT_COLUMNS + 1` slots; the cap is empirical, tied to model
/// memory per column.
pub const SLOT_COLUMNS: usize = 5120;

/// Padding value for collated base tensors: one past the last valid class.
pub const PAD_BASE: i32 = 11;

/// Padding value for collated quality tensors.
pub const PAD_QUAL: f32 = 0.0;

/// Batch slots a window claims.
#[must_use]
pub fn required_slots(wf: &WindowFeatures) -> usize {
    wf.length / SLOT_COLUMNS + 1
}

/// Accumulates windows until the slot budget forces a flush.
pub struct InferenceBatch {
    batch_size: usize,
    remaining_slots: usize,
    bases_batch: Vec<Array2<i32>>,
    quals_batch: Vec<Array2<f32>>,
    lengths: Vec<i32>,
    sizes: Vec<usize>,
    indices_batch: Vec<Array1<i32>>,
    wfs: Vec<WindowFeatures>,
}

impl InferenceBatch {
    /// Creates an empty accumulator with `batch_size` slots.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            remaining_slots: batch_size,
            bases_batch: Vec::new(),
            quals_batch: Vec::new(),
            lengths: Vec::new(),
            sizes: Vec::new(),
            indices_batch: Vec::new(),
            wfs: Vec::new(),
        }
    }

    /// True if no windows are accumulated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.wfs.is_empty()
    }

    /// Number of accumulated windows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.wfs.len()
    }

    /// True if a window claiming `slots` fits without flushing.
    #[must_use]
    pub fn has_room(&self, slots: usize) -> bool {
        slots <= self.remaining_slots
    }

    /// Accepts a window, claiming its slots.
    ///
    /// The caller checks [`InferenceBatch::has_room`] first; an oversized
    /// window is still accepted into an empty batch rather than dropped.
    pub fn push(&mut self, wf: WindowFeatures) {
        let slots = required_slots(&wf);
        self.bases_batch.push(wf.bases.t().mapv(i32::from));
        self.quals_batch.push(wf.quals.t().to_owned());
        self.lengths.push(wf.length as i32);
        self.sizes.push(wf.supported.len());
        self.indices_batch.push(wf.indices.clone());
        self.wfs.push(wf);
        self.remaining_slots = self.remaining_slots.saturating_sub(slots);
    }

    /// Collates the accumulated windows into backend inputs.
    ///
    /// Bases pad with [`PAD_BASE`], qualities with [`PAD_QUAL`].
    #[must_use]
    pub fn collate(&self) -> BatchInputs {
        let batch = self.bases_batch.len();
        let max_w = self.bases_batch.iter().map(|a| a.dim().0).max().unwrap_or(0);
        let max_r = self.bases_batch.iter().map(|a| a.dim().1).max().unwrap_or(0);

        let mut bases = Array3::from_elem((batch, max_w, max_r), PAD_BASE);
        let mut quals = Array3::from_elem((batch, max_w, max_r), PAD_QUAL);
        for (b, (wb, wq)) in self.bases_batch.iter().zip(&self.quals_batch).enumerate() {
            let (w, r) = wb.dim();
            bases.slice_mut(ndarray::s![b, ..w, ..r]).assign(wb);
            quals.slice_mut(ndarray::s![b, ..w, ..r]).assign(wq);
        }

        BatchInputs {
            bases,
            quals,
            lengths: Array1::from_vec(self.lengths.clone()),
            indices: self.indices_batch.clone(),
        }
    }

    /// Splits flat predictions back to windows and drains the accumulator.
    ///
    /// `preds` holds one class per supported column, windows concatenated in
    /// push order. Every returned window carries populated `inferred_bases`.
    ///
    /// # Panics
    ///
    /// Panics if `preds` does not cover exactly the accumulated supported
    /// columns; the backend contract guarantees it does.
    pub fn finish(&mut self, preds: &[u8]) -> Vec<WindowFeatures> {
        assert_eq!(
            preds.len(),
            self.sizes.iter().sum::<usize>(),
            "backend returned a prediction count inconsistent with the batch"
        );

        let mut wfs = std::mem::take(&mut self.wfs);
        let mut offset = 0usize;
        for (wf, &size) in wfs.iter_mut().zip(&self.sizes) {
            let decoded =
                preds[offset..offset + size].iter().map(|&c| PRED_DECODING[c as usize]).collect();
            wf.inferred_bases = Some(decoded);
            offset += size;
        }

        self.bases_batch.clear();
        self.quals_batch.clear();
        self.lengths.clear();
        self.sizes.clear();
        self.indices_batch.clear();
        self.remaining_slots = self.batch_size;
        wfs
    }
}

/// Argmax over the class axis of `[N, NUM_PRED_CLASSES]` logits.
#[must_use]
pub fn argmax_classes(logits: &Array2<f32>) -> Vec<u8> {
    let (n, classes) = logits.dim();
    debug_assert_eq!(classes, NUM_PRED_CLASSES);
    (0..n)
        .map(|row| {
            let mut best = 0usize;
            for class in 1..classes {
                if logits[[row, class]] > logits[[row, best]] {
                    best = class;
                }
            }
            best as u8
        })
        .collect()
}
