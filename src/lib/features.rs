//! Per-window MSA feature construction.
//!
//! Each window becomes a small multi-sequence alignment: row 0 is the target
//! slice, and each [`OverlapWindow`] contributes one query row. Insertions
//! relative to the target open extra columns, budgeted per target position by
//! the longest insertion any kept row places there. The resulting `bases` and
//! `quals` tensors, the supported-column list, and bookkeeping travel together
//! as [`WindowFeatures`] through the inference and decode stages.
//!
//! Base classes (11 valid values, `0..=10`):
//!
//! | code | symbol | meaning |
//! |------|--------|---------|
//! | 0-3  | `A C G T` | forward-strand base |
//! | 4    | `*`    | gap (deletion, or absent insertion) |
//! | 5-8  | `a c g t` | reverse-strand base |
//! | 9    | `N`    | ambiguous |
//! | 10   | `.`    | no coverage at this column |
//!
//! The collation padding value is one past the last class; see
//! [`crate::batcher::PAD_BASE`].

use ndarray::{Array1, Array2};

use crate::alignments::{CigarOp, CorrectionAlignments};
use crate::errors::{CorralError, Result};
use crate::model::ModelConfig;
use crate::phred::normalize_qual;
use crate::windows::{segment_ops, window_len, OverlapWindow};

/// Number of valid base classes.
pub const NUM_BASE_CLASSES: usize = 11;

/// Class code for the gap symbol `*`.
pub const GAP_CODE: i8 = 4;

/// Class code for an uncovered column.
pub const NO_COVERAGE_CODE: i8 = 10;

/// Decoding table, class code to symbol.
pub const BASE_DECODING: [u8; NUM_BASE_CLASSES] =
    [b'A', b'C', b'G', b'T', b'*', b'a', b'c', b'g', b't', b'N', b'.'];

/// Maximum MSA rows per window, including the target row. Overlap segments
/// beyond the cap are ignored; the model input width is fixed.
pub const MAX_WINDOW_ALNS: usize = 30;

/// Encodes a base byte into its class code.
///
/// Reverse-strand rows use the lowercase class range so the model sees strand
/// identity. Anything outside `ACGT` encodes as `N`.
#[inline]
#[must_use]
pub fn encode_base(base: u8, fwd: bool) -> i8 {
    let code = match base.to_ascii_uppercase() {
        b'A' => 0,
        b'C' => 1,
        b'G' => 2,
        b'T' => 3,
        b'*' => return GAP_CODE,
        _ => return 9,
    };
    if fwd { code } else { code + 5 }
}

/// Folds strand out of a class code for comparisons (`a` compares equal to
/// `A`).
#[inline]
#[must_use]
pub fn fold_strand(code: i8) -> i8 {
    if (5..=8).contains(&code) { code - 5 } else { code }
}

/// The MSA feature tensor for one window, plus inference bookkeeping.
#[derive(Debug, Clone)]
pub struct WindowFeatures {
    /// Target read name.
    pub read_name: String,
    /// Window position within the target.
    pub window_idx: usize,
    /// Class codes, shape `[n_alns, length]`.
    pub bases: Array2<i8>,
    /// Normalized qualities, shape `[n_alns, length]`.
    pub quals: Array2<f32>,
    /// Supported MSA column indices as the backend-facing tensor.
    pub indices: Array1<i32>,
    /// Supported MSA column indices, host side.
    pub supported: Vec<usize>,
    /// MSA column count.
    pub length: usize,
    /// MSA row count, including the target row.
    pub n_alns: usize,
    /// Backend predictions, one class per supported column; set by the
    /// inference stage.
    pub inferred_bases: Option<Vec<u8>>,
}

impl WindowFeatures {
    /// True if this window must go through the inference stage.
    #[must_use]
    pub fn needs_inference(&self) -> bool {
        self.n_alns > 1 && !self.supported.is_empty()
    }
}

/// Builds [`WindowFeatures`] for every window of a populated message.
///
/// # Errors
///
/// Returns [`CorralError::WindowLengthMismatch`] if a row's CIGAR walk
/// consumes a different query interval than its segment recorded; the caller
/// drops the whole message.
pub fn extract_features(
    alignments: &CorrectionAlignments,
    windows: &[Vec<OverlapWindow>],
    config: &ModelConfig,
) -> Result<Vec<WindowFeatures>> {
    let tlen = alignments.read_seq.len();
    let window_size = config.window_size;

    windows
        .iter()
        .enumerate()
        .map(|(window_idx, overlap_windows)| {
            build_window(alignments, window_idx, overlap_windows, window_size, tlen, config)
        })
        .collect()
}

fn build_window(
    alignments: &CorrectionAlignments,
    window_idx: usize,
    overlap_windows: &[OverlapWindow],
    window_size: usize,
    tlen: usize,
    config: &ModelConfig,
) -> Result<WindowFeatures> {
    let win_start = window_idx * window_size;
    let wlen = window_len(window_idx, tlen, window_size);
    let rows = &overlap_windows[..overlap_windows.len().min(MAX_WINDOW_ALNS - 1)];

    // Column budget: the longest insertion any kept row places after each
    // target position.
    let mut max_ins = vec![0u32; wlen];
    for ow in rows {
        let entry_rel = ow.tstart as usize - win_start;
        let mut consumed_t = 0usize;
        for op in segment_ops(&alignments.cigars[ow.overlap_idx], ow) {
            match op {
                CigarOp::Match(l) | CigarOp::Del(l) => consumed_t += l as usize,
                CigarOp::Ins(l) => {
                    // An insertion before the segment's first target base
                    // anchors in the previous window; it consumes query bases
                    // but opens no column here.
                    if consumed_t > 0 {
                        let anchor = entry_rel + consumed_t - 1;
                        max_ins[anchor] = max_ins[anchor].max(l);
                    }
                }
            }
        }
    }

    // Column offset of each target position, insertions interleaved after
    // their anchor.
    let mut col_offset = vec![0usize; wlen + 1];
    for p in 0..wlen {
        col_offset[p + 1] = col_offset[p] + 1 + max_ins[p] as usize;
    }
    let width = col_offset[wlen];

    let n_alns = 1 + rows.len();
    let mut bases = Array2::from_elem((n_alns, width), NO_COVERAGE_CODE);
    let mut quals = Array2::zeros((n_alns, width));

    // Row 0: the target slice, gaps at insertion columns.
    for p in 0..wlen {
        let col = col_offset[p];
        bases[[0, col]] = encode_base(alignments.read_seq[win_start + p], true);
        quals[[0, col]] = normalize_qual(alignments.read_qual[win_start + p]);
        for ins_col in col + 1..col_offset[p + 1] {
            bases[[0, ins_col]] = GAP_CODE;
        }
    }

    for (row, ow) in rows.iter().enumerate().map(|(i, ow)| (i + 1, ow)) {
        fill_query_row(
            alignments,
            ow,
            row,
            window_idx,
            win_start,
            wlen,
            &col_offset,
            width,
            &mut bases,
            &mut quals,
        )?;
    }

    let supported = find_supported(&bases, config.min_supported_coverage);
    let indices = Array1::from_iter(supported.iter().map(|&col| col as i32));

    Ok(WindowFeatures {
        read_name: alignments.read_name.clone(),
        window_idx,
        bases,
        quals,
        indices,
        supported,
        length: width,
        n_alns,
        inferred_bases: None,
    })
}

#[allow(clippy::too_many_arguments)]
fn fill_query_row(
    alignments: &CorrectionAlignments,
    ow: &OverlapWindow,
    row: usize,
    window_idx: usize,
    win_start: usize,
    wlen: usize,
    col_offset: &[usize],
    width: usize,
    bases: &mut Array2<i8>,
    quals: &mut Array2<f32>,
) -> Result<()> {
    let overlap = &alignments.overlaps[ow.overlap_idx];
    let seq = &alignments.seqs[ow.overlap_idx];
    let qual = &alignments.quals[ow.overlap_idx];
    let fwd = overlap.fwd;

    let entry_rel = ow.tstart as usize - win_start;
    let end_rel = ow.tend as usize - win_start;

    // Gap-fill the row's span first; matches and insertions overwrite it, so
    // deletions and shorter-than-budget insertions come out as `*`.
    let span_start = col_offset[entry_rel];
    let span_end = if end_rel < wlen { col_offset[end_rel] } else { width };
    for col in span_start..span_end {
        bases[[row, col]] = GAP_CODE;
    }

    let mut tpos = entry_rel;
    let mut q = ow.qstart as usize;
    for op in segment_ops(&alignments.cigars[ow.overlap_idx], ow) {
        match op {
            CigarOp::Match(l) => {
                for k in 0..l as usize {
                    let col = col_offset[tpos + k];
                    bases[[row, col]] = encode_base(seq[q + k], fwd);
                    quals[[row, col]] = normalize_qual(qual[q + k]);
                }
                tpos += l as usize;
                q += l as usize;
            }
            CigarOp::Del(l) => {
                tpos += l as usize;
            }
            CigarOp::Ins(l) => {
                if tpos > entry_rel {
                    let anchor_col = col_offset[tpos - 1];
                    for k in 0..l as usize {
                        bases[[row, anchor_col + 1 + k]] = encode_base(seq[q + k], fwd);
                        quals[[row, anchor_col + 1 + k]] = normalize_qual(qual[q + k]);
                    }
                }
                q += l as usize;
            }
        }
    }

    if q != ow.qend as usize {
        return Err(CorralError::WindowLengthMismatch {
            name: alignments.read_name.clone(),
            window_idx,
            walked: q - ow.qstart as usize,
            recorded: ow.consumed_query() as usize,
        });
    }
    Ok(())
}

/// Columns eligible for model-driven correction: covered by at least
/// `min_coverage` query rows and not uniformly equal to the target base.
fn find_supported(bases: &Array2<i8>, min_coverage: usize) -> Vec<usize> {
    let (n_rows, width) = bases.dim();
    let mut supported = Vec::new();
    for col in 0..width {
        let target = fold_strand(bases[[0, col]]);
        let mut coverage = 0usize;
        let mut disagrees = false;
        for row in 1..n_rows {
            let code = bases[[row, col]];
            if code == NO_COVERAGE_CODE {
                continue;
            }
            coverage += 1;
            if fold_strand(code) != target {
                disagrees = true;
            }
        }
        if coverage >= min_coverage && disagrees {
            supported.push(col);
        }
    }
    supported
}
