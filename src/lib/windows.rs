//! Window partitioning.
//!
//! The target read is cut into fixed-width windows in target coordinates.
//! Each overlap is walked target-forward along its CIGAR and split at every
//! window boundary it crosses, producing per-window [`OverlapWindow`]
//! segments. CIGAR runs that straddle a boundary are split with intra-op
//! offsets; the run itself is never copied.

use crate::alignments::{CigarOp, CorrectionAlignments};
use crate::errors::{CorralError, Result};

/// A cursor into a CIGAR: op index plus bases consumed within that op.
///
/// Cursors are half-open: a segment covers `[start, end)` in consumed-base
/// order, and an offset equal to the op length is equivalent to offset 0 of
/// the next op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CigarCursor {
    /// Index of the op within the overlap's CIGAR.
    pub idx: usize,
    /// Bases of that op already consumed.
    pub offset: u32,
}

/// The part of one overlap that falls inside one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlapWindow {
    /// Index of the overlap within its `CorrectionAlignments`.
    pub overlap_idx: usize,
    /// Absolute target position where the segment enters the window.
    pub tstart: u32,
    /// Absolute target position where the segment leaves the window.
    pub tend: u32,
    /// Query interval consumed by the segment (strand-normalized coords).
    pub qstart: u32,
    /// End of the query interval consumed by the segment.
    pub qend: u32,
    /// First CIGAR position of the segment.
    pub cigar_start: CigarCursor,
    /// CIGAR position just past the segment.
    pub cigar_end: CigarCursor,
}

impl OverlapWindow {
    /// Target bases the segment consumes.
    #[must_use]
    pub fn consumed_target(&self) -> u32 {
        self.tend - self.tstart
    }

    /// Query bases the segment consumes.
    #[must_use]
    pub fn consumed_query(&self) -> u32 {
        self.qend - self.qstart
    }
}

/// Number of windows covering a target of length `tlen`.
#[must_use]
pub fn num_windows(tlen: usize, window_size: usize) -> usize {
    tlen.div_ceil(window_size)
}

/// Length of window `idx` for a target of length `tlen`.
#[must_use]
pub fn window_len(idx: usize, tlen: usize, window_size: usize) -> usize {
    (tlen - idx * window_size).min(window_size)
}

/// Splits every overlap of `alignments` into per-window segments.
///
/// Returns one segment list per window. An overlap contributes to a window
/// only if its consumed target length covers at least
/// `min_window_overlap_frac` of the window (and is nonzero).
///
/// # Errors
///
/// Returns [`CorralError::InconsistentOverlap`] if a walk ends away from the
/// overlap's recorded end coordinates; callers drop the message.
pub fn extract_windows(
    alignments: &CorrectionAlignments,
    window_size: usize,
    min_window_overlap_frac: f32,
) -> Result<Vec<Vec<OverlapWindow>>> {
    let tlen = alignments.read_seq.len();
    let ws = window_size as u32;
    let mut windows: Vec<Vec<OverlapWindow>> = vec![Vec::new(); num_windows(tlen, window_size)];

    for (overlap_idx, overlap) in alignments.overlaps.iter().enumerate() {
        let cigar = &alignments.cigars[overlap_idx];
        let mut t = overlap.tstart;
        let mut q = overlap.qstart;

        // Open segment state.
        let mut seg_t = t;
        let mut seg_q = q;
        let mut seg_cursor = CigarCursor { idx: 0, offset: 0 };

        let close = |windows: &mut Vec<Vec<OverlapWindow>>,
                         seg_t: u32,
                         seg_q: u32,
                         seg_cursor: CigarCursor,
                         t: u32,
                         q: u32,
                         end_cursor: CigarCursor| {
            if t == seg_t {
                return;
            }
            let window_idx = (seg_t / ws) as usize;
            let wlen = window_len(window_idx, tlen, window_size) as f32;
            if (t - seg_t) as f32 >= min_window_overlap_frac * wlen {
                windows[window_idx].push(OverlapWindow {
                    overlap_idx,
                    tstart: seg_t,
                    tend: t,
                    qstart: seg_q,
                    qend: q,
                    cigar_start: seg_cursor,
                    cigar_end: end_cursor,
                });
            }
        };

        for (op_idx, op) in cigar.iter().enumerate() {
            match *op {
                CigarOp::Ins(l) => {
                    q += l;
                }
                CigarOp::Match(len) | CigarOp::Del(len) => {
                    let consumes_query = matches!(op, CigarOp::Match(_));
                    let mut offset = 0u32;
                    while offset < len {
                        let window_end = (t / ws + 1) * ws;
                        let step = (len - offset).min(window_end - t);
                        t += step;
                        if consumes_query {
                            q += step;
                        }
                        offset += step;
                        if t == window_end && t < overlap.tend {
                            let boundary = CigarCursor { idx: op_idx, offset };
                            close(&mut windows, seg_t, seg_q, seg_cursor, t, q, boundary);
                            seg_t = t;
                            seg_q = q;
                            seg_cursor = boundary;
                        }
                    }
                }
            }
        }

        if t != overlap.tend || q != overlap.qend {
            return Err(CorralError::InconsistentOverlap {
                tname: alignments.read_name.clone(),
                qname: alignments.qnames[overlap_idx].clone(),
                reason: format!(
                    "window walk ended at ({t}, {q}), expected ({}, {})",
                    overlap.tend, overlap.qend
                ),
            });
        }
        close(
            &mut windows,
            seg_t,
            seg_q,
            seg_cursor,
            t,
            q,
            CigarCursor { idx: cigar.len(), offset: 0 },
        );
    }

    Ok(windows)
}

/// Iterates the `(op, len)` runs of a segment, clipping the first and last
/// ops to the segment's cursors.
pub fn segment_ops<'a>(
    cigar: &'a [CigarOp],
    window: &OverlapWindow,
) -> impl Iterator<Item = CigarOp> + 'a {
    let start = window.cigar_start;
    let end = window.cigar_end;
    cigar
        .iter()
        .enumerate()
        .skip(start.idx)
        .take_while(move |(i, _)| *i < end.idx || (*i == end.idx && end.offset > 0))
        .filter_map(move |(i, op)| {
            let len = op.len();
            let from = if i == start.idx { start.offset } else { 0 };
            let to = if i == end.idx { end.offset.min(len) } else { len };
            if from >= to {
                // An op fully consumed by the previous segment; only target
                // ops ever split, so insertions never land here.
                return None;
            }
            Some(match op {
                CigarOp::Match(_) => CigarOp::Match(to - from),
                CigarOp::Del(_) => CigarOp::Del(to - from),
                CigarOp::Ins(l) => CigarOp::Ins(*l),
            })
        })
}
