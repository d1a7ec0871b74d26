//! Window decoding and consensus concatenation.
//!
//! A window decodes to a plain base string. Trivial windows reproduce the
//! target slice; inferred windows overlay the backend's predictions on the
//! supported columns first. Per-read window strings are then concatenated,
//! with empty strings splitting the read into separate output sequences.

use crate::features::{WindowFeatures, BASE_DECODING, GAP_CODE, NO_COVERAGE_CODE};

/// Decoding table for backend prediction classes.
pub const PRED_DECODING: [u8; 5] = [b'A', b'C', b'G', b'T', b'*'];

/// Decodes one window into its consensus string.
///
/// Without predictions this emits the target slice (row 0 minus gap columns),
/// preserving base identity where coverage was too low to justify inference.
/// With predictions, each supported column takes the predicted symbol; a
/// predicted `*` deletes the column. The result may be empty.
#[must_use]
pub fn decode_window(wf: &WindowFeatures) -> String {
    let mut out = Vec::with_capacity(wf.length);

    match &wf.inferred_bases {
        None => {
            for col in 0..wf.length {
                let code = wf.bases[[0, col]];
                if code != GAP_CODE && code != NO_COVERAGE_CODE {
                    out.push(BASE_DECODING[code as usize]);
                }
            }
        }
        Some(preds) => {
            debug_assert_eq!(preds.len(), wf.supported.len());
            let mut next_supported = 0usize;
            for col in 0..wf.length {
                let symbol = if next_supported < wf.supported.len()
                    && wf.supported[next_supported] == col
                {
                    let pred = preds[next_supported];
                    next_supported += 1;
                    pred
                } else {
                    let code = wf.bases[[0, col]];
                    if code == GAP_CODE || code == NO_COVERAGE_CODE {
                        continue;
                    }
                    BASE_DECODING[code as usize]
                };
                if symbol != b'*' {
                    out.push(symbol);
                }
            }
        }
    }

    // Row 0 only holds uppercase classes, so this is already a plain string.
    String::from_utf8(out).expect("decoded bases are ASCII")
}

/// Joins per-window consensus strings into output sequences.
///
/// Maximal runs of non-empty strings concatenate in order; an empty string
/// closes the current run. A read therefore splits wherever a window produced
/// no confident consensus.
#[must_use]
pub fn concatenate_windows(cons: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();

    for s in cons {
        if s.is_empty() {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
        } else {
            current.push_str(s);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
