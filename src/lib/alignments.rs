//! Overlap and CIGAR data model.
//!
//! One [`CorrectionAlignments`] message carries a single target read together
//! with every query read overlapping it. Messages arrive with names,
//! coordinates and CIGARs only; [`CorrectionAlignments::populate`] fetches the
//! sequences, normalizes reverse-strand queries to the target-forward frame,
//! and validates the producer's bookkeeping before the message enters the
//! pipeline.

use crate::dna::reverse_complement;
use crate::errors::{CorralError, Result};
use crate::fastx::SequenceSource;

/// One CIGAR run.
///
/// `Match` consumes target and query, `Ins` consumes query only, `Del`
/// consumes target only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarOp {
    /// Alignment match or mismatch.
    Match(u32),
    /// Insertion relative to the target.
    Ins(u32),
    /// Deletion relative to the target.
    Del(u32),
}

impl CigarOp {
    /// Parses a run from its length and SAM op character.
    ///
    /// `=` and `X` normalize to `Match`. Any other op is an error; the caller
    /// drops the whole message.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::UnknownCigarOp`] for unsupported op characters.
    pub fn from_len_and_char(len: u32, op: char, qname: &str) -> Result<Self> {
        match op {
            'M' | '=' | 'X' => Ok(CigarOp::Match(len)),
            'I' => Ok(CigarOp::Ins(len)),
            'D' => Ok(CigarOp::Del(len)),
            _ => Err(CorralError::UnknownCigarOp { op, qname: qname.to_string() }),
        }
    }

    /// The run length.
    #[must_use]
    pub fn len(&self) -> u32 {
        match *self {
            CigarOp::Match(l) | CigarOp::Ins(l) | CigarOp::Del(l) => l,
        }
    }

    /// Returns true for zero-length runs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(target_advance, query_advance)` for the full run.
    #[must_use]
    pub fn advances(&self) -> (u32, u32) {
        match *self {
            CigarOp::Match(l) => (l, l),
            CigarOp::Ins(l) => (0, l),
            CigarOp::Del(l) => (l, 0),
        }
    }
}

/// Iterates CIGAR runs as `(op, len, target_advance, query_advance)`.
pub fn cigar_runs(cigar: &[CigarOp]) -> impl Iterator<Item = (CigarOp, u32, u32, u32)> + '_ {
    cigar.iter().map(|&op| {
        let (t, q) = op.advances();
        (op, op.len(), t, q)
    })
}

/// One overlap of a query read against the target read.
///
/// Coordinates are half-open. After [`CorrectionAlignments::populate`] runs,
/// reverse-strand overlaps have their query sequence reverse-complemented and
/// `qstart`/`qend` remapped into that frame, so every CIGAR walk is
/// target-forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    /// Start of the aligned span on the target.
    pub tstart: u32,
    /// End of the aligned span on the target.
    pub tend: u32,
    /// Start of the aligned span on the query.
    pub qstart: u32,
    /// End of the aligned span on the query.
    pub qend: u32,
    /// Full query length reported by the producer.
    pub qlen: u32,
    /// Full target length reported by the producer.
    pub tlen: u32,
    /// Query strand; false means the query aligns reverse-complemented.
    pub fwd: bool,
}

impl Overlap {
    /// Target bases covered by the overlap.
    #[must_use]
    pub fn target_span(&self) -> u32 {
        self.tend - self.tstart
    }

    /// Query bases covered by the overlap.
    #[must_use]
    pub fn query_span(&self) -> u32 {
        self.qend - self.qstart
    }
}

/// A target read plus all query reads overlapping it.
///
/// The vectors are parallel: entry `i` of `qnames`, `seqs`, `quals`,
/// `overlaps` and `cigars` describe the same alignment.
#[derive(Debug, Clone, Default)]
pub struct CorrectionAlignments {
    /// Target read name.
    pub read_name: String,
    /// Target read bases; filled by `populate`.
    pub read_seq: Vec<u8>,
    /// Target read qualities (ASCII Phred+33); filled by `populate`.
    pub read_qual: Vec<u8>,
    /// Query read names.
    pub qnames: Vec<String>,
    /// Query read bases; filled by `populate`, strand-normalized.
    pub seqs: Vec<Vec<u8>>,
    /// Query read qualities; filled by `populate`, strand-normalized.
    pub quals: Vec<Vec<u8>>,
    /// Overlap coordinates per query.
    pub overlaps: Vec<Overlap>,
    /// Target-forward CIGARs per query.
    pub cigars: Vec<Vec<CigarOp>>,
}

impl CorrectionAlignments {
    /// Creates an unpopulated message from producer output.
    #[must_use]
    pub fn new(
        read_name: String,
        qnames: Vec<String>,
        overlaps: Vec<Overlap>,
        cigars: Vec<Vec<CigarOp>>,
    ) -> Self {
        Self {
            read_name,
            read_seq: Vec::new(),
            read_qual: Vec::new(),
            qnames,
            seqs: Vec::new(),
            quals: Vec::new(),
            overlaps,
            cigars,
        }
    }

    /// Number of overlaps in the message.
    #[must_use]
    pub fn num_overlaps(&self) -> usize {
        self.overlaps.len()
    }

    /// Fetches sequences from `source`, normalizes strands, and validates the
    /// message.
    ///
    /// Reported lengths are checked against the sequences actually fetched;
    /// the overlap producer and the sequence source occasionally disagree and
    /// such messages must be dropped rather than corrected.
    ///
    /// # Errors
    ///
    /// Any validation failure aborts the whole message.
    pub fn populate(&mut self, source: &dyn SequenceSource) -> Result<()> {
        let (seq, qual) = source
            .fetch(&self.read_name)
            .ok_or_else(|| CorralError::ReadNotFound { name: self.read_name.clone() })?;
        self.read_seq = seq;
        self.read_qual = qual;

        let tlen = self.read_seq.len();
        self.seqs = Vec::with_capacity(self.qnames.len());
        self.quals = Vec::with_capacity(self.qnames.len());

        for i in 0..self.qnames.len() {
            let qname = &self.qnames[i];
            let overlap = &mut self.overlaps[i];
            if overlap.tlen as usize != tlen {
                return Err(CorralError::LengthMismatch {
                    name: self.read_name.clone(),
                    reported: overlap.tlen as usize,
                    actual: tlen,
                });
            }

            let (mut seq, mut qual) = source
                .fetch(qname)
                .ok_or_else(|| CorralError::ReadNotFound { name: qname.clone() })?;
            if overlap.qlen as usize != seq.len() {
                return Err(CorralError::LengthMismatch {
                    name: qname.clone(),
                    reported: overlap.qlen as usize,
                    actual: seq.len(),
                });
            }

            if !overlap.fwd {
                seq = reverse_complement(&seq);
                qual.reverse();
                let (qstart, qend) = (overlap.qstart, overlap.qend);
                overlap.qstart = overlap.qlen - qend;
                overlap.qend = overlap.qlen - qstart;
            }

            self.seqs.push(seq);
            self.quals.push(qual);
        }

        self.check_consistent_overlaps()
    }

    /// Validates coordinate and CIGAR-consumption invariants for every
    /// overlap.
    ///
    /// # Errors
    ///
    /// Returns [`CorralError::InconsistentOverlap`] naming the first offender.
    pub fn check_consistent_overlaps(&self) -> Result<()> {
        for (i, overlap) in self.overlaps.iter().enumerate() {
            let qname = &self.qnames[i];
            let inconsistent = |reason: String| CorralError::InconsistentOverlap {
                tname: self.read_name.clone(),
                qname: qname.clone(),
                reason,
            };

            if overlap.tstart >= overlap.tend || overlap.tend > overlap.tlen {
                return Err(inconsistent(format!(
                    "target interval [{}, {}) outside [0, {})",
                    overlap.tstart, overlap.tend, overlap.tlen
                )));
            }
            if overlap.qstart >= overlap.qend || overlap.qend > overlap.qlen {
                return Err(inconsistent(format!(
                    "query interval [{}, {}) outside [0, {})",
                    overlap.qstart, overlap.qend, overlap.qlen
                )));
            }

            let (mut t_consumed, mut q_consumed) = (0u32, 0u32);
            for (_, _, t, q) in cigar_runs(&self.cigars[i]) {
                t_consumed += t;
                q_consumed += q;
            }
            if t_consumed != overlap.target_span() {
                return Err(inconsistent(format!(
                    "CIGAR consumes {} target bases, overlap spans {}",
                    t_consumed,
                    overlap.target_span()
                )));
            }
            if q_consumed != overlap.query_span() {
                return Err(inconsistent(format!(
                    "CIGAR consumes {} query bases, overlap spans {}",
                    q_consumed,
                    overlap.query_span()
                )));
            }
        }
        Ok(())
    }
}
