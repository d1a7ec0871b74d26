//! PAF overlap ingestion.
//!
//! Adapts minimap2 all-vs-all PAF output (with `cg:Z` CIGAR tags) into
//! [`CorrectionAlignments`] messages. Rows must be grouped by target name
//! (column 6), e.g. via `sort -k6,6`; a group is emitted when the target
//! changes. Malformed rows are logged and skipped so one bad alignment does
//! not sink the file.

use std::fs::File;
use std::io::{BufRead, BufReader, Lines, Read};
use std::path::Path;

use flate2::read::MultiGzDecoder;
use log::warn;

use crate::alignments::{CigarOp, CorrectionAlignments, Overlap};
use crate::errors::{CorralError, Result};

/// One parsed PAF row, before grouping.
struct PafRow {
    qname: String,
    tname: String,
    overlap: Overlap,
    cigar: Vec<CigarOp>,
}

/// Parses the `cg:Z` CIGAR string.
fn parse_cigar(text: &str, qname: &str) -> Result<Vec<CigarOp>> {
    let mut ops = Vec::new();
    let mut len = 0u32;
    for c in text.chars() {
        if let Some(digit) = c.to_digit(10) {
            len = len * 10 + digit;
        } else {
            if len == 0 {
                return Err(CorralError::UnknownCigarOp { op: c, qname: qname.to_string() });
            }
            ops.push(CigarOp::from_len_and_char(len, c, qname)?);
            len = 0;
        }
    }
    if len != 0 {
        return Err(CorralError::InvalidParameter {
            parameter: "cg".to_string(),
            reason: format!("trailing length in CIGAR for '{qname}'"),
        });
    }
    Ok(ops)
}

fn parse_row(line: &str) -> Result<PafRow> {
    let invalid = |reason: &str| CorralError::InvalidParameter {
        parameter: "paf".to_string(),
        reason: reason.to_string(),
    };

    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < 12 {
        return Err(invalid("fewer than 12 columns"));
    }

    let qname = fields[0].to_string();
    let qlen: u32 = fields[1].parse().map_err(|_| invalid("bad qlen"))?;
    let qstart: u32 = fields[2].parse().map_err(|_| invalid("bad qstart"))?;
    let qend: u32 = fields[3].parse().map_err(|_| invalid("bad qend"))?;
    let fwd = match fields[4] {
        "+" => true,
        "-" => false,
        _ => return Err(invalid("bad strand")),
    };
    let tname = fields[5].to_string();
    let tlen: u32 = fields[6].parse().map_err(|_| invalid("bad tlen"))?;
    let tstart: u32 = fields[7].parse().map_err(|_| invalid("bad tstart"))?;
    let tend: u32 = fields[8].parse().map_err(|_| invalid("bad tend"))?;

    let cigar_text = fields[12..]
        .iter()
        .find_map(|f| f.strip_prefix("cg:Z:"))
        .ok_or_else(|| invalid("missing cg:Z tag"))?;
    let cigar = parse_cigar(cigar_text, &qname)?;

    Ok(PafRow {
        qname,
        tname,
        overlap: Overlap { tstart, tend, qstart, qend, qlen, tlen, fwd },
        cigar,
    })
}

/// Streams target-grouped [`CorrectionAlignments`] out of a PAF file.
pub struct PafGroupReader {
    lines: Lines<BufReader<Box<dyn Read + Send>>>,
    current: Option<CorrectionAlignments>,
    line_no: usize,
}

impl PafGroupReader {
    /// Opens a PAF file, transparently decompressing `.gz` inputs.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| CorralError::InvalidParameter {
            parameter: "alignments".to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;
        let reader: Box<dyn Read + Send> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(Self { lines: BufReader::new(reader).lines(), current: None, line_no: 0 })
    }

    fn push_row(&mut self, row: PafRow) -> Option<CorrectionAlignments> {
        let same_target =
            self.current.as_ref().is_some_and(|group| group.read_name == row.tname);
        let emitted = if same_target { None } else { self.current.take() };

        let group = self.current.get_or_insert_with(|| {
            CorrectionAlignments::new(row.tname.clone(), Vec::new(), Vec::new(), Vec::new())
        });
        group.qnames.push(row.qname);
        group.overlaps.push(row.overlap);
        group.cigars.push(row.cigar);

        emitted
    }
}

impl Iterator for PafGroupReader {
    type Item = CorrectionAlignments;

    fn next(&mut self) -> Option<CorrectionAlignments> {
        while let Some(line) = self.lines.next() {
            self.line_no += 1;
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Stopping PAF read at line {}: {e}", self.line_no);
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            match parse_row(&line) {
                Ok(row) if row.qname == row.tname => {
                    // Self-overlaps carry no information for correction.
                }
                Ok(row) => {
                    if let Some(group) = self.push_row(row) {
                        return Some(group);
                    }
                }
                Err(e) => warn!("Skipping PAF line {}: {e}", self.line_no),
            }
        }
        self.current.take()
    }
}
