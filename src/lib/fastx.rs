//! Sequence sources.
//!
//! The correction engine looks reads up by name while populating alignment
//! messages. [`SequenceSource`] is that lookup seam; [`FastxSource`] is the
//! shipped implementation, an in-memory index over a FASTQ file (optionally
//! gzip-compressed). [`MemorySource`] backs tests and embedding callers.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use flate2::read::MultiGzDecoder;
use seq_io::fastq::{Reader as FastqReader, Record};

use crate::errors::{CorralError, Result};

/// Random access to read sequences and qualities by name.
pub trait SequenceSource: Send + Sync {
    /// Returns `(seq, qual)` for a read, or `None` if unknown.
    fn fetch(&self, name: &str) -> Option<(Vec<u8>, Vec<u8>)>;

    /// Total number of reads in the source.
    fn num_entries(&self) -> usize;
}

/// An in-memory sequence source over a FASTQ(.gz) file.
pub struct FastxSource {
    reads: HashMap<String, (Vec<u8>, Vec<u8>)>,
}

impl FastxSource {
    /// Loads a FASTQ file, transparently decompressing `.gz` inputs.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or is not valid FASTQ, or if two
    /// records share a name.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| CorralError::InvalidParameter {
            parameter: "fastq".to_string(),
            reason: format!("{}: {e}", path.display()),
        })?;

        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(MultiGzDecoder::new(file))
        } else {
            Box::new(file)
        };

        Self::from_reader(reader, &path.display().to_string())
    }

    fn from_reader(reader: impl Read, label: &str) -> Result<Self> {
        let mut fastq = FastqReader::new(reader);
        let mut reads = HashMap::new();

        while let Some(record) = fastq.next() {
            let record = record.map_err(|e| CorralError::InvalidParameter {
                parameter: "fastq".to_string(),
                reason: format!("{label}: {e}"),
            })?;
            let name = record
                .id()
                .map_err(|e| CorralError::InvalidParameter {
                    parameter: "fastq".to_string(),
                    reason: format!("{label}: bad record id: {e}"),
                })?
                .to_string();
            let entry = (record.seq().to_vec(), record.qual().to_vec());
            if reads.insert(name.clone(), entry).is_some() {
                return Err(CorralError::InvalidParameter {
                    parameter: "fastq".to_string(),
                    reason: format!("{label}: duplicate read name '{name}'"),
                });
            }
        }

        Ok(Self { reads })
    }
}

impl SequenceSource for FastxSource {
    fn fetch(&self, name: &str) -> Option<(Vec<u8>, Vec<u8>)> {
        self.reads.get(name).cloned()
    }

    fn num_entries(&self) -> usize {
        self.reads.len()
    }
}

/// A sequence source over preloaded reads.
pub struct MemorySource {
    reads: HashMap<String, (Vec<u8>, Vec<u8>)>,
}

impl MemorySource {
    /// Builds a source from `(name, seq, qual)` triples.
    #[must_use]
    pub fn new(entries: Vec<(String, Vec<u8>, Vec<u8>)>) -> Self {
        let reads =
            entries.into_iter().map(|(name, seq, qual)| (name, (seq, qual))).collect();
        Self { reads }
    }
}

impl SequenceSource for MemorySource {
    fn fetch(&self, name: &str) -> Option<(Vec<u8>, Vec<u8>)> {
        self.reads.get(name).cloned()
    }

    fn num_entries(&self) -> usize {
        self.reads.len()
    }
}
