#![deny(unsafe_code)]
// Clippy lint configuration for CI.
// These lints are allowed because:
// - cast_*: bioinformatics code intentionally casts between numeric types
// - missing_errors_doc / missing_panics_doc: documented where non-obvious
// - module_name_repetitions: domain types read better fully named
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::uninlined_format_args
)]

//! # corral - windowed consensus-inference read correction
//!
//! This library corrects long noisy reads by splitting each target read into
//! fixed-width windows, building a multi-sequence alignment over the reads
//! that overlap it, and asking a neural inference backend to call a consensus
//! for the columns where the evidence disagrees with the target. Low-coverage
//! windows bypass inference and keep the target bases.
//!
//! ## Overview
//!
//! ### Core pipeline
//!
//! - **[`engine`]** - the three-stage pipeline: feature extraction, batched
//!   inference, decode/reassembly
//! - **[`windows`]** - target windowing and per-window overlap segments
//! - **[`features`]** - MSA feature tensors and supported-column selection
//! - **[`batcher`]** - slot-budgeted batch accumulation and collation
//! - **[`decode`]** - window decoding and gap-split concatenation
//!
//! ### Data model
//!
//! - **[`alignments`]** - overlaps, CIGARs, per-target alignment messages
//! - **[`model`]** - model-directory `config.toml`
//! - **[`backend`]** - the opaque inference functor and its factory
//!
//! ### Utilities
//!
//! - **[`queue`]** - bounded blocking queues with cooperative termination
//! - **[`fastx`]** - sequence sources (FASTQ lookup by read name)
//! - **[`paf`]** - PAF overlap ingestion
//! - **[`dna`]**, **[`phred`]** - base and quality primitives
//! - **[`progress`]**, **[`logging`]** - progress tracking and run summaries
//!
//! ## Quick start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use corral_lib::backend::MajorityVoteFactory;
//! use corral_lib::engine::{CorrectionConfig, CorrectionEngine};
//! use corral_lib::fastx::FastxSource;
//! use corral_lib::model::ModelConfig;
//! use corral_lib::paf::PafGroupReader;
//!
//! # fn main() -> anyhow::Result<()> {
//! let model = ModelConfig::load("model".as_ref())?;
//! let source = Arc::new(FastxSource::open("reads.fastq".as_ref())?);
//! let (sink, output) = crossbeam_channel::unbounded();
//!
//! let config = CorrectionConfig {
//!     device: "cpu".to_string(),
//!     threads: 4,
//!     infer_threads: 1,
//!     batch_size: 32,
//! };
//! let mut engine =
//!     CorrectionEngine::new(&config, model, source, &MajorityVoteFactory, sink)?;
//!
//! for alignments in PafGroupReader::open("overlaps.paf".as_ref())? {
//!     engine.submit(alignments)?;
//! }
//! engine.terminate()?;
//! drop(engine); // closes the sink
//!
//! for corrected in output.iter() {
//!     println!(">{}\n{}", corrected.name, corrected.seq);
//! }
//! # Ok(())
//! # }
//! ```

pub mod alignments;
pub mod backend;
pub mod batcher;
pub mod decode;
pub mod dna;
pub mod engine;
pub mod errors;
pub mod fastx;
pub mod features;
pub mod logging;
pub mod model;
pub mod paf;
pub mod phred;
pub mod progress;
pub mod queue;
pub mod windows;

pub use engine::{CorrectedRead, CorrectionConfig, CorrectionEngine, EngineStats};
pub use errors::{CorralError, Result};
