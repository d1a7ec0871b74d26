//! The `correct` command: windowed consensus-inference read correction.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use corral_lib::backend::MajorityVoteFactory;
use corral_lib::engine::{CorrectedRead, CorrectionConfig, CorrectionEngine};
use corral_lib::fastx::{FastxSource, SequenceSource};
use corral_lib::logging::{log_correction_summary, OperationTimer};
use corral_lib::model::ModelConfig;
use corral_lib::paf::PafGroupReader;
use crossbeam_channel::Receiver;
use log::info;

use crate::commands::command::Command;
use crate::commands::common::{validate_file_exists, ComputeOptions, ModelOptions};

/// Corrects long noisy reads using overlap alignments and a consensus model.
///
/// Reads come from a FASTQ file, overlaps from a PAF file with `cg:Z` CIGAR
/// tags grouped by target read (column 6). Corrected sequences are written as
/// FASTA; reads split by low-confidence windows emit one record per piece,
/// suffixed `:0`, `:1`, ...
#[derive(Parser, Debug)]
#[command(name = "correct")]
pub struct Correct {
    /// Input FASTQ(.gz) with the reads to correct
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,

    /// PAF(.gz) overlap alignments with cg:Z tags, grouped by target
    #[arg(short = 'a', long = "alignments")]
    pub alignments: PathBuf,

    /// Output FASTA for corrected sequences
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    #[command(flatten)]
    pub model: ModelOptions,

    #[command(flatten)]
    pub compute: ComputeOptions,
}

/// Writes corrected reads as FASTA until the channel closes; returns the
/// record count.
fn writer_thread(output: PathBuf, reads: Receiver<CorrectedRead>) -> Result<u64> {
    let file = File::create(&output)
        .with_context(|| format!("creating output {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let mut written = 0u64;
    for read in reads {
        writeln!(writer, ">{}\n{}", read.name, read.seq)?;
        written += 1;
    }
    writer.flush()?;
    Ok(written)
}

impl Command for Correct {
    fn execute(&self) -> Result<()> {
        validate_file_exists(&self.input, "Input FASTQ")?;
        validate_file_exists(&self.alignments, "Alignment PAF")?;
        validate_file_exists(&self.model.model_dir, "Model directory")?;

        let timer = OperationTimer::new("Correcting reads");

        let model = ModelConfig::load(&self.model.model_dir)?;
        info!(
            "Loaded model from {} (window size {})",
            self.model.model_dir.display(),
            model.window_size
        );

        let source = Arc::new(FastxSource::open(&self.input)?);
        info!("Indexed {} reads from {}", source.num_entries(), self.input.display());

        let (sink, output_rx) = crossbeam_channel::unbounded();
        let output_path = self.output.clone();
        let writer = thread::spawn(move || writer_thread(output_path, output_rx));

        let config = CorrectionConfig {
            device: self.compute.device.clone(),
            threads: self.compute.threads,
            infer_threads: self.compute.infer_threads,
            batch_size: self.compute.batch_size,
        };
        let mut engine =
            CorrectionEngine::new(&config, model, source, &MajorityVoteFactory, sink)?;

        for alignments in PafGroupReader::open(&self.alignments)? {
            engine.submit(alignments)?;
        }
        engine.terminate()?;
        engine.log_final_progress();

        let stats = engine.sample_stats();
        drop(engine); // closes the sink so the writer can finish

        let written = writer.join().expect("writer thread panicked")?;
        log_correction_summary(&stats);
        info!("Wrote {written} corrected sequences to {}", self.output.display());
        timer.log_completion(stats.num_reads_corrected);
        Ok(())
    }
}
