//! Logging utilities for formatted output.
//!
//! Formatting helpers for counts, durations and rates, an operation timer,
//! and the end-of-run correction summary.

use std::time::{Duration, Instant};

use crate::engine::EngineStats;

/// Formats a count with thousands separators (e.g. `1,234,567`).
#[must_use]
pub fn format_count(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i).is_multiple_of(3) {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Formats a duration in human-readable form (e.g. "2m 15s", "1h 30m").
#[must_use]
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        let mins = secs / 60;
        let rem = secs % 60;
        if rem == 0 { format!("{mins}m") } else { format!("{mins}m {rem}s") }
    } else {
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        if mins == 0 { format!("{hours}h") } else { format!("{hours}h {mins}m") }
    }
}

/// Formats a processing rate with appropriate units.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn format_rate(count: u64, duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs < 0.001 {
        return format!("{} reads/s", format_count(count));
    }
    let rate = count as f64 / secs;
    if rate >= 1.0 {
        format!("{} reads/s", format_count(rate as u64))
    } else {
        format!("{:.1} reads/min", count as f64 / (secs / 60.0))
    }
}

/// Logs a formatted summary of a correction run.
pub fn log_correction_summary(stats: &EngineStats) {
    log::info!("Correction Summary:");
    log::info!("  Reads in input: {}", format_count(stats.total_reads_in_input));
    log::info!("  Reads corrected: {}", format_count(stats.num_reads_corrected));
    log::info!("  Reads decoded without inference: {}", format_count(stats.num_early_reads));
    if stats.total_reads_in_input > 0 {
        let frac = stats.num_reads_corrected as f64 / stats.total_reads_in_input as f64;
        log::info!("  Fraction corrected: {:.2}%", frac * 100.0);
    }
}

/// Operation timing and summary helper.
///
/// # Examples
///
/// ```no_run
/// use corral_lib::logging::OperationTimer;
///
/// let timer = OperationTimer::new("Correcting reads");
/// // ... do work ...
/// timer.log_completion(10_000);
/// ```
pub struct OperationTimer {
    operation: String,
    start_time: Instant,
}

impl OperationTimer {
    /// Creates a new operation timer and logs the start.
    #[must_use]
    pub fn new(operation: &str) -> Self {
        log::info!("{operation} ...");
        Self { operation: operation.to_string(), start_time: Instant::now() }
    }

    /// Logs the completion with item count and rate.
    pub fn log_completion(&self, count: u64) {
        let duration = self.start_time.elapsed();
        log::info!(
            "{} completed: {} in {} ({})",
            self.operation,
            format_count(count),
            format_duration(duration),
            format_rate(count, duration)
        );
    }
}
