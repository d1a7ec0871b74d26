//! Progress tracking utilities
//!
//! A thread-safe counter that logs progress each time the count crosses an
//! interval boundary. The input workers share one tracker, so increments can
//! arrive from several threads at once.

use log::info;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe progress tracker for logging progress at regular intervals.
///
/// # Example
/// ```
/// use corral_lib::progress::ProgressTracker;
///
/// let tracker = ProgressTracker::new("Corrected reads").with_interval(100);
/// for _ in 0..250 {
///     tracker.add(1); // logs at 100, 200
/// }
/// tracker.log_final(); // logs "Corrected reads 250 (complete)"
/// ```
pub struct ProgressTracker {
    interval: u64,
    message: String,
    count: AtomicU64,
}

impl ProgressTracker {
    /// Creates a tracker with a default interval of 10,000.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { interval: 10_000, message: message.into(), count: AtomicU64::new(0) }
    }

    /// Sets the logging interval.
    #[must_use]
    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval;
        self
    }

    /// Adds to the count, logging once per interval boundary crossed.
    ///
    /// Returns `true` if the new count lands exactly on an interval boundary.
    pub fn add(&self, additional: u64) -> bool {
        if additional == 0 {
            let count = self.count.load(Ordering::Relaxed);
            return count > 0 && count.is_multiple_of(self.interval);
        }

        let prev = self.count.fetch_add(additional, Ordering::Relaxed);
        let new_count = prev + additional;

        for i in (prev / self.interval + 1)..=(new_count / self.interval) {
            info!("{} {}", self.message, i * self.interval);
        }

        new_count.is_multiple_of(self.interval)
    }

    /// Logs the final count unless the last `add` already logged it.
    pub fn log_final(&self) {
        if !self.add(0) {
            let count = self.count.load(Ordering::Relaxed);
            if count > 0 {
                info!("{} {} (complete)", self.message, count);
            }
        }
    }

    /// Returns the current count.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}
