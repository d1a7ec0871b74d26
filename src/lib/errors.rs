//! Custom error types for corral operations.

use thiserror::Error;

/// Result type alias for corral operations
pub type Result<T> = std::result::Result<T, CorralError>;

/// Error type for corral operations
#[derive(Error, Debug)]
pub enum CorralError {
    /// Invalid parameter value provided
    #[error("Invalid parameter '{parameter}': {reason}")]
    InvalidParameter {
        /// The parameter name
        parameter: String,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// A sequence referenced by an overlap is missing from the sequence source
    #[error("Read '{name}' not found in sequence source")]
    ReadNotFound {
        /// The missing read name
        name: String,
    },

    /// Reported and actual sequence lengths disagree
    #[error("Length mismatch for '{name}': reported {reported}, actual {actual}")]
    LengthMismatch {
        /// The read name
        name: String,
        /// Length reported by the overlap producer
        reported: usize,
        /// Length observed in the sequence source
        actual: usize,
    },

    /// Overlap coordinates or CIGAR consumption violate their invariants
    #[error("Inconsistent overlap for query '{qname}' against '{tname}': {reason}")]
    InconsistentOverlap {
        /// The target read name
        tname: String,
        /// The query read name
        qname: String,
        /// Explanation of the inconsistency
        reason: String,
    },

    /// An unrecognized CIGAR operation was encountered
    #[error("Unknown CIGAR op '{op}' for query '{qname}'")]
    UnknownCigarOp {
        /// The offending operation character
        op: char,
        /// The query read name
        qname: String,
    },

    /// A window's walked query length disagrees with its recorded interval
    #[error(
        "Window {window_idx} of '{name}': walked query length {walked} != recorded {recorded}"
    )]
    WindowLengthMismatch {
        /// The target read name
        name: String,
        /// The window index
        window_idx: usize,
        /// Query bases consumed by the CIGAR walk
        walked: usize,
        /// `qend - qstart` recorded by the partitioner
        recorded: usize,
    },

    /// Model directory contents could not be loaded
    #[error("Failed to load model from '{path}': {reason}")]
    ModelLoad {
        /// The model directory path
        path: String,
        /// Explanation of the failure
        reason: String,
    },

    /// A device was requested but enumeration returned nothing
    #[error("Device '{device}' requested but no devices found")]
    NoDevices {
        /// The requested device string
        device: String,
    },
}
