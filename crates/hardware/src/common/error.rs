//! Simulator error types.
//!
//! Two classes of failure are recoverable by reporting and exiting: bad
//! configuration and malformed traces. Everything else — LRU rank corruption,
//! retire-order violations, window underflow — is a programming error and
//! asserts.

use thiserror::Error;

/// Errors surfaced to the caller of the simulator library.
#[derive(Debug, Error)]
pub enum SimError {
    /// The trace file could not be opened or read.
    #[error("trace I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The trace stream violated the record format.
    #[error("malformed trace record near byte {offset}: {reason}")]
    TraceFormat {
        /// Uncompressed byte offset of the failing field.
        offset: u64,
        /// What was expected at that offset.
        reason: String,
    },

    /// The requested configuration is not simulable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SimError>;
