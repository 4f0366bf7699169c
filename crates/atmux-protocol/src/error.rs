//! Error types for the protocol crate.
//!
//! Line classification is total (unmatched lines fall back to an info
//! variant) and the accumulator reports overflow as an event, so the
//! only fallible protocol operation is argument validation before
//! serialization.

use thiserror::Error;

/// Errors produced while preparing protocol data for the wire.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A command argument cannot be serialized onto the wire.
    #[error("invalid command argument: {0}")]
    InvalidArgument(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
