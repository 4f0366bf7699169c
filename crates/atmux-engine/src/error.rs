//! Error types for the engine.
//!
//! Every terminal outcome of an operation is drawn from one shared
//! taxonomy, [`EngineError`], whether it reaches the caller as a
//! blocking return value or through a completion callback. The type is
//! `Clone` so the same value can travel both paths.

use thiserror::Error;

/// Errors produced by engine operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The device answered with an error line.
    #[error("device reported an error")]
    Device {
        /// Extended error code when verbose errors are enabled.
        code: Option<u32>,
    },

    /// The command queue could not take another envelope.
    #[error("out of memory")]
    OutOfMemory,

    /// The device did not answer within the bounded wait.
    #[error("timed out waiting for the device")]
    Timeout,

    /// The targeted connection is closed or its slot was recycled.
    #[error("connection closed")]
    Closed,

    /// No device is present on the link.
    #[error("no device present")]
    NoDevice,

    /// A blocking submission was issued from an engine worker thread.
    #[error("blocking call not allowed from an engine thread")]
    BlockingNotAllowed,

    /// A write is already staged against the targeted connection.
    #[error("operation already in progress")]
    Busy,

    /// Every connection slot is in use.
    #[error("no free connection slot")]
    NoFreeSlot,

    /// An argument cannot be carried on the wire.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The engine has been shut down.
    #[error("engine shut down")]
    Shutdown,
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Terminal outcome delivered to blocking callers and completion
/// callbacks alike.
pub type Completion = Result<(), EngineError>;
