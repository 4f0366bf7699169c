//! Wire-level AT command protocol.
//!
//! This crate contains the pure protocol pieces of the atmux engine:
//! no threads, no connection state, just bytes and lines.
//!
//! - [`LineAccumulator`]: turns a raw byte stream into complete lines
//!   and prompt events
//! - [`classify`]: maps a complete line onto the fixed catalogue of
//!   [`ResponseLine`] variants
//! - [`AtCommand`]: serializes the concrete command elements the engine
//!   transmits
//!
//! The modem side of the link is half-duplex and line oriented:
//! commands go out as ASCII text terminated with `\r\n`, responses come
//! back as lines, and incoming socket payload is announced with a
//! length-declared header line followed by that many raw bytes. The
//! raw-payload phase is handled by the engine; this crate only
//! recognizes the announcement.

pub mod classify;
pub mod commands;
pub mod constants;
pub mod error;
pub mod line;

pub use classify::{classify, PinState, RegistrationStatus, ResponseLine};
pub use commands::{validate_quoted_arg, AtCommand, SocketKind};
pub use error::{ProtocolError, ProtocolResult};
pub use line::{LineAccumulator, LineEvent};
