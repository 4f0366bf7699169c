//! Protocol constants.
//!
//! Tokens and limits for the line-oriented AT surface. Response tokens
//! live in [`crate::classify`] next to the catalogue that matches them;
//! this module holds the limits and the few tokens shared between the
//! accumulator and the classifier.

/// Two-byte line terminator used on both directions of the link.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Maximum accepted length of a single response line.
pub const MAX_LINE_LENGTH: usize = 256;

/// Prompt sequence the modem emits when it is ready for raw bytes
/// (after a length-declared send element). Only valid at line start.
pub const PROMPT: &[u8; 2] = b"> ";

/// Prefix of a payload announcement line: `+RECEIVE,<id>,<len>:`.
pub const RECEIVE_PREFIX: &str = "+RECEIVE,";
