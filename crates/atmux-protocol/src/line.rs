//! Line accumulation for the raw input stream.
//!
//! The modem interleaves three things on the same byte stream: response
//! lines terminated with `\r\n`, a bare two-byte prompt (`"> "`) that is
//! never terminated, and raw payload bytes (which the engine drains
//! itself while the accumulator is bypassed). This module handles the
//! first two: it accumulates bytes into a bounded line buffer, flushes
//! complete lines, and reports the prompt as its own event.
//!
//! Multi-byte UTF-8 sequences in response text (operator names,
//! identification strings) are tracked by a small continuation counter
//! so their bytes are never mistaken for the terminator or the prompt.

use bytes::BytesMut;
use log::warn;

use crate::constants::{MAX_LINE_LENGTH, PROMPT};

/// Events produced by the accumulator, one per completed unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    /// A complete response line (terminator stripped, never empty).
    Line(String),
    /// The raw-payload prompt (`"> "` at line start).
    Prompt,
    /// A line exceeded the bounded buffer and was discarded.
    Overflow,
}

/// Accumulates raw bytes into lines and prompt events.
#[derive(Debug)]
pub struct LineAccumulator {
    /// Buffer for the line currently being accumulated.
    buffer: BytesMut,
    /// Remaining continuation bytes of an in-progress UTF-8 sequence.
    pending_continuation: u8,
    /// A `>` was seen at line start; a following space makes a prompt.
    prompt_armed: bool,
    /// The current line overflowed and is being discarded.
    discarding: bool,
}

impl Default for LineAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl LineAccumulator {
    /// Create a new accumulator.
    pub fn new() -> Self {
        LineAccumulator {
            buffer: BytesMut::with_capacity(MAX_LINE_LENGTH),
            pending_continuation: 0,
            prompt_armed: false,
            discarding: false,
        }
    }

    /// Push one byte, returning an event if it completed one.
    pub fn push_byte(&mut self, byte: u8) -> Option<LineEvent> {
        // Continuation bytes of a multi-byte character are appended
        // verbatim; they must never match the terminator or prompt.
        if self.pending_continuation > 0 {
            self.pending_continuation -= 1;
            return self.append(byte);
        }

        if self.discarding {
            if byte == b'\n' {
                self.discarding = false;
            }
            return None;
        }

        if self.prompt_armed {
            self.prompt_armed = false;
            if byte == PROMPT[1] {
                return Some(LineEvent::Prompt);
            }
            // Not a prompt after all; keep the '>' as line content.
            if let Some(event) = self.append(PROMPT[0]) {
                return Some(event);
            }
            // Fall through to normal handling of `byte`.
        }

        match byte {
            b'\r' => None,
            b'\n' => self.flush(),
            b if b == PROMPT[0] && self.buffer.is_empty() => {
                self.prompt_armed = true;
                None
            }
            _ => {
                if byte >= 0xC0 {
                    self.pending_continuation = continuation_count(byte);
                }
                self.append(byte)
            }
        }
    }

    /// Push a slice of bytes, collecting any completed events.
    pub fn push(&mut self, data: &[u8]) -> Vec<LineEvent> {
        data.iter().filter_map(|&b| self.push_byte(b)).collect()
    }

    /// Number of bytes accumulated for the current line.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Discard all accumulated state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.pending_continuation = 0;
        self.prompt_armed = false;
        self.discarding = false;
    }

    fn append(&mut self, byte: u8) -> Option<LineEvent> {
        if self.buffer.len() >= MAX_LINE_LENGTH {
            warn!("response line exceeded {} bytes, discarding", MAX_LINE_LENGTH);
            self.buffer.clear();
            self.pending_continuation = 0;
            self.discarding = true;
            return Some(LineEvent::Overflow);
        }
        self.buffer.extend_from_slice(&[byte]);
        None
    }

    fn flush(&mut self) -> Option<LineEvent> {
        if self.buffer.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.buffer).to_string();
        self.buffer.clear();
        Some(LineEvent::Line(line))
    }
}

/// Number of continuation bytes implied by a UTF-8 lead byte.
fn continuation_count(lead: u8) -> u8 {
    match lead {
        0xC0..=0xDF => 1,
        0xE0..=0xEF => 2,
        0xF0..=0xF7 => 3,
        _ => 0,
    }
}
