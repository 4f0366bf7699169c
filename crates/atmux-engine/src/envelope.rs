//! Command envelopes and the uniform call contract.
//!
//! Every API-level operation becomes one [`Envelope`]: the family, a
//! step counter the dispatcher advances, the blocking/callback
//! completion contract, and a family-specific payload. Exactly one
//! envelope is in flight at a time; the producer thread resolves it
//! through exactly one path, either the per-call completion channel for
//! blocking submissions or the completion callback.

use std::time::Duration;

use crossbeam_channel::Sender;
use tracing::trace;

use crate::conn::ConnHandle;
use crate::error::Completion;

/// Command families the dispatcher knows how to sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    /// Device bring-up: echo, functionality, errors, identification,
    /// registration, multiplexing, SIM readiness.
    Initialize,
    /// Packet-domain attach and data-context activation.
    Attach,
    /// Context shutdown / detach.
    Detach,
    /// Connection open on a claimed slot.
    Open,
    /// Chunked data send on a connection.
    Send,
    /// Connection close.
    Close,
    /// Signal-quality query.
    SignalQuality,
    /// Functionality-level query.
    Functionality,
}

impl Family {
    /// Default per-element and caller wait for the family.
    pub fn default_wait(self) -> Duration {
        match self {
            Family::Initialize => Duration::from_secs(15),
            Family::Attach => Duration::from_secs(85),
            Family::Detach => Duration::from_secs(65),
            Family::Open => Duration::from_secs(75),
            Family::Send => Duration::from_secs(60),
            Family::Close => Duration::from_secs(15),
            Family::SignalQuality => Duration::from_secs(5),
            Family::Functionality => Duration::from_secs(5),
        }
    }
}

/// Family-specific envelope payload.
#[derive(Debug)]
pub(crate) enum FamilyPayload {
    Initialize {
        /// PIN to enter automatically when the SIM asks.
        pin: Option<String>,
        /// SIM-ready polls performed so far.
        sim_polls: u8,
        /// A PIN has been entered during this bring-up.
        pin_entered: bool,
    },
    Attach {
        apn: String,
        user: String,
        password: String,
    },
    Detach {
        /// Treat a deactivation failure as success (data-only profiles).
        ignore_failure: bool,
    },
    Open {
        handle: ConnHandle,
    },
    Send {
        handle: ConnHandle,
        /// Attempts made on the current chunk.
        attempts: u8,
        /// Length of the chunk currently on the wire.
        chunk_len: usize,
    },
    Close {
        handle: ConnHandle,
    },
    SignalQuality,
    QueryFunctionality,
}

/// Completion callback for non-blocking submissions.
pub type CompletionFn = Box<dyn FnOnce(Completion) + Send>;

/// The uniform options every operation accepts.
pub struct CallOptions {
    /// Block the caller until the operation completes.
    pub blocking: bool,
    /// Override of the family's default maximum wait.
    pub max_wait: Option<Duration>,
    /// Invoked with the terminal outcome of a non-blocking call.
    pub on_complete: Option<CompletionFn>,
}

impl CallOptions {
    /// Blocking call with the family's default wait.
    pub fn blocking() -> Self {
        CallOptions {
            blocking: true,
            max_wait: None,
            on_complete: None,
        }
    }

    /// Non-blocking call, optionally with a completion callback.
    pub fn non_blocking(on_complete: Option<CompletionFn>) -> Self {
        CallOptions {
            blocking: false,
            max_wait: None,
            on_complete,
        }
    }

    /// Replace the maximum wait.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        CallOptions::blocking()
    }
}

/// One in-flight API-level request.
pub(crate) struct Envelope {
    pub family: Family,
    /// Dispatcher step counter; zero at allocation.
    pub step: u32,
    pub blocking: bool,
    pub max_wait: Duration,
    pub payload: FamilyPayload,
    /// Per-call completion channel (blocking submissions).
    pub done: Option<Sender<Completion>>,
    /// Completion callback (non-blocking submissions).
    pub on_complete: Option<CompletionFn>,
}

impl Envelope {
    pub(crate) fn new(family: Family, payload: FamilyPayload, options: CallOptions) -> Self {
        Envelope {
            family,
            step: 0,
            blocking: options.blocking,
            max_wait: options.max_wait.unwrap_or_else(|| family.default_wait()),
            payload,
            done: None,
            on_complete: options.on_complete,
        }
    }

    /// The connection this envelope targets, if any.
    pub(crate) fn conn(&self) -> Option<ConnHandle> {
        match &self.payload {
            FamilyPayload::Open { handle }
            | FamilyPayload::Send { handle, .. }
            | FamilyPayload::Close { handle } => Some(*handle),
            _ => None,
        }
    }

    /// Deliver the terminal outcome through exactly one path.
    pub(crate) fn resolve(self, result: Completion) {
        trace!(family = ?self.family, ?result, "envelope resolved");
        if let Some(done) = self.done {
            // The caller may already have timed out and dropped its
            // receiver; the outcome is then discarded.
            let _ = done.try_send(result);
        } else if let Some(on_complete) = self.on_complete {
            on_complete(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_step_counter_starts_at_zero() {
        let env = Envelope::new(
            Family::SignalQuality,
            FamilyPayload::SignalQuality,
            CallOptions::blocking(),
        );
        assert_eq!(env.step, 0);
        assert!(env.blocking);
        assert_eq!(env.max_wait, Family::SignalQuality.default_wait());
    }

    #[test]
    fn test_blocking_resolution_uses_channel() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let mut env = Envelope::new(
            Family::Detach,
            FamilyPayload::Detach { ignore_failure: false },
            CallOptions::blocking(),
        );
        env.done = Some(tx);
        env.resolve(Err(EngineError::Timeout));
        assert_eq!(rx.recv().unwrap(), Err(EngineError::Timeout));
    }

    #[test]
    fn test_nonblocking_resolution_invokes_callback_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let env = Envelope::new(
            Family::Detach,
            FamilyPayload::Detach { ignore_failure: true },
            CallOptions::non_blocking(Some(Box::new(move |result| {
                assert!(result.is_ok());
                counted.fetch_add(1, Ordering::SeqCst);
            }))),
        );
        env.resolve(Ok(()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
