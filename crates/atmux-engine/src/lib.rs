//! Asynchronous command execution engine for AT-style cellular modems.
//!
//! The engine multiplexes a single half-duplex serial link shared by
//! command/response traffic, unsolicited notifications, and inline
//! binary payload. Callers submit high-level operations (bring-up,
//! attach, open, send, close); a producer thread sequences each one
//! into concrete command elements while a processor thread classifies
//! every response line, releasing the producer exactly once per
//! element.
//!
//! ## Crate layout
//!
//! - [`engine`]: the [`Engine`] context, worker threads, listeners.
//! - [`dispatch`]: per-family `(step, outcome)` decision tables.
//! - [`reader`]: the processor's two-mode line/payload reader.
//! - [`conn`]: the generation-checked connection table.
//! - [`buffer`]: the refcounted, chainable receive-buffer pool.
//!
//! Wire-level parsing and command encoding live in `atmux-protocol`.

pub mod buffer;
pub mod config;
pub mod conn;
mod dispatch;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod events;
mod reader;
mod state;

pub use buffer::BufferId;
pub use config::EngineConfig;
pub use conn::{ConnEvent, ConnHandle, ConnListener, RxControl, MAX_CONNECTIONS};
pub use engine::{Engine, TransmitFn};
pub use envelope::{CallOptions, CompletionFn, Family};
pub use error::{Completion, EngineError, EngineResult};
pub use events::{Event, Listener, ListenerId};

pub use atmux_protocol::{PinState, RegistrationStatus, SocketKind};
