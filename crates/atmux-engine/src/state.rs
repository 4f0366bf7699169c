//! Shared engine state.
//!
//! Everything the two worker threads and the API surface share lives in
//! [`Core`], guarded by the engine's single re-entrant lock. Cached
//! feature state is rebuilt entirely from device responses; nothing is
//! persisted across a reset.

use atmux_protocol::{PinState, RegistrationStatus};

use crate::buffer::BufferPool;
use crate::config::EngineConfig;
use crate::conn::{ConnHandle, ConnTable};
use crate::envelope::Family;

/// Feature state cached from classified responses.
#[derive(Debug, Default)]
pub(crate) struct CachedState {
    pub sim: Option<PinState>,
    pub registration: Option<RegistrationStatus>,
    pub signal: Option<(u8, u8)>,
    pub functionality: Option<u8>,
    pub identity: Option<String>,
    pub local_address: Option<String>,
    pub attached: Option<bool>,
}

/// Identity of the envelope currently being executed.
#[derive(Debug, Clone, Copy)]
pub(crate) struct InFlight {
    pub family: Family,
    /// Connection the envelope targets, if any.
    pub conn: Option<ConnHandle>,
    /// Whether a plain `OK` is the terminal line of the armed element.
    /// False while a dedicated result line (`CONNECT OK`, `SEND OK`) is
    /// awaited: the device echoes an `OK` before such lines, and
    /// releasing the step channel on the echo would leave the result
    /// with nowhere to land.
    pub ok_terminates: bool,
}

/// The engine's shared mutable state.
pub(crate) struct Core {
    pub table: ConnTable,
    pub pool: BufferPool,
    pub cached: CachedState,
    /// Raw bytes to transmit when the device emits the send prompt.
    pub staged: Option<Vec<u8>>,
    pub in_flight: Option<InFlight>,
}

impl Core {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Core {
            table: ConnTable::new(),
            pool: BufferPool::new(config.pool_budget),
            cached: CachedState::default(),
            staged: None,
            in_flight: None,
        }
    }

    /// Whether the in-flight envelope targets the given slot.
    pub(crate) fn in_flight_on(&self, index: usize) -> Option<Family> {
        let in_flight = self.in_flight.as_ref()?;
        let conn = in_flight.conn?;
        (conn.index as usize == index).then_some(in_flight.family)
    }
}
