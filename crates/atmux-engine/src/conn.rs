//! Connection table.
//!
//! A fixed-capacity array of transport-connection slots matching the
//! device's multiplexed slot ids. Each slot carries a generation id
//! that increments on every inactive→active transition; operations
//! capture a [`ConnHandle`] (slot index + generation) at submission
//! and re-check it before touching the wire, so a recycled slot can
//! never be hit by a stale operation.
//!
//! Every close path (explicit close, unsolicited closed notice, or a
//! send-time failure revealing peer closure) funnels through one
//! idempotent routine that deactivates the slot, releases pending
//! write state, and reports whether a close notification should fire.

use atmux_protocol::SocketKind;

use crate::buffer::BufferId;

/// Number of multiplexed connection slots the device exposes.
pub const MAX_CONNECTIONS: usize = 6;

/// Capability handle to one connection activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnHandle {
    /// Slot index (0..[`MAX_CONNECTIONS`]).
    pub index: u8,
    /// Generation id captured when the slot was claimed.
    pub generation: u32,
}

/// Control value returned by a connection listener for data events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxControl {
    /// Keep delivering payload for the current announcement.
    Accept,
    /// Drain but stop delivering the remainder of the announcement.
    Ignore,
}

/// Connection-scoped events delivered to the listener captured at open.
#[derive(Debug)]
pub enum ConnEvent {
    /// The connection became active.
    Active {
        /// Whether this side initiated the connection.
        client_initiated: bool,
    },
    /// A payload buffer arrived. Ownership of the buffer reference
    /// passes to the listener, which must release it.
    Data {
        /// Head of the delivered buffer (chained for datagrams).
        buffer: BufferId,
        /// Total payload length delivered.
        len: usize,
        /// Source address for datagram receipts.
        source: Option<(String, u16)>,
    },
    /// The connection closed. Fires at most once per activation.
    Closed,
}

/// Listener captured at connection-open time. The return value is
/// consulted for [`ConnEvent::Data`] only.
pub type ConnListener = Box<dyn FnMut(ConnHandle, ConnEvent) -> RxControl + Send>;

/// Write staged against a connection, consumed chunk by chunk.
#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub data: Vec<u8>,
    pub cursor: usize,
}

impl PendingWrite {
    pub(crate) fn remaining(&self) -> &[u8] {
        &self.data[self.cursor..]
    }
}

/// One connection slot.
pub(crate) struct Slot {
    pub generation: u32,
    pub active: bool,
    pub client_initiated: bool,
    pub first_data_seen: bool,
    pub closing: bool,
    pub kind: SocketKind,
    pub remote_host: String,
    pub remote_port: u16,
    pub pending_write: Option<PendingWrite>,
    pub listener: Option<ConnListener>,
    pub total_received: u64,
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            generation: 0,
            active: false,
            client_initiated: false,
            first_data_seen: false,
            closing: false,
            kind: SocketKind::Stream,
            remote_host: String::new(),
            remote_port: 0,
            pending_write: None,
            listener: None,
            total_received: 0,
        }
    }
}

/// Result of the idempotent close routine when it actually closed.
pub(crate) struct CloseReport {
    /// Listener taken from the slot, to be notified once.
    pub listener: Option<ConnListener>,
}

/// Fixed-capacity table of connection slots.
pub(crate) struct ConnTable {
    slots: Vec<Slot>,
}

impl ConnTable {
    pub(crate) fn new() -> Self {
        ConnTable {
            slots: (0..MAX_CONNECTIONS).map(|_| Slot::default()).collect(),
        }
    }

    /// Claim the first free slot. Increments the slot generation and
    /// returns the capability handle for this activation.
    pub(crate) fn claim(
        &mut self,
        kind: SocketKind,
        host: String,
        port: u16,
        listener: Option<ConnListener>,
    ) -> Option<ConnHandle> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| !slot.active)?;
        slot.generation += 1;
        slot.active = true;
        slot.client_initiated = true;
        slot.first_data_seen = false;
        slot.closing = false;
        slot.kind = kind;
        slot.remote_host = host;
        slot.remote_port = port;
        slot.pending_write = None;
        slot.listener = listener;
        slot.total_received = 0;
        Some(ConnHandle {
            index: index as u8,
            generation: slot.generation,
        })
    }

    /// Whether a captured handle still refers to the live activation.
    pub(crate) fn is_current(&self, handle: ConnHandle) -> bool {
        self.slot(handle.index as usize)
            .is_some_and(|slot| slot.active && slot.generation == handle.generation)
    }

    /// The idempotent close routine. Returns `None` when the slot was
    /// already inactive (no notification); otherwise deactivates the
    /// slot, drops the pending write, and hands back the listener so
    /// the caller can emit exactly one close notification.
    pub(crate) fn close(&mut self, index: usize) -> Option<CloseReport> {
        let slot = self.slot_mut(index)?;
        if !slot.active {
            return None;
        }
        slot.active = false;
        slot.closing = false;
        slot.pending_write = None;
        let listener = slot.listener.take();
        Some(CloseReport { listener })
    }

    /// Deactivate a claimed slot without a close notification (used
    /// when an open never reached the active announcement).
    pub(crate) fn abandon(&mut self, index: usize) {
        if let Some(slot) = self.slot_mut(index) {
            slot.active = false;
            slot.pending_write = None;
            slot.listener = None;
        }
    }

    pub(crate) fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut Slot> {
        self.slots.get_mut(index)
    }

    /// Indexes of all currently active slots.
    pub(crate) fn active_indexes(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.active)
            .map(|(index, _)| index)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(table: &mut ConnTable) -> ConnHandle {
        table
            .claim(SocketKind::Stream, "host".to_string(), 80, None)
            .unwrap()
    }

    #[test]
    fn test_slots_claimed_in_order() {
        let mut table = ConnTable::new();
        assert_eq!(claim(&mut table).index, 0);
        assert_eq!(claim(&mut table).index, 1);
        assert_eq!(claim(&mut table).index, 2);
    }

    #[test]
    fn test_generation_strictly_increases_per_slot() {
        let mut table = ConnTable::new();
        let first = claim(&mut table);
        table.close(first.index as usize);
        let second = claim(&mut table);
        assert_eq!(second.index, first.index);
        assert!(second.generation > first.generation);
        table.close(second.index as usize);
        let third = claim(&mut table);
        assert!(third.generation > second.generation);
    }

    #[test]
    fn test_stale_handle_rejected() {
        let mut table = ConnTable::new();
        let handle = claim(&mut table);
        assert!(table.is_current(handle));
        table.close(handle.index as usize);
        assert!(!table.is_current(handle));
        // The slot is recycled with a new generation; the old handle
        // must stay stale.
        let recycled = claim(&mut table);
        assert_eq!(recycled.index, handle.index);
        assert!(!table.is_current(handle));
        assert!(table.is_current(recycled));
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut table = ConnTable::new();
        let handle = claim(&mut table);
        table.slot_mut(handle.index as usize).unwrap().pending_write =
            Some(PendingWrite { data: vec![1, 2, 3], cursor: 0 });
        assert!(table.close(handle.index as usize).is_some());
        // Second close: no report, nothing to double-free.
        assert!(table.close(handle.index as usize).is_none());
    }

    #[test]
    fn test_no_free_slot() {
        let mut table = ConnTable::new();
        for _ in 0..MAX_CONNECTIONS {
            claim(&mut table);
        }
        assert!(table
            .claim(SocketKind::Stream, "host".to_string(), 80, None)
            .is_none());
    }

    #[test]
    fn test_abandon_recycles_without_notification() {
        let mut table = ConnTable::new();
        let handle = claim(&mut table);
        table.abandon(handle.index as usize);
        assert!(!table.is_current(handle));
        // Close after abandon reports nothing.
        assert!(table.close(handle.index as usize).is_none());
    }
}
