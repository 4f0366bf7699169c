//! Engine events and the global listener list.
//!
//! Every classified occurrence the engine surfaces (connection
//! lifecycle, received data, unsolicited indications, command
//! timeouts) is one [`Event`] variant. Globally registered listeners are
//! invoked synchronously, in registration order. Connection-scoped
//! events prefer the callback captured at open time; only when a
//! connection has none do they reach the global list.

use atmux_protocol::RegistrationStatus;

use crate::buffer::BufferId;
use crate::conn::ConnHandle;
use crate::envelope::Family;

/// A classified engine event.
#[derive(Debug)]
pub enum Event {
    /// A connection reached the active state.
    ConnectionActive {
        /// Handle of the activation.
        handle: ConnHandle,
        /// Whether this side initiated the connection.
        client_initiated: bool,
    },
    /// A connection closed. Emitted exactly once per activation.
    ConnectionClosed {
        /// Handle of the closed activation.
        handle: ConnHandle,
    },
    /// Payload arrived on a connection without a scoped listener.
    /// Ownership of the buffer reference passes to the receiver.
    DataReceived {
        /// Connection the payload belongs to.
        handle: ConnHandle,
        /// Head buffer (chained for datagrams).
        buffer: BufferId,
        /// Total delivered length.
        len: usize,
        /// Source address for datagram receipts.
        source: Option<(String, u16)>,
    },
    /// Network registration status changed.
    RegistrationChanged(RegistrationStatus),
    /// Incoming call indication.
    Ring,
    /// Signal quality report.
    SignalQuality {
        /// Received signal strength indicator.
        rssi: u8,
        /// Bit error rate index.
        ber: u8,
    },
    /// The network deactivated the data context.
    PdpDeactivated,
    /// The device announced a power-down.
    DevicePowerDown,
    /// A command element timed out; the application may decide to
    /// force a device reset.
    CommandTimeout {
        /// Family of the command that timed out.
        family: Family,
    },
}

/// A globally registered listener.
pub type Listener = Box<dyn FnMut(&Event) + Send>;

/// Identifies a registered listener for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Ordered list of global listeners.
pub(crate) struct ListenerList {
    entries: Vec<(ListenerId, Listener)>,
    next_id: u64,
}

impl ListenerList {
    pub(crate) fn new() -> Self {
        ListenerList {
            entries: Vec::new(),
            next_id: 0,
        }
    }

    pub(crate) fn add(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Invoke every listener with the event, in registration order.
    pub(crate) fn emit(&mut self, event: &Event) {
        for (_, listener) in &mut self.entries {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_listeners_invoked_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut list = ListenerList::new();
        for tag in 0..3 {
            let order = Arc::clone(&order);
            list.add(Box::new(move |_| order.lock().unwrap().push(tag)));
        }
        list.emit(&Event::Ring);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_remove_stops_delivery() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut list = ListenerList::new();
        let counted = Arc::clone(&count);
        let id = list.add(Box::new(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        }));
        list.emit(&Event::Ring);
        assert!(list.remove(id));
        assert!(!list.remove(id));
        list.emit(&Event::Ring);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
