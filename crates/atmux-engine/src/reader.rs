//! Processor-side input reader.
//!
//! Owns the two-mode state machine over the raw input stream. In line
//! mode, bytes flow through the protocol crate's accumulator and every
//! completed line is classified and acted on: terminal lines release
//! the producer's step channel, unsolicited lines update cached state
//! and reach the listener path, payload announcements switch the
//! reader into payload mode. In payload mode, bytes are appended to
//! pool nodes (or counted and dropped when no node could be allocated
//! or the announcement's connection is stale) until the declared length
//! is exhausted.
//!
//! The receive-in-progress state lives here, on the processor thread;
//! it exists only while a declared inbound payload is being drained.

use atmux_protocol::{LineAccumulator, LineEvent, ResponseLine, SocketKind};
use tracing::{debug, trace, warn};

use crate::buffer::BufferId;
use crate::conn::{ConnHandle, RxControl};
use crate::dispatch::StepOutcome;
use crate::engine::Shared;
use crate::envelope::Family;
use crate::events::Event;

/// State of one declared inbound payload being drained.
struct RxInProgress {
    handle: ConnHandle,
    /// Deliver bytes (false: drain and count, but drop).
    deliver: bool,
    is_datagram: bool,
    source: Option<(String, u16)>,
    declared: usize,
    remaining: usize,
    /// Chain head (datagram delivery is one chained whole).
    head: Option<BufferId>,
    /// Node currently being filled.
    current: Option<BufferId>,
}

/// The two-mode reader run by the processor thread.
pub(crate) struct Reader {
    acc: LineAccumulator,
    rx: Option<RxInProgress>,
}

impl Reader {
    pub(crate) fn new() -> Self {
        Reader {
            acc: LineAccumulator::new(),
            rx: None,
        }
    }

    /// Consume a batch of raw input bytes.
    pub(crate) fn consume(&mut self, shared: &Shared, data: &[u8]) {
        let mut offset = 0;
        while offset < data.len() {
            if self.rx.is_some() {
                offset += self.drain_payload(shared, &data[offset..]);
            } else {
                let event = self.acc.push_byte(data[offset]);
                offset += 1;
                match event {
                    Some(LineEvent::Line(line)) => self.handle_line(shared, &line),
                    Some(LineEvent::Prompt) => shared.transmit_staged(),
                    Some(LineEvent::Overflow) => warn!("oversized response line dropped"),
                    None => {}
                }
            }
        }
    }

    // ========================================================================
    // Line mode
    // ========================================================================

    fn handle_line(&mut self, shared: &Shared, line: &str) {
        let in_flight = shared.in_flight();
        match atmux_protocol::classify(line) {
            ResponseLine::Ok => {
                if let Some(flight) = in_flight {
                    // Elements that finish on a dedicated result line
                    // get an echoed OK first; releasing on the echo
                    // would occupy the depth-one channel and drop the
                    // result when both arrive in one read.
                    if flight.ok_terminates {
                        shared.release_step(StepOutcome::Accepted);
                    }
                }
            }
            ResponseLine::Error => shared.release_step(StepOutcome::Rejected(None)),
            ResponseLine::CmeError(code) | ResponseLine::CmsError(code) => {
                shared.release_step(StepOutcome::Rejected(Some(code)))
            }
            ResponseLine::ConnectOk(id) => {
                if flight_matches(&in_flight, Family::Open, id) {
                    shared.release_step(StepOutcome::ConnectOk);
                }
            }
            ResponseLine::ConnectFail(id) => {
                if flight_matches(&in_flight, Family::Open, id) {
                    shared.release_step(StepOutcome::ConnectFail);
                }
            }
            ResponseLine::AlreadyConnect(id) => {
                if flight_matches(&in_flight, Family::Open, id) {
                    shared.release_step(StepOutcome::AlreadyConnect);
                }
            }
            ResponseLine::SendOk(id) => {
                if flight_matches(&in_flight, Family::Send, id) {
                    shared.release_step(StepOutcome::SendOk);
                }
            }
            ResponseLine::SendFail(id) => {
                if flight_matches(&in_flight, Family::Send, id) {
                    shared.release_step(StepOutcome::SendFail);
                }
            }
            ResponseLine::CloseOk(id) => {
                if flight_matches(&in_flight, Family::Close, id) {
                    shared.release_step(StepOutcome::CloseOk);
                }
            }
            ResponseLine::Closed(id) => self.handle_peer_close(shared, id),
            ResponseLine::ReceiveAnnounce { conn, len } => self.start_payload(shared, conn, len),
            ResponseLine::Pin(state) => {
                shared.with_core(|core| core.cached.sim = Some(state));
            }
            ResponseLine::Registration(status) => {
                let changed = shared.with_core(|core| {
                    let changed = core.cached.registration != Some(status);
                    core.cached.registration = Some(status);
                    changed
                });
                if changed {
                    shared.emit_global(&Event::RegistrationChanged(status));
                }
            }
            ResponseLine::SignalQuality { rssi, ber } => {
                shared.with_core(|core| core.cached.signal = Some((rssi, ber)));
                shared.emit_global(&Event::SignalQuality { rssi, ber });
            }
            ResponseLine::Functionality(level) => {
                shared.with_core(|core| core.cached.functionality = Some(level));
            }
            ResponseLine::Attached(attached) => {
                shared.with_core(|core| core.cached.attached = Some(attached));
            }
            ResponseLine::LocalAddress(address) => {
                shared.with_core(|core| core.cached.local_address = Some(address.clone()));
                if in_flight.is_some_and(|flight| flight.family == Family::Attach) {
                    shared.release_step(StepOutcome::Address(address));
                }
            }
            ResponseLine::ShutOk => {
                if in_flight.is_some_and(|flight| flight.family == Family::Detach) {
                    shared.release_step(StepOutcome::ShutOk);
                }
            }
            ResponseLine::Ring => shared.emit_global(&Event::Ring),
            ResponseLine::NoCarrier => trace!("carrier lost"),
            ResponseLine::PdpDeactivated => self.handle_pdp_deactivated(shared),
            ResponseLine::PowerDown => {
                warn!("device announced power-down");
                shared.set_device_present(false);
                shared.emit_global(&Event::DevicePowerDown);
            }
            ResponseLine::Info(text) => {
                // Identification text produced during bring-up.
                if in_flight.is_some_and(|flight| flight.family == Family::Initialize) {
                    shared.with_core(|core| {
                        let identity = core.cached.identity.get_or_insert_with(String::new);
                        if !identity.is_empty() {
                            identity.push('\n');
                        }
                        identity.push_str(&text);
                    });
                }
            }
        }
    }

    /// Unsolicited closed notice: run the idempotent close routine and,
    /// when the in-flight envelope targets the same slot, fail it.
    fn handle_peer_close(&mut self, shared: &Shared, index: usize) {
        let (closed, in_flight_family) = shared.with_core(|core| {
            let generation = core.table.slot(index).map_or(0, |slot| slot.generation);
            let in_flight_family = core.in_flight_on(index);
            let report = core
                .table
                .close(index)
                .map(|report| (ConnHandle { index: index as u8, generation }, report.listener));
            (report, in_flight_family)
        });
        if let Some((handle, listener)) = closed {
            debug!(index, "peer closed connection");
            shared.notify_closed(handle, listener);
        }
        if matches!(
            in_flight_family,
            Some(Family::Open) | Some(Family::Send) | Some(Family::Close)
        ) {
            shared.release_step(StepOutcome::PeerClosed);
        }
    }

    /// Context death closes every connection, one notification each.
    fn handle_pdp_deactivated(&mut self, shared: &Shared) {
        let closed = shared.with_core(|core| {
            core.cached.attached = Some(false);
            core.cached.local_address = None;
            let mut closed = Vec::new();
            for index in core.table.active_indexes() {
                let generation = core.table.slot(index).map_or(0, |slot| slot.generation);
                if let Some(report) = core.table.close(index) {
                    closed.push((
                        ConnHandle { index: index as u8, generation },
                        report.listener,
                    ));
                }
            }
            closed
        });
        for (handle, listener) in closed {
            shared.notify_closed(handle, listener);
        }
        shared.emit_global(&Event::PdpDeactivated);
    }

    // ========================================================================
    // Payload mode
    // ========================================================================

    fn start_payload(&mut self, shared: &Shared, index: usize, len: usize) {
        if len == 0 {
            return;
        }
        let rx = shared.with_core(|core| {
            let Some(slot) = core.table.slot(index) else {
                return RxInProgress::dropped(index, len);
            };
            // Stale or closing connections still need the bytes drained
            // for frame alignment, but nothing is delivered.
            if !slot.active || slot.closing {
                return RxInProgress::dropped(index, len);
            }
            let handle = ConnHandle {
                index: index as u8,
                generation: slot.generation,
            };
            let is_datagram = slot.kind == SocketKind::Datagram;
            let source = is_datagram.then(|| (slot.remote_host.clone(), slot.remote_port));
            let current = core.pool.alloc(len);
            if current.is_none() {
                warn!(index, len, "no buffer for announced payload, dropping");
            }
            if let (Some(id), Some((host, port))) = (current, source.clone()) {
                core.pool.set_source(id, host, port);
            }
            RxInProgress {
                handle,
                deliver: current.is_some(),
                is_datagram,
                source,
                declared: len,
                remaining: len,
                head: current,
                current,
            }
        });
        trace!(index, len, deliver = rx.deliver, "payload announcement");
        self.rx = Some(rx);
    }

    /// Drain payload bytes; returns how many of `data` were consumed.
    fn drain_payload(&mut self, shared: &Shared, data: &[u8]) -> usize {
        let Some(rx) = self.rx.as_mut() else {
            return 0;
        };
        let take = rx.remaining.min(data.len());
        let mut offset = 0;
        while offset < take && rx.deliver {
            let Some(current) = rx.current else {
                rx.deliver = false;
                break;
            };
            let written = shared.with_core(|core| core.pool.append(current, &data[offset..take]));
            offset += written;
            if written == 0 {
                // Node full with bytes still pending.
                let pending = rx.remaining - offset;
                Self::node_filled(shared, rx, pending);
            }
        }
        rx.remaining -= take;
        let done = rx.remaining == 0;
        if done {
            self.finish_payload(shared);
        }
        take
    }

    /// The current node filled mid-announcement: deliver it (stream) or
    /// chain a fresh one behind it (datagram).
    fn node_filled(shared: &Shared, rx: &mut RxInProgress, pending: usize) {
        let filled = match rx.current.take() {
            Some(id) => id,
            None => return,
        };
        if rx.is_datagram {
            let next = shared.with_core(|core| {
                let next = core.pool.alloc(pending);
                if let Some(next) = next {
                    core.pool.set_next(filled, next);
                }
                next
            });
            if next.is_none() {
                rx.deliver = false;
            }
            rx.current = next;
            return;
        }

        // Stream: hand the filled node over immediately.
        let len = shared.with_core(|core| core.pool.len(filled));
        let control = shared.deliver_data(rx.handle, filled, len, None);
        if control == RxControl::Ignore {
            rx.deliver = false;
            return;
        }
        let next = shared.with_core(|core| core.pool.alloc(pending));
        if next.is_none() {
            rx.deliver = false;
        }
        rx.head = next;
        rx.current = next;
    }

    /// Declared length exhausted: deliver what was collected and leave
    /// payload mode.
    fn finish_payload(&mut self, shared: &Shared) {
        let Some(rx) = self.rx.take() else {
            return;
        };
        shared.with_core(|core| {
            if core.table.is_current(rx.handle) {
                if let Some(slot) = core.table.slot_mut(rx.handle.index as usize) {
                    slot.total_received += rx.declared as u64;
                    slot.first_data_seen = true;
                }
            }
        });

        if !rx.deliver {
            // Undelivered nodes (allocation ran dry or delivery was
            // switched off mid-announcement) go back to the pool.
            if let Some(head) = if rx.is_datagram { rx.head } else { rx.current } {
                shared.with_core(|core| {
                    core.pool.release(head);
                });
            }
            return;
        }

        if rx.is_datagram {
            if let Some(head) = rx.head {
                let len = shared.with_core(|core| core.pool.chain_len(head));
                shared.deliver_data(rx.handle, head, len, rx.source);
            }
        } else if let Some(current) = rx.current {
            let len = shared.with_core(|core| core.pool.len(current));
            if len > 0 {
                shared.deliver_data(rx.handle, current, len, None);
            } else {
                shared.with_core(|core| {
                    core.pool.release(current);
                });
            }
        }
    }

    /// Whether the reader is mid-payload (bytes still owed).
    #[cfg(test)]
    pub(crate) fn payload_remaining(&self) -> Option<usize> {
        self.rx.as_ref().map(|rx| rx.remaining)
    }
}

impl RxInProgress {
    /// Drain-and-drop state for a stale or unbuffered announcement.
    fn dropped(index: usize, len: usize) -> Self {
        RxInProgress {
            handle: ConnHandle { index: index as u8, generation: 0 },
            deliver: false,
            is_datagram: false,
            source: None,
            declared: len,
            remaining: len,
            head: None,
            current: None,
        }
    }
}

fn flight_matches(
    in_flight: &Option<crate::state::InFlight>,
    family: Family,
    index: usize,
) -> bool {
    in_flight
        .as_ref()
        .and_then(|flight| flight.conn.map(|conn| (flight.family, conn)))
        .is_some_and(|(flight_family, conn)| {
            flight_family == family && conn.index as usize == index
        })
}
