//! The engine context and its two worker threads.
//!
//! ## Architecture
//!
//! One explicitly owned [`Engine`] drives the device for its whole
//! lifetime. Two persistent threads do all the work:
//!
//! - The **producer** dequeues one envelope at a time, transmits the
//!   current command element, and waits on a depth-one step channel.
//! - The **processor** drains raw input through the [`Reader`],
//!   releasing the step channel when it recognizes the terminal line of
//!   the outstanding element.
//!
//! The depth-one channel *is* the "one outstanding command element"
//! invariant: it is released exactly once per cycle, by the processor
//! on the response path or by the producer's drain on the timeout
//! path.
//!
//! Shared state sits behind a single re-entrant lock so listener
//! callbacks, which run under it, may re-enter engine read paths.
//! Blocking submissions from either worker thread are rejected
//! outright: that is the deadlock the re-entrancy rule cannot save.

use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, ReentrantMutex};
use tracing::{debug, trace, warn};

use crate::buffer::BufferId;
use crate::config::EngineConfig;
use crate::conn::{ConnEvent, ConnHandle, ConnListener, PendingWrite, RxControl};
use crate::dispatch::{self, StepCtx, StepDecision, StepOutcome};
use crate::envelope::{CallOptions, Envelope, Family, FamilyPayload};
use crate::error::{EngineError, EngineResult};
use crate::events::{Event, Listener, ListenerId, ListenerList};
use crate::reader::Reader;
use crate::state::{Core, InFlight};

use atmux_protocol::{PinState, RegistrationStatus, SocketKind};

/// Externally supplied transmit function; receives the exact bytes to
/// put on the wire.
pub type TransmitFn = Box<dyn FnMut(&[u8]) + Send>;

/// Notifications produced under the core borrow, delivered after it is
/// released.
pub(crate) enum Outbound {
    Event(Event),
    ConnActive {
        handle: ConnHandle,
    },
    ConnClosed {
        handle: ConnHandle,
        listener: Option<ConnListener>,
    },
}

/// State shared between the API surface and the worker threads.
pub(crate) struct Shared {
    core: ReentrantMutex<RefCell<Core>>,
    listeners: Mutex<ListenerList>,
    transmit: Mutex<TransmitFn>,
    step_tx: Sender<StepOutcome>,
    device_present: AtomicBool,
    shutdown: AtomicBool,
    worker_ids: Mutex<Vec<ThreadId>>,
    config: EngineConfig,
}

impl Shared {
    /// Run `f` with the core borrowed mutably. The re-entrant lock is
    /// held for the duration; the borrow is not.
    pub(crate) fn with_core<R>(&self, f: impl FnOnce(&mut Core) -> R) -> R {
        let guard = self.core.lock();
        let mut core = guard.borrow_mut();
        f(&mut core)
    }

    /// Run a dispatcher step: core borrow plus the transmit function.
    fn dispatch_step<R>(
        &self,
        outbound: &mut Vec<Outbound>,
        f: impl FnOnce(&mut StepCtx) -> R,
    ) -> R {
        let guard = self.core.lock();
        let mut core = guard.borrow_mut();
        let mut transmit = self.transmit.lock();
        let mut ctx = StepCtx {
            core: &mut core,
            config: &self.config,
            transmit: &mut **transmit,
            outbound,
        };
        f(&mut ctx)
    }

    pub(crate) fn in_flight(&self) -> Option<InFlight> {
        self.with_core(|core| core.in_flight)
    }

    /// Release the producer's step channel with a terminal outcome.
    /// No-op when nothing is in flight (stray terminal line).
    pub(crate) fn release_step(&self, outcome: StepOutcome) {
        if self.in_flight().is_none() {
            trace!(?outcome, "terminal line with no command in flight");
            return;
        }
        if self.step_tx.try_send(outcome).is_err() {
            // Depth one: a second release in the same cycle is dropped.
            warn!("step release dropped: cycle already released");
        }
    }

    fn transmit_raw(&self, bytes: &[u8]) {
        (self.transmit.lock())(bytes);
    }

    /// Prompt received: put the staged send bytes on the wire.
    pub(crate) fn transmit_staged(&self) {
        let staged = self.with_core(|core| core.staged.take());
        match staged {
            Some(bytes) => {
                debug!(len = bytes.len(), "prompt: transmitting staged payload");
                self.transmit_raw(&bytes);
            }
            None => warn!("prompt with no staged payload"),
        }
    }

    pub(crate) fn set_device_present(&self, present: bool) {
        self.device_present.store(present, Ordering::SeqCst);
    }

    fn is_worker_thread(&self) -> bool {
        self.worker_ids.lock().contains(&thread::current().id())
    }

    /// Invoke the global listener list, in registration order, under
    /// the re-entrant lock.
    pub(crate) fn emit_global(&self, event: &Event) {
        let _guard = self.core.lock();
        self.listeners.lock().emit(event);
    }

    /// Deliver a payload buffer: the connection-scoped listener takes
    /// priority; ownership of the buffer reference passes on. A stale
    /// handle drops the buffer instead.
    pub(crate) fn deliver_data(
        &self,
        handle: ConnHandle,
        buffer: BufferId,
        len: usize,
        source: Option<(String, u16)>,
    ) -> RxControl {
        let guard = self.core.lock();
        let listener = {
            let mut core = guard.borrow_mut();
            if !core.table.is_current(handle) {
                core.pool.release(buffer);
                return RxControl::Ignore;
            }
            core.table
                .slot_mut(handle.index as usize)
                .and_then(|slot| slot.listener.take())
        };
        match listener {
            Some(mut listener) => {
                let control = listener(handle, ConnEvent::Data { buffer, len, source });
                let mut core = guard.borrow_mut();
                if core.table.is_current(handle) {
                    if let Some(slot) = core.table.slot_mut(handle.index as usize) {
                        if slot.listener.is_none() {
                            slot.listener = Some(listener);
                        }
                    }
                }
                control
            }
            None => {
                self.listeners.lock().emit(&Event::DataReceived {
                    handle,
                    buffer,
                    len,
                    source,
                });
                RxControl::Accept
            }
        }
    }

    /// Emit the single close notification for a deactivated slot.
    pub(crate) fn notify_closed(&self, handle: ConnHandle, listener: Option<ConnListener>) {
        let _guard = self.core.lock();
        match listener {
            Some(mut listener) => {
                listener(handle, ConnEvent::Closed);
            }
            None => self
                .listeners
                .lock()
                .emit(&Event::ConnectionClosed { handle }),
        }
    }

    /// Emit the single activation notification for an opened slot.
    fn notify_active(&self, handle: ConnHandle) {
        let guard = self.core.lock();
        let (listener, client_initiated) = {
            let mut core = guard.borrow_mut();
            let Some(slot) = core.table.slot_mut(handle.index as usize) else {
                return;
            };
            (slot.listener.take(), slot.client_initiated)
        };
        match listener {
            Some(mut listener) => {
                listener(handle, ConnEvent::Active { client_initiated });
                let mut core = guard.borrow_mut();
                if let Some(slot) = core.table.slot_mut(handle.index as usize) {
                    if slot.listener.is_none() {
                        slot.listener = Some(listener);
                    }
                }
            }
            None => self.listeners.lock().emit(&Event::ConnectionActive {
                handle,
                client_initiated,
            }),
        }
    }

    fn flush_outbound(&self, outbound: Vec<Outbound>) {
        for notice in outbound {
            match notice {
                Outbound::Event(event) => self.emit_global(&event),
                Outbound::ConnActive { handle } => self.notify_active(handle),
                Outbound::ConnClosed { handle, listener } => self.notify_closed(handle, listener),
            }
        }
    }
}

// ============================================================================
// Worker threads
// ============================================================================

fn producer_loop(
    shared: Arc<Shared>,
    cmd_rx: Receiver<Envelope>,
    step_rx: Receiver<StepOutcome>,
) {
    shared.worker_ids.lock().push(thread::current().id());

    while let Ok(mut env) = cmd_rx.recv() {
        if shared.shutdown.load(Ordering::SeqCst) {
            env.resolve(Err(EngineError::Shutdown));
            continue;
        }

        // Family pre-delay: let a freshly reset device settle before
        // the first bring-up element.
        if env.family == Family::Initialize {
            thread::sleep(Duration::from_millis(shared.config.init_pre_delay_ms));
        }

        // The depth-one handshake must start every cycle empty.
        while step_rx.try_recv().is_ok() {}

        let mut outbound = Vec::new();
        let first = shared.dispatch_step(&mut outbound, |ctx| {
            ctx.core.in_flight = Some(InFlight {
                family: env.family,
                conn: env.conn(),
                // A send element terminates on its own result line,
                // never on the echoed OK.
                ok_terminates: env.family != Family::Send,
            });
            dispatch::first_step(&mut env, ctx)
        });
        shared.flush_outbound(outbound);

        let result = match first {
            StepDecision::Finish(result) => result,
            StepDecision::Continue => {
                // Each armed element restarts the bounded wait.
                let mut deadline = Instant::now() + env.max_wait;
                loop {
                    if shared.shutdown.load(Ordering::SeqCst) {
                        break Err(EngineError::Shutdown);
                    }
                    let wait = deadline
                        .saturating_duration_since(Instant::now())
                        .min(Duration::from_millis(50));
                    match step_rx.recv_timeout(wait) {
                        Ok(outcome) => {
                            let mut outbound = Vec::new();
                            let decision = shared.dispatch_step(&mut outbound, |ctx| {
                                dispatch::advance(&mut env, outcome, ctx)
                            });
                            shared.flush_outbound(outbound);
                            match decision {
                                StepDecision::Continue => {
                                    deadline = Instant::now() + env.max_wait;
                                    continue;
                                }
                                StepDecision::Finish(result) => break result,
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {
                            if Instant::now() < deadline {
                                continue;
                            }
                            warn!(family = ?env.family, "command element timed out");
                            let mut outbound = Vec::new();
                            shared.dispatch_step(&mut outbound, |ctx| {
                                dispatch::on_timeout(&env, ctx)
                            });
                            shared.flush_outbound(outbound);
                            // A late release must not leak into the
                            // next cycle; the producer empties the
                            // handshake itself.
                            let _ = step_rx.try_recv();
                            shared.emit_global(&Event::CommandTimeout { family: env.family });
                            break Err(EngineError::Timeout);
                        }
                        Err(RecvTimeoutError::Disconnected) => break Err(EngineError::Shutdown),
                    }
                }
            }
        };

        shared.with_core(|core| core.in_flight = None);
        env.resolve(result);
    }
}

fn processor_loop(shared: Arc<Shared>, raw_rx: Receiver<Vec<u8>>) {
    shared.worker_ids.lock().push(thread::current().id());

    let mut reader = Reader::new();
    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match raw_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(bytes) => reader.consume(&shared, &bytes),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// The engine: owns the worker threads and the shared state.
///
/// Created at initialization with the externally supplied transmit
/// function, torn down with [`Engine::shutdown`] (or on drop). All
/// state is rebuilt from device responses; nothing persists.
pub struct Engine {
    shared: Arc<Shared>,
    cmd_tx: Option<Sender<Envelope>>,
    raw_tx: Option<Sender<Vec<u8>>>,
    producer: Option<JoinHandle<()>>,
    processor: Option<JoinHandle<()>>,
}

impl Engine {
    /// Create the engine and start its worker threads.
    pub fn new(config: EngineConfig, transmit: TransmitFn) -> Self {
        let (step_tx, step_rx) = bounded(1);
        let (cmd_tx, cmd_rx) = bounded(config.queue_depth);
        let (raw_tx, raw_rx) = unbounded();

        let shared = Arc::new(Shared {
            core: ReentrantMutex::new(RefCell::new(Core::new(&config))),
            listeners: Mutex::new(ListenerList::new()),
            transmit: Mutex::new(transmit),
            step_tx,
            device_present: AtomicBool::new(true),
            shutdown: AtomicBool::new(false),
            worker_ids: Mutex::new(Vec::new()),
            config,
        });

        let producer_shared = Arc::clone(&shared);
        let producer = thread::spawn(move || producer_loop(producer_shared, cmd_rx, step_rx));
        let processor_shared = Arc::clone(&shared);
        let processor = thread::spawn(move || processor_loop(processor_shared, raw_rx));

        Engine {
            shared,
            cmd_tx: Some(cmd_tx),
            raw_tx: Some(raw_tx),
            producer: Some(producer),
            processor: Some(processor),
        }
    }

    // ========================================================================
    // Byte-stream boundary
    // ========================================================================

    /// Feed raw bytes received from the device.
    pub fn feed(&self, data: &[u8]) {
        if let Some(raw_tx) = &self.raw_tx {
            let _ = raw_tx.send(data.to_vec());
        }
    }

    // ========================================================================
    // Operations (uniform contract)
    // ========================================================================

    /// Device bring-up: echo, functionality, verbose errors,
    /// identification, registration indications, multiplexing, SIM
    /// readiness (with automatic PIN entry).
    pub fn initialize(&self, options: CallOptions) -> EngineResult<()> {
        self.submit(
            Family::Initialize,
            FamilyPayload::Initialize {
                pin: self.shared.config.sim_pin.clone(),
                sim_polls: 0,
                pin_entered: false,
            },
            options,
        )
    }

    /// Attach to the packet domain and bring up the data context.
    pub fn attach(
        &self,
        apn: &str,
        user: &str,
        password: &str,
        options: CallOptions,
    ) -> EngineResult<()> {
        validate_arg(apn)?;
        validate_arg(user)?;
        validate_arg(password)?;
        self.submit(
            Family::Attach,
            FamilyPayload::Attach {
                apn: apn.to_string(),
                user: user.to_string(),
                password: password.to_string(),
            },
            options,
        )
    }

    /// Shut the data context down. With `ignore_failure`, a
    /// deactivation error still resolves as success (data-only
    /// profiles).
    pub fn detach(&self, ignore_failure: bool, options: CallOptions) -> EngineResult<()> {
        self.submit(
            Family::Detach,
            FamilyPayload::Detach { ignore_failure },
            options,
        )
    }

    /// Open a connection. The slot is claimed immediately (the returned
    /// handle is valid for a non-blocking call as well); the activation
    /// notification fires on terminal success, exactly once.
    pub fn connect(
        &self,
        kind: SocketKind,
        host: &str,
        port: u16,
        listener: Option<ConnListener>,
        options: CallOptions,
    ) -> EngineResult<ConnHandle> {
        validate_arg(host)?;
        let handle = self
            .shared
            .with_core(|core| core.table.claim(kind, host.to_string(), port, listener))
            .ok_or(EngineError::NoFreeSlot)?;
        match self.submit(Family::Open, FamilyPayload::Open { handle }, options) {
            Ok(()) => Ok(handle),
            Err(err) => {
                // Whatever refused the submission, the claim must not
                // outlive the call; the dispatcher's own failure paths
                // have already recycled the slot when they ran.
                self.shared.with_core(|core| {
                    if core.table.is_current(handle) {
                        core.table.abandon(handle.index as usize);
                    }
                });
                Err(err)
            }
        }
    }

    /// Send data on a connection. The whole buffer is staged against
    /// the slot and transmitted in device-sized chunks.
    pub fn send(&self, handle: ConnHandle, data: &[u8], options: CallOptions) -> EngineResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        // A refused submission must leave the slot untouched; run the
        // admission checks before staging anything against it.
        if !self.shared.device_present.load(Ordering::SeqCst) {
            return Err(EngineError::NoDevice);
        }
        if options.blocking && self.shared.is_worker_thread() {
            return Err(EngineError::BlockingNotAllowed);
        }
        let staged = self.shared.with_core(|core| {
            if !core.table.is_current(handle) {
                return Err(EngineError::Closed);
            }
            let Some(slot) = core.table.slot_mut(handle.index as usize) else {
                return Err(EngineError::Closed);
            };
            if slot.pending_write.is_some() {
                return Err(EngineError::Busy);
            }
            slot.pending_write = Some(PendingWrite {
                data: data.to_vec(),
                cursor: 0,
            });
            Ok(())
        });
        staged?;
        let result = self.submit(
            Family::Send,
            FamilyPayload::Send {
                handle,
                attempts: 0,
                chunk_len: 0,
            },
            options,
        );
        if result.is_err() {
            // A submission that never reached the producer leaves the
            // staged write orphaned; unstage it so the slot is not
            // stuck busy.
            self.shared.with_core(|core| {
                if core.table.is_current(handle) {
                    if let Some(slot) = core.table.slot_mut(handle.index as usize) {
                        slot.pending_write = None;
                    }
                }
            });
        }
        result
    }

    /// Close a connection. Succeeds even when the slot already closed;
    /// the close routine is idempotent.
    pub fn close(&self, handle: ConnHandle, options: CallOptions) -> EngineResult<()> {
        self.submit(Family::Close, FamilyPayload::Close { handle }, options)
    }

    /// Query signal quality; the value lands in the cache and the
    /// listener path.
    pub fn query_signal_quality(&self, options: CallOptions) -> EngineResult<()> {
        self.submit(Family::SignalQuality, FamilyPayload::SignalQuality, options)
    }

    /// Query the functionality level; the value lands in the cache.
    pub fn query_functionality(&self, options: CallOptions) -> EngineResult<()> {
        self.submit(
            Family::Functionality,
            FamilyPayload::QueryFunctionality,
            options,
        )
    }

    fn submit(
        &self,
        family: Family,
        payload: FamilyPayload,
        options: CallOptions,
    ) -> EngineResult<()> {
        if !self.shared.device_present.load(Ordering::SeqCst) {
            return Err(EngineError::NoDevice);
        }
        if options.blocking && self.shared.is_worker_thread() {
            // A blocking wait from a worker thread can never be
            // released; refuse instead of deadlocking.
            return Err(EngineError::BlockingNotAllowed);
        }
        let Some(cmd_tx) = &self.cmd_tx else {
            return Err(EngineError::Shutdown);
        };

        let mut env = Envelope::new(family, payload, options);
        if env.blocking {
            let (done_tx, done_rx) = bounded(1);
            env.done = Some(done_tx);
            enqueue(cmd_tx, env)?;
            // The producer resolves every envelope in bounded time (its
            // own per-element timeout), so this wait is bounded too.
            match done_rx.recv() {
                Ok(result) => result,
                Err(_) => Err(EngineError::Shutdown),
            }
        } else {
            enqueue(cmd_tx, env)
        }
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register a global listener; invoked synchronously, in
    /// registration order, for every classified event.
    ///
    /// Listener callbacks may re-enter engine read paths, but must not
    /// register or remove listeners: the list is locked while they
    /// run.
    pub fn add_listener(&self, listener: Listener) -> ListenerId {
        self.shared.listeners.lock().add(listener)
    }

    /// Remove a previously registered listener. Subject to the same
    /// restriction as [`Engine::add_listener`]: never call this from
    /// inside a listener callback.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.lock().remove(id)
    }

    // ========================================================================
    // Cached feature state
    // ========================================================================

    /// Last reported SIM status.
    pub fn sim_status(&self) -> Option<PinState> {
        self.shared.with_core(|core| core.cached.sim.clone())
    }

    /// Last reported registration status.
    pub fn registration(&self) -> Option<RegistrationStatus> {
        self.shared.with_core(|core| core.cached.registration)
    }

    /// Last reported signal quality as `(rssi, ber)`.
    pub fn signal_quality(&self) -> Option<(u8, u8)> {
        self.shared.with_core(|core| core.cached.signal)
    }

    /// Local address acquired during attach.
    pub fn local_address(&self) -> Option<String> {
        self.shared.with_core(|core| core.cached.local_address.clone())
    }

    /// Identification text collected during bring-up.
    pub fn identity(&self) -> Option<String> {
        self.shared.with_core(|core| core.cached.identity.clone())
    }

    /// Last reported functionality level.
    pub fn functionality(&self) -> Option<u8> {
        self.shared.with_core(|core| core.cached.functionality)
    }

    /// Last reported packet-domain attach state.
    pub fn attached(&self) -> Option<bool> {
        self.shared.with_core(|core| core.cached.attached)
    }

    /// Whether a handle still refers to the live activation.
    pub fn is_connection_active(&self, handle: ConnHandle) -> bool {
        self.shared.with_core(|core| core.table.is_current(handle))
    }

    /// Total payload bytes received on the live activation.
    pub fn bytes_received(&self, handle: ConnHandle) -> Option<u64> {
        self.shared.with_core(|core| {
            core.table
                .is_current(handle)
                .then(|| core.table.slot(handle.index as usize).map(|s| s.total_received))
                .flatten()
        })
    }

    // ========================================================================
    // Buffer access
    // ========================================================================

    /// Read a delivered buffer's payload.
    pub fn with_buffer<R>(&self, id: BufferId, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        self.shared.with_core(|core| core.pool.data(id).map(f))
    }

    /// Next node of a delivered buffer chain.
    pub fn buffer_next(&self, id: BufferId) -> Option<BufferId> {
        self.shared.with_core(|core| core.pool.next(id))
    }

    /// Datagram source address of a delivered buffer.
    pub fn buffer_source(&self, id: BufferId) -> Option<(String, u16)> {
        self.shared.with_core(|core| core.pool.source(id).cloned())
    }

    /// Take one more reference on a delivered buffer.
    pub fn retain_buffer(&self, id: BufferId) {
        self.shared.with_core(|core| core.pool.retain(id));
    }

    /// Drop one reference; frees (with the chain tail) at zero.
    pub fn release_buffer(&self, id: BufferId) -> bool {
        self.shared.with_core(|core| core.pool.release(id))
    }

    // ========================================================================
    // Device presence and teardown
    // ========================================================================

    /// Mark the device present or absent. While absent, every
    /// submission fails immediately with `NoDevice`.
    pub fn set_device_present(&self, present: bool) {
        self.shared.set_device_present(present);
    }

    /// Whether the device is currently considered present.
    pub fn is_device_present(&self) -> bool {
        self.shared.device_present.load(Ordering::SeqCst)
    }

    /// Stop the worker threads and tear the engine down.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
        // Dropping the channels disconnects the worker loops.
        self.cmd_tx.take();
        self.raw_tx.take();
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
        if let Some(processor) = self.processor.take() {
            let _ = processor.join();
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Hand an envelope to the producer without blocking; a full queue is
/// an allocation refusal.
fn enqueue(cmd_tx: &Sender<Envelope>, env: Envelope) -> EngineResult<()> {
    match cmd_tx.try_send(env) {
        Ok(()) => Ok(()),
        Err(TrySendError::Full(_)) => Err(EngineError::OutOfMemory),
        Err(TrySendError::Disconnected(_)) => Err(EngineError::Shutdown),
    }
}

fn validate_arg(value: &str) -> EngineResult<()> {
    atmux_protocol::validate_quoted_arg(value)
        .map_err(|err| EngineError::InvalidArgument(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn null_transmit() -> TransmitFn {
        Box::new(|_| {})
    }

    #[test]
    fn test_no_device_fails_immediately() {
        let engine = Engine::new(EngineConfig::default(), null_transmit());
        engine.set_device_present(false);
        let result = engine.initialize(CallOptions::blocking());
        assert_eq!(result, Err(EngineError::NoDevice));
        engine.shutdown();
    }

    #[test]
    fn test_send_on_unknown_handle_is_closed() {
        let engine = Engine::new(EngineConfig::default(), null_transmit());
        let stale = ConnHandle { index: 0, generation: 7 };
        let result = engine.send(stale, b"data", CallOptions::blocking());
        assert_eq!(result, Err(EngineError::Closed));
        engine.shutdown();
    }

    #[test]
    fn test_connect_rejects_unquotable_host() {
        let engine = Engine::new(EngineConfig::default(), null_transmit());
        let result = engine.connect(
            SocketKind::Stream,
            "bad\"host",
            80,
            None,
            CallOptions::non_blocking(None),
        );
        assert!(matches!(result, Err(EngineError::InvalidArgument(_))));
        engine.shutdown();
    }

    #[test]
    fn test_connect_exhausts_slots() {
        let engine = Engine::new(EngineConfig::default(), null_transmit());
        // Non-blocking opens claim slots immediately.
        for _ in 0..crate::conn::MAX_CONNECTIONS {
            engine
                .connect(
                    SocketKind::Stream,
                    "host",
                    80,
                    None,
                    CallOptions::non_blocking(None),
                )
                .unwrap();
        }
        let result = engine.connect(
            SocketKind::Stream,
            "host",
            80,
            None,
            CallOptions::non_blocking(None),
        );
        assert!(matches!(result, Err(EngineError::NoFreeSlot)));
        engine.shutdown();
    }
}
