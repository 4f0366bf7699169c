//! Response-line classification.
//!
//! Every complete line flushed by the accumulator is matched against a
//! fixed catalogue and mapped to a [`ResponseLine`]. The catalogue
//! covers the terminal tokens that complete a command element, the
//! multiplexed per-connection results, payload announcements, and the
//! unsolicited indications the engine routes to listeners. Anything
//! unmatched is returned as [`ResponseLine::Info`] so identification
//! text and echoes survive untouched.

use log::trace;

use crate::constants::RECEIVE_PREFIX;

/// SIM readiness as reported by a `+CPIN:` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinState {
    /// SIM is ready for use.
    Ready,
    /// SIM is waiting for the PIN.
    SimPin,
    /// SIM is blocked and waiting for the PUK.
    SimPuk,
    /// No SIM card present.
    NotInserted,
    /// Any other reported state, verbatim.
    Other(String),
}

/// Network registration status from a `+CREG:` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationStatus {
    /// Not registered, not searching.
    NotRegistered,
    /// Registered on the home network.
    Home,
    /// Not registered, searching for an operator.
    Searching,
    /// Registration denied.
    Denied,
    /// Status unknown.
    Unknown,
    /// Registered, roaming.
    Roaming,
}

impl RegistrationStatus {
    /// Map the numeric `<stat>` field onto a status.
    pub fn from_code(code: u32) -> Self {
        match code {
            1 => RegistrationStatus::Home,
            2 => RegistrationStatus::Searching,
            3 => RegistrationStatus::Denied,
            5 => RegistrationStatus::Roaming,
            0 => RegistrationStatus::NotRegistered,
            _ => RegistrationStatus::Unknown,
        }
    }

    /// Whether this status counts as registered.
    pub fn is_registered(self) -> bool {
        matches!(self, RegistrationStatus::Home | RegistrationStatus::Roaming)
    }
}

/// A classified response line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    /// Terminal success token.
    Ok,
    /// Terminal error token.
    Error,
    /// Extended device error (`+CME ERROR: <n>`).
    CmeError(u32),
    /// Extended messaging error (`+CMS ERROR: <n>`).
    CmsError(u32),
    /// `<id>, CONNECT OK`: connection open succeeded.
    ConnectOk(usize),
    /// `<id>, CONNECT FAIL`: connection open failed.
    ConnectFail(usize),
    /// `<id>, ALREADY CONNECT`: slot already open on the device.
    AlreadyConnect(usize),
    /// `<id>, SEND OK`: chunk accepted by the peer.
    SendOk(usize),
    /// `<id>, SEND FAIL`: chunk transmission failed.
    SendFail(usize),
    /// `<id>, CLOSE OK`: close command confirmed.
    CloseOk(usize),
    /// `<id>, CLOSED`: peer closed the connection (unsolicited).
    Closed(usize),
    /// `+RECEIVE,<id>,<len>:`: inline payload follows.
    ReceiveAnnounce {
        /// Connection slot the payload belongs to.
        conn: usize,
        /// Declared payload length in bytes.
        len: usize,
    },
    /// `+CPIN: <state>`: SIM status report.
    Pin(PinState),
    /// `+CREG:`: registration status (solicited or unsolicited).
    Registration(RegistrationStatus),
    /// `+CSQ: <rssi>,<ber>`: signal quality report.
    SignalQuality {
        /// Received signal strength indicator (0..=31, 99 unknown).
        rssi: u8,
        /// Bit error rate index (0..=7, 99 unknown).
        ber: u8,
    },
    /// `+CFUN: <n>`: functionality level report.
    Functionality(u8),
    /// `+CGATT: <n>`: packet-domain attach state report.
    Attached(bool),
    /// Bare dotted-quad line: local address acquired.
    LocalAddress(String),
    /// `RING`: incoming call indication.
    Ring,
    /// `NO CARRIER`: call or link dropped.
    NoCarrier,
    /// `+PDP: DEACT`: the network deactivated the data context.
    PdpDeactivated,
    /// `NORMAL POWER DOWN`: device announced shutdown.
    PowerDown,
    /// `SHUT OK`: context shutdown confirmed.
    ShutOk,
    /// Anything else: identification text, echo, intermediate output.
    Info(String),
}

/// Classify one complete line.
pub fn classify(line: &str) -> ResponseLine {
    let line = line.trim();
    let classified = classify_inner(line);
    trace!("classified {:?} as {:?}", line, classified);
    classified
}

fn classify_inner(line: &str) -> ResponseLine {
    match line {
        "OK" => return ResponseLine::Ok,
        "ERROR" => return ResponseLine::Error,
        "RING" => return ResponseLine::Ring,
        "NO CARRIER" => return ResponseLine::NoCarrier,
        "SHUT OK" => return ResponseLine::ShutOk,
        "NORMAL POWER DOWN" => return ResponseLine::PowerDown,
        "+PDP: DEACT" => return ResponseLine::PdpDeactivated,
        _ => {}
    }

    if let Some(rest) = line.strip_prefix("+CME ERROR:") {
        return match rest.trim().parse::<u32>() {
            Ok(code) => ResponseLine::CmeError(code),
            Err(_) => ResponseLine::Error,
        };
    }
    if let Some(rest) = line.strip_prefix("+CMS ERROR:") {
        return match rest.trim().parse::<u32>() {
            Ok(code) => ResponseLine::CmsError(code),
            Err(_) => ResponseLine::Error,
        };
    }
    if let Some(rest) = line.strip_prefix(RECEIVE_PREFIX) {
        if let Some(announce) = parse_receive(rest) {
            return announce;
        }
    }
    if let Some(rest) = line.strip_prefix("+CPIN:") {
        return ResponseLine::Pin(match rest.trim() {
            "READY" => PinState::Ready,
            "SIM PIN" => PinState::SimPin,
            "SIM PUK" => PinState::SimPuk,
            "NOT INSERTED" => PinState::NotInserted,
            other => PinState::Other(other.to_string()),
        });
    }
    if let Some(rest) = line.strip_prefix("+CREG:") {
        if let Some(status) = parse_registration(rest) {
            return ResponseLine::Registration(status);
        }
    }
    if let Some(rest) = line.strip_prefix("+CSQ:") {
        if let Some((rssi, ber)) = parse_pair(rest) {
            return ResponseLine::SignalQuality { rssi, ber };
        }
    }
    if let Some(rest) = line.strip_prefix("+CFUN:") {
        if let Ok(level) = rest.trim().parse::<u8>() {
            return ResponseLine::Functionality(level);
        }
    }
    if let Some(rest) = line.strip_prefix("+CGATT:") {
        if let Ok(state) = rest.trim().parse::<u8>() {
            return ResponseLine::Attached(state != 0);
        }
    }
    if let Some(result) = parse_connection_result(line) {
        return result;
    }
    if is_dotted_quad(line) {
        return ResponseLine::LocalAddress(line.to_string());
    }

    ResponseLine::Info(line.to_string())
}

/// Parse the `<id>,<len>[:]` tail of a payload announcement.
fn parse_receive(rest: &str) -> Option<ResponseLine> {
    let rest = rest.trim_end_matches(':');
    let (conn, len) = rest.split_once(',')?;
    Some(ResponseLine::ReceiveAnnounce {
        conn: conn.trim().parse().ok()?,
        len: len.trim().parse().ok()?,
    })
}

/// Parse `<stat>` or `<n>,<stat>` after `+CREG:`.
fn parse_registration(rest: &str) -> Option<RegistrationStatus> {
    // Solicited form carries the URC mode first; the status is the
    // last numeric field either way.
    let stat = rest.trim().rsplit(',').next()?.trim().parse::<u32>().ok()?;
    Some(RegistrationStatus::from_code(stat))
}

/// Parse a `<a>,<b>` pair of small integers.
fn parse_pair(rest: &str) -> Option<(u8, u8)> {
    let (a, b) = rest.trim().split_once(',')?;
    Some((a.trim().parse().ok()?, b.trim().parse().ok()?))
}

/// Parse multiplexed `<id>, <RESULT>` connection lines.
fn parse_connection_result(line: &str) -> Option<ResponseLine> {
    let (id, rest) = line.split_once(',')?;
    let conn = id.trim().parse::<usize>().ok()?;
    match rest.trim() {
        "CONNECT OK" => Some(ResponseLine::ConnectOk(conn)),
        "CONNECT FAIL" => Some(ResponseLine::ConnectFail(conn)),
        "ALREADY CONNECT" => Some(ResponseLine::AlreadyConnect(conn)),
        "SEND OK" => Some(ResponseLine::SendOk(conn)),
        "SEND FAIL" => Some(ResponseLine::SendFail(conn)),
        "CLOSE OK" => Some(ResponseLine::CloseOk(conn)),
        "CLOSED" => Some(ResponseLine::Closed(conn)),
        _ => None,
    }
}

/// Whether a line is a bare IPv4 dotted quad.
fn is_dotted_quad(line: &str) -> bool {
    let mut parts = 0;
    for part in line.split('.') {
        if part.is_empty() || part.parse::<u8>().is_err() {
            return false;
        }
        parts += 1;
    }
    parts == 4
}
