//! Command elements transmitted by the engine.
//!
//! One variant per concrete wire element the sub-command dispatcher can
//! arm. [`AtCommand::encode`] produces the exact bytes for the link,
//! including the two-byte terminator.

use crate::constants::LINE_TERMINATOR;
use crate::error::{ProtocolError, ProtocolResult};

/// Validate a value for embedding in a quoted command argument.
///
/// Quotes would terminate the argument early and control characters
/// would corrupt the line framing, so both are rejected up front.
pub fn validate_quoted_arg(value: &str) -> ProtocolResult<()> {
    if value.contains('"') || value.chars().any(|c| c.is_control()) {
        return Err(ProtocolError::InvalidArgument(format!(
            "{:?} cannot be quoted on the wire",
            value
        )));
    }
    Ok(())
}

/// Transport type of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    /// TCP stream.
    Stream,
    /// UDP datagram.
    Datagram,
    /// TLS-wrapped TCP stream (the device terminates TLS).
    SecuredStream,
}

impl SocketKind {
    /// The mode string used in the open element.
    pub fn mode_str(self) -> &'static str {
        match self {
            SocketKind::Stream => "TCP",
            SocketKind::Datagram => "UDP",
            SocketKind::SecuredStream => "SSL",
        }
    }
}

/// Commands that can be sent to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtCommand {
    /// Disable command echo. First element of device bring-up.
    EchoOff,

    /// Set the functionality level (1 = full).
    SetFunctionality {
        /// Functionality level.
        level: u8,
    },

    /// Query the current functionality level.
    QueryFunctionality,

    /// Enable numeric extended error reports.
    VerboseErrors,

    /// Query device identification text.
    QueryIdentification,

    /// Enable unsolicited registration-status indications.
    EnableRegistrationUrc,

    /// Enable multi-connection mode (one slot id per connection).
    EnableMultiplex,

    /// Query SIM status.
    QuerySimStatus,

    /// Enter the SIM PIN.
    EnterPin {
        /// The PIN digits.
        pin: String,
    },

    /// Query signal quality.
    QuerySignalQuality,

    /// Query packet-domain attach state.
    QueryAttach,

    /// Attach to or detach from the packet domain.
    SetAttach {
        /// `true` to attach, `false` to detach.
        attach: bool,
    },

    /// Configure the access point for the data context.
    ConfigureApn {
        /// Access point name.
        apn: String,
        /// User name (may be empty).
        user: String,
        /// Password (may be empty).
        password: String,
    },

    /// Bring up the wireless data context.
    BringUpContext,

    /// Query the local address assigned to the context.
    QueryLocalAddress,

    /// Probe the status of all connection slots.
    QueryConnectionStatus,

    /// Open a connection on a slot.
    Open {
        /// Connection slot id.
        conn: usize,
        /// Transport type.
        kind: SocketKind,
        /// Remote host name or address.
        host: String,
        /// Remote port.
        port: u16,
    },

    /// Declare a raw send of `len` bytes on a slot; the device answers
    /// with the prompt when it is ready for them.
    SendPrepare {
        /// Connection slot id.
        conn: usize,
        /// Number of raw bytes that will follow the prompt.
        len: usize,
    },

    /// Close a connection slot.
    Close {
        /// Connection slot id.
        conn: usize,
    },

    /// Shut down the data context and all connections.
    ShutContext,

    /// Escape hatch: transmit a raw command line verbatim.
    Raw {
        /// The command text (without terminator).
        command: String,
    },
}

impl AtCommand {
    /// The command text, without the line terminator.
    pub fn to_command_string(&self) -> String {
        match self {
            AtCommand::EchoOff => "ATE0".to_string(),
            AtCommand::SetFunctionality { level } => format!("AT+CFUN={}", level),
            AtCommand::QueryFunctionality => "AT+CFUN?".to_string(),
            AtCommand::VerboseErrors => "AT+CMEE=1".to_string(),
            AtCommand::QueryIdentification => "ATI".to_string(),
            AtCommand::EnableRegistrationUrc => "AT+CREG=1".to_string(),
            AtCommand::EnableMultiplex => "AT+CIPMUX=1".to_string(),
            AtCommand::QuerySimStatus => "AT+CPIN?".to_string(),
            AtCommand::EnterPin { pin } => format!("AT+CPIN={}", pin),
            AtCommand::QuerySignalQuality => "AT+CSQ".to_string(),
            AtCommand::QueryAttach => "AT+CGATT?".to_string(),
            AtCommand::SetAttach { attach } => {
                format!("AT+CGATT={}", if *attach { 1 } else { 0 })
            }
            AtCommand::ConfigureApn { apn, user, password } => {
                format!("AT+CSTT=\"{}\",\"{}\",\"{}\"", apn, user, password)
            }
            AtCommand::BringUpContext => "AT+CIICR".to_string(),
            AtCommand::QueryLocalAddress => "AT+CIFSR".to_string(),
            AtCommand::QueryConnectionStatus => "AT+CIPSTATUS".to_string(),
            AtCommand::Open { conn, kind, host, port } => {
                format!("AT+CIPSTART={},\"{}\",\"{}\",{}", conn, kind.mode_str(), host, port)
            }
            AtCommand::SendPrepare { conn, len } => format!("AT+CIPSEND={},{}", conn, len),
            AtCommand::Close { conn } => format!("AT+CIPCLOSE={}", conn),
            AtCommand::ShutContext => "AT+CIPSHUT".to_string(),
            AtCommand::Raw { command } => command.clone(),
        }
    }

    /// Encode the command for transmission, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let text = self.to_command_string();
        let mut buf = Vec::with_capacity(text.len() + LINE_TERMINATOR.len());
        buf.extend_from_slice(text.as_bytes());
        buf.extend_from_slice(LINE_TERMINATOR.as_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_appends_terminator() {
        let encoded = AtCommand::EchoOff.encode();
        assert_eq!(encoded, b"ATE0\r\n");
    }

    #[test]
    fn test_open_element() {
        let cmd = AtCommand::Open {
            conn: 2,
            kind: SocketKind::Stream,
            host: "example.net".to_string(),
            port: 8883,
        };
        assert_eq!(
            cmd.to_command_string(),
            "AT+CIPSTART=2,\"TCP\",\"example.net\",8883"
        );
    }

    #[test]
    fn test_send_prepare_declares_length() {
        let cmd = AtCommand::SendPrepare { conn: 0, len: 512 };
        assert_eq!(cmd.to_command_string(), "AT+CIPSEND=0,512");
    }

    #[test]
    fn test_apn_quoting() {
        let cmd = AtCommand::ConfigureApn {
            apn: "internet".to_string(),
            user: String::new(),
            password: String::new(),
        };
        assert_eq!(cmd.to_command_string(), "AT+CSTT=\"internet\",\"\",\"\"");
    }

    #[test]
    fn test_quoted_arg_validation() {
        assert!(validate_quoted_arg("internet.apn").is_ok());
        assert!(validate_quoted_arg("host\"injected").is_err());
        assert!(validate_quoted_arg("line\r\nbreak").is_err());
    }

    #[test]
    fn test_socket_modes() {
        assert_eq!(SocketKind::Stream.mode_str(), "TCP");
        assert_eq!(SocketKind::Datagram.mode_str(), "UDP");
        assert_eq!(SocketKind::SecuredStream.mode_str(), "SSL");
    }
}
