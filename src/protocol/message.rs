//! Message types for the negotiation probe and the control channel

use std::fmt;

use crate::error::{Error, ErrorCode, Result};
use crate::protocol::constants::{NEGOTIATE_CODE, NEGOTIATE_PACKET_LEN};

/// The first eight bytes of an inbound stream: packet length + request code.
///
/// Both the security probe and ordinary startup packets begin this way; the
/// reserved code is what tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Declared packet length, counting this field
    pub length: u32,
    /// Request code (protocol version or a reserved negotiation code)
    pub code: u32,
}

impl PacketHeader {
    /// True when this header is a security negotiation probe.
    pub fn is_negotiation_probe(&self) -> bool {
        self.length == NEGOTIATE_PACKET_LEN && self.code == NEGOTIATE_CODE
    }
}

/// Acceptor's single-byte answer to a negotiation probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationReply {
    /// `'S'`: proceed with the security handshake
    Accepted,
    /// `'N'`: continue in plaintext
    Declined,
}

impl NegotiationReply {
    pub fn as_byte(self) -> u8 {
        match self {
            NegotiationReply::Accepted => super::constants::reply::ACCEPTED,
            NegotiationReply::Declined => super::constants::reply::DECLINED,
        }
    }

    /// `None` for any byte outside the contract; the initiator treats that
    /// as a protocol violation, not a decline.
    pub fn from_byte(byte: u8) -> Option<NegotiationReply> {
        match byte {
            super::constants::reply::ACCEPTED => Some(NegotiationReply::Accepted),
            super::constants::reply::DECLINED => Some(NegotiationReply::Declined),
            _ => None,
        }
    }
}

/// Shutdown urgency carried by [`Command::Shutdown`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop accepting new sessions, wait for in-flight ones to finish
    Smart,
    /// Disconnect sessions, then stop
    Fast,
    /// Abort everything at once
    Immediate,
}

impl ShutdownMode {
    /// Wire byte, also the single-character CLI argument.
    pub fn as_wire(self) -> u8 {
        match self {
            ShutdownMode::Smart => b's',
            ShutdownMode::Fast => b'f',
            ShutdownMode::Immediate => b'i',
        }
    }

    pub fn from_wire(byte: u8) -> Option<ShutdownMode> {
        match byte {
            b's' => Some(ShutdownMode::Smart),
            b'f' => Some(ShutdownMode::Fast),
            b'i' => Some(ShutdownMode::Immediate),
            _ => None,
        }
    }

    /// Parse the CLI argument: exactly one of `s`, `f` or `i`.
    pub fn from_flag(flag: &str) -> Result<ShutdownMode> {
        let mut chars = flag.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) if c.is_ascii() => ShutdownMode::from_wire(c as u8)
                .ok_or_else(|| invalid_mode(flag)),
            _ => Err(invalid_mode(flag)),
        }
    }
}

fn invalid_mode(flag: &str) -> Error {
    Error::InvalidArgument(format!(
        "shutdown mode must be 's', 'f' or 'i', got {flag:?}"
    ))
}

impl fmt::Display for ShutdownMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ShutdownMode::Smart => "smart",
            ShutdownMode::Fast => "fast",
            ShutdownMode::Immediate => "immediate",
        };
        f.write_str(name)
    }
}

/// Administrative command sent over the control channel.
///
/// Constructors validate their inputs, so a `Command` value is well-formed
/// by the time it can be encoded. Validation failures happen before any
/// network I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Return a detached node to service
    AttachNode {
        /// Backend node id, `0..=max_backends`
        node_id: i32,
    },

    /// Remove a node from service
    DetachNode {
        /// Backend node id, `0..=max_backends`
        node_id: i32,
    },

    /// Shut the proxy down
    Shutdown {
        /// Urgency of the shutdown
        mode: ShutdownMode,
    },
}

impl Command {
    pub fn attach_node(node_id: i64, max_backends: i64) -> Result<Command> {
        let node_id = validate_node_id(node_id, max_backends)?;
        Ok(Command::AttachNode { node_id })
    }

    pub fn detach_node(node_id: i64, max_backends: i64) -> Result<Command> {
        let node_id = validate_node_id(node_id, max_backends)?;
        Ok(Command::DetachNode { node_id })
    }

    pub fn shutdown(mode: ShutdownMode) -> Command {
        Command::Shutdown { mode }
    }

    /// Frame tag for this command.
    pub fn tag(&self) -> u8 {
        match self {
            Command::AttachNode { .. } => super::constants::tags::ATTACH_NODE,
            Command::DetachNode { .. } => super::constants::tags::DETACH_NODE,
            Command::Shutdown { .. } => super::constants::tags::SHUTDOWN,
        }
    }

    /// Short name used as a metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            Command::AttachNode { .. } => "attach",
            Command::DetachNode { .. } => "detach",
            Command::Shutdown { .. } => "shutdown",
        }
    }
}

fn validate_node_id(node_id: i64, max_backends: i64) -> Result<i32> {
    if node_id < 0 || node_id > max_backends {
        return Err(Error::InvalidArgument(format!(
            "node id {node_id} out of range 0..={max_backends}"
        )));
    }
    Ok(node_id as i32)
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::AttachNode { node_id } => write!(f, "attach node {node_id}"),
            Command::DetachNode { node_id } => write!(f, "detach node {node_id}"),
            Command::Shutdown { mode } => write!(f, "{mode} shutdown"),
        }
    }
}

/// Any frame a client may send on the control channel.
///
/// This is the decode target for the listener side of the contract; the
/// session type never constructs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Credential submission preceding any command
    Authenticate {
        /// Operator user name
        user: String,
        /// Hex-encoded SHA-256 digest of the secret
        digest: String,
    },

    /// An administrative command
    Command(Command),

    /// Session goodbye; the client is done
    Goodbye,
}

/// Outcome reported by the control listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    /// Command executed
    Ok,
    /// Command failed with a known error code
    Err(ErrorCode),
}

impl ResponseStatus {
    pub fn is_success(self) -> bool {
        matches!(self, ResponseStatus::Ok)
    }

    /// Wire status byte: 0 for Ok, the error code's value otherwise.
    pub fn as_wire(self) -> u8 {
        match self {
            ResponseStatus::Ok => super::constants::STATUS_OK,
            ResponseStatus::Err(code) => code.as_wire(),
        }
    }

    /// `None` for status bytes outside the closed enumeration.
    pub fn from_wire(byte: u8) -> Option<ResponseStatus> {
        if byte == super::constants::STATUS_OK {
            return Some(ResponseStatus::Ok);
        }
        ErrorCode::from_wire(byte).map(ResponseStatus::Err)
    }
}

/// One response frame from the control listener
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: ResponseStatus,
    /// Optional human-readable detail
    pub message: Option<String>,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Response {
        Response {
            status: ResponseStatus::Ok,
            message: Some(message.into()),
        }
    }

    pub fn err(code: ErrorCode, message: impl Into<String>) -> Response {
        Response {
            status: ResponseStatus::Err(code),
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}
