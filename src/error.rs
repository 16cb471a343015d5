//! Error types for poolgate-wire.
//!
//! Every fallible operation in the crate returns [`Result`]. Failures that
//! cross the control channel or a process boundary are first narrowed to an
//! [`ErrorCode`], the closed enumeration used both as the wire status byte
//! and as the CLI exit code.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Connection-fatal conditions (handshake failures, protocol violations,
/// security mandated but unavailable) poison only the connection they
/// occurred on. No variant ever terminates the process; the binaries map
/// errors to exit codes at the very end of `main`.
#[derive(Debug, Error)]
pub enum Error {
    /// Input rejected before any network I/O took place.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The peer could not be resolved or connected to.
    #[error("host unreachable: {0}")]
    Unreachable(String),

    /// A configured deadline elapsed. Only the in-flight operation was
    /// cancelled; the caller decides whether the session survives.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The control listener rejected the submitted credentials.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Malformed or unexpected wire data.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The TLS handshake itself failed, in either role.
    #[error("security handshake failed: {0}")]
    Handshake(String),

    /// Underlying transport error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The operation requires security support that is not built in.
    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// Bad or missing configuration, detected at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// The peer closed the connection mid-exchange.
    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    /// An operation was attempted in the wrong security state.
    #[error("invalid connection state: expected {expected}, actual {actual}")]
    InvalidState { expected: String, actual: String },
}

impl Error {
    /// Narrow this error to its wire/exit code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::InvalidArgument(_) | Error::Config(_) => ErrorCode::InvalidArgument,
            Error::Unreachable(_) => ErrorCode::Unreachable,
            Error::Timeout(_) => ErrorCode::Timeout,
            Error::AuthFailed(_) => ErrorCode::AuthFailed,
            Error::Protocol(_) | Error::InvalidState { .. } => ErrorCode::Protocol,
            Error::Handshake(_) => ErrorCode::Handshake,
            Error::Io(_) | Error::ConnectionClosed => ErrorCode::Io,
            Error::Unsupported(_) => ErrorCode::Unsupported,
        }
    }

    /// Process exit code for the CLI front ends. Zero is reserved for
    /// success, so every code here is non-zero.
    pub fn exit_code(&self) -> u8 {
        self.code() as u8
    }
}

/// Closed enumeration of failure kinds shared between the wire protocol and
/// the CLI exit codes.
///
/// Wire values are stable: the control listener and the tools must agree on
/// them across versions. `u8 -> ErrorCode` and `str -> ErrorCode` both
/// round-trip with their inverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    InvalidArgument = 1,
    Unreachable = 2,
    Timeout = 3,
    AuthFailed = 4,
    Protocol = 5,
    Handshake = 6,
    Io = 7,
    Unsupported = 8,
}

impl ErrorCode {
    /// All codes, in wire-value order. Handy for exhaustive tests and for
    /// the listener's dispatch tables.
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::InvalidArgument,
        ErrorCode::Unreachable,
        ErrorCode::Timeout,
        ErrorCode::AuthFailed,
        ErrorCode::Protocol,
        ErrorCode::Handshake,
        ErrorCode::Io,
        ErrorCode::Unsupported,
    ];

    /// Wire status byte for this code.
    pub fn as_wire(self) -> u8 {
        self as u8
    }

    /// Decode a wire status byte. `None` for unknown values; the decoder
    /// turns that into a protocol error rather than panicking.
    pub fn from_wire(value: u8) -> Option<ErrorCode> {
        match value {
            1 => Some(ErrorCode::InvalidArgument),
            2 => Some(ErrorCode::Unreachable),
            3 => Some(ErrorCode::Timeout),
            4 => Some(ErrorCode::AuthFailed),
            5 => Some(ErrorCode::Protocol),
            6 => Some(ErrorCode::Handshake),
            7 => Some(ErrorCode::Io),
            8 => Some(ErrorCode::Unsupported),
            _ => None,
        }
    }

    /// Human-readable form, the inverse of [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidArgument => "invalid argument",
            ErrorCode::Unreachable => "host unreachable",
            ErrorCode::Timeout => "operation timed out",
            ErrorCode::AuthFailed => "authentication failed",
            ErrorCode::Protocol => "protocol error",
            ErrorCode::Handshake => "security handshake failed",
            ErrorCode::Io => "I/O error",
            ErrorCode::Unsupported => "operation not supported",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<ErrorCode> {
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| Error::Protocol(format!("unknown error code string: {s:?}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_values_round_trip() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_wire(code.as_wire()), Some(code));
        }
    }

    #[test]
    fn strings_round_trip() {
        for code in ErrorCode::ALL {
            assert_eq!(code.as_str().parse::<ErrorCode>().unwrap(), code);
        }
    }

    #[test]
    fn unknown_wire_value_is_none() {
        assert_eq!(ErrorCode::from_wire(0), None);
        assert_eq!(ErrorCode::from_wire(9), None);
        assert_eq!(ErrorCode::from_wire(255), None);
    }

    #[test]
    fn unknown_string_is_error() {
        assert!("no such code".parse::<ErrorCode>().is_err());
    }

    #[test]
    fn exit_codes_are_stable_and_nonzero() {
        assert_eq!(Error::InvalidArgument("x".into()).exit_code(), 1);
        assert_eq!(Error::Unreachable("x".into()).exit_code(), 2);
        assert_eq!(Error::Timeout("x".into()).exit_code(), 3);
        assert_eq!(Error::AuthFailed("x".into()).exit_code(), 4);
        assert_eq!(Error::Protocol("x".into()).exit_code(), 5);
        assert_eq!(Error::Handshake("x".into()).exit_code(), 6);
        assert_eq!(Error::ConnectionClosed.exit_code(), 7);
        assert_eq!(Error::Unsupported("x".into()).exit_code(), 8);
        for code in ErrorCode::ALL {
            assert_ne!(code.as_wire(), 0);
        }
    }

    #[test]
    fn config_errors_map_to_invalid_argument() {
        assert_eq!(Error::Config("bad path".into()).code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn state_errors_map_to_protocol() {
        let err = Error::InvalidState {
            expected: "requested".into(),
            actual: "failed".into(),
        };
        assert_eq!(err.code(), ErrorCode::Protocol);
    }
}
