//! Transport security negotiation and control channel for the Poolgate
//! connection pooler.
//!
//! This crate implements two wire surfaces of a pooling proxy:
//!
//! * **Security negotiation**: the 8-byte probe a database client (or the
//!   proxy itself, dialing a backend) sends before its startup packet, the
//!   single `'S'`/`'N'` marker byte answering it, and the optional TLS
//!   session established on the same stream. One [`Connection`] type serves
//!   both roles: acceptor toward clients, initiator toward backends.
//! * **Control channel**: a small framed protocol for administrative
//!   commands (attach node, detach node, shutdown), driven by a
//!   structurally ordered [`ControlSession`] and three thin command line
//!   tools built on it.
//!
//! All arguments are validated before any I/O, every network operation runs
//! under an explicit timeout, and error codes are stable across the wire
//! and process exit codes.
//!
//! # Example
//!
//! ```ignore
//! use poolgate_wire::{Connection, ExecContext, InboundNegotiation};
//! use poolgate_wire::connection::{SecurityPolicy, TlsSettings};
//!
//! let settings = TlsSettings::builder()
//!     .policy(SecurityPolicy::Prefer)
//!     .cert_path("/etc/poolgate/server.crt")
//!     .key_path("/etc/poolgate/server.key")
//!     .build()?;
//! let ctx = ExecContext::new(settings);
//!
//! // Per accepted client socket:
//! let mut conn = Connection::frontend(stream);
//! match conn.negotiate_inbound(&ctx).await? {
//!     InboundNegotiation::Negotiated => { /* secured or plaintext, see conn.state() */ }
//!     InboundNegotiation::Passthrough(header) => { /* ordinary startup packet */ }
//! }
//! ```

pub mod cli;
pub mod connection;
pub mod context;
pub mod control;
pub mod error;
pub mod metrics;
pub mod protocol;

pub use connection::{
    Connection, ConnectionRole, InboundNegotiation, SecurityPolicy, SecurityState, TlsSettings,
    TlsSettingsBuilder,
};
pub use context::{ExecContext, ShutdownHandle, ShutdownListener};
pub use control::{ControlSession, ControlTarget, PendingReply};
pub use error::{Error, ErrorCode, Result};
pub use protocol::{Command, Response, ResponseStatus, ShutdownMode};
