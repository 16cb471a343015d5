//! Connection management for proxied streams
//!
//! This module handles:
//! * Transport abstraction (plain TCP vs TLS)
//! * Security negotiation on both roles (acceptor and initiator)
//! * State machine enforcement
//! * TLS policy and material

mod conn;
mod state;
mod tls;
mod transport;

pub use conn::{Connection, ConnectionRole, InboundNegotiation};
pub use state::SecurityState;
pub use tls::{
    parse_server_name, SecurityPolicy, TlsSettings, TlsSettingsBuilder,
    DEFAULT_NEGOTIATE_TIMEOUT,
};
pub use transport::Transport;
