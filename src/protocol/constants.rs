//! Wire constants for the negotiation probe and the control channel

/// Security negotiation request code (80877103 = 1234 << 16 | 5679)
///
/// Reserved in the protocol version numbering space so a probe can never be
/// mistaken for an ordinary startup packet.
pub const NEGOTIATE_CODE: u32 = 0x04D2_162F;

/// Total size of the negotiation probe: two big-endian u32 fields, the
/// first of which counts the whole packet including itself
pub const NEGOTIATE_PACKET_LEN: u32 = 8;

/// Single-byte replies an acceptor may send to a negotiation probe
pub mod reply {
    /// Acceptor is willing; the security handshake follows immediately
    pub const ACCEPTED: u8 = b'S';

    /// Acceptor declines; the connection continues in plaintext
    pub const DECLINED: u8 = b'N';
}

/// Control channel frame tags. Each frame is tag + u32 BE length (counting
/// the length field and payload, not the tag) + payload.
pub mod tags {
    /// Credential submission: user NUL digest NUL
    pub const AUTHENTICATE: u8 = b'M';

    /// Attach a detached node: decimal node id, NUL-terminated
    pub const ATTACH_NODE: u8 = b'C';

    /// Detach a node from service: decimal node id, NUL-terminated
    pub const DETACH_NODE: u8 = b'D';

    /// Shut the proxy down: single mode byte
    pub const SHUTDOWN: u8 = b'T';

    /// Session goodbye: empty payload, no response expected
    pub const GOODBYE: u8 = b'X';

    /// Listener response: status byte + optional NUL-terminated message
    pub const RESPONSE: u8 = b'R';
}

/// Status byte of a successful response. Failures carry an
/// [`ErrorCode`](crate::error::ErrorCode) wire value instead.
pub const STATUS_OK: u8 = 0;

/// Validation bounds enforced before any network I/O
pub mod limits {
    /// Host arguments must be strictly shorter than this
    pub const MAX_HOST_LEN: usize = 1024;

    /// User and password arguments must be strictly shorter than this
    pub const MAX_CREDENTIAL_LEN: usize = 128;

    /// Highest backend node id the proxy can be configured with
    pub const MAX_BACKENDS: i64 = 128;

    /// Control ports live strictly above the reserved range
    pub const MIN_PORT_EXCLUSIVE: i64 = 1024;

    /// Largest control frame length accepted, checked before any
    /// allocation. Control payloads are tiny; anything bigger is a
    /// framing error.
    pub const MAX_CONTROL_PACKET: u32 = 8192;
}
