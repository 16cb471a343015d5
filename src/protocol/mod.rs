//! Wire protocol for security negotiation and the control channel
//!
//! This module handles:
//! * The fixed 8-byte negotiation probe and its single-byte reply
//! * Control channel framing (tag + length + payload)
//! * Command and response encode/decode with validation up front

pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;

pub use decode::{decode_packet_header, decode_request, decode_response};
pub use encode::{
    encode_authenticate, encode_command, encode_goodbye, encode_probe, encode_reply,
    encode_response,
};
pub use message::{
    Command, ControlRequest, NegotiationReply, PacketHeader, Response, ResponseStatus,
    ShutdownMode,
};
