//! Frame decoding for the negotiation probe and the control channel
//!
//! Decoders work on a borrowed byte slice and return `Ok(None)` when the
//! frame is not complete yet, so callers can keep reading into the same
//! buffer. Malformed framing is a protocol error, never a panic; length
//! fields are sanity-checked before anything is allocated.

use crate::error::{Error, Result};
use crate::protocol::constants::{limits, tags};
use crate::protocol::message::{
    Command, ControlRequest, PacketHeader, Response, ResponseStatus, ShutdownMode,
};

/// Decode the fixed 8-byte packet header that opens every inbound stream.
pub fn decode_packet_header(bytes: &[u8; 8]) -> PacketHeader {
    PacketHeader {
        length: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        code: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    }
}

/// Decode one client frame from the control channel.
///
/// Returns the request and the number of bytes consumed; the caller
/// advances its buffer by that amount.
pub fn decode_request(buf: &[u8]) -> Result<Option<(ControlRequest, usize)>> {
    let Some((tag, payload, consumed)) = split_frame(buf)? else {
        return Ok(None);
    };

    let request = match tag {
        tags::AUTHENTICATE => {
            let (user, rest) = take_cstr(payload)?;
            let (digest, rest) = take_cstr(rest)?;
            expect_exhausted(rest)?;
            ControlRequest::Authenticate {
                user: user.to_string(),
                digest: digest.to_string(),
            }
        }
        tags::ATTACH_NODE => {
            ControlRequest::Command(Command::AttachNode { node_id: parse_node_id(payload)? })
        }
        tags::DETACH_NODE => {
            ControlRequest::Command(Command::DetachNode { node_id: parse_node_id(payload)? })
        }
        tags::SHUTDOWN => {
            if payload.len() != 1 {
                return Err(Error::Protocol(format!(
                    "shutdown frame carries {} payload bytes, expected 1",
                    payload.len()
                )));
            }
            let mode = ShutdownMode::from_wire(payload[0]).ok_or_else(|| {
                Error::Protocol(format!("unknown shutdown mode byte: 0x{:02X}", payload[0]))
            })?;
            ControlRequest::Command(Command::Shutdown { mode })
        }
        tags::GOODBYE => {
            expect_exhausted(payload)?;
            ControlRequest::Goodbye
        }
        other => {
            return Err(Error::Protocol(format!(
                "unknown control frame tag: 0x{other:02X}"
            )));
        }
    };

    Ok(Some((request, consumed)))
}

/// Decode one listener response frame.
pub fn decode_response(buf: &[u8]) -> Result<Option<(Response, usize)>> {
    let Some((tag, payload, consumed)) = split_frame(buf)? else {
        return Ok(None);
    };

    if tag != tags::RESPONSE {
        return Err(Error::Protocol(format!(
            "unexpected response tag: 0x{tag:02X}"
        )));
    }
    if payload.is_empty() {
        return Err(Error::Protocol("response frame missing status byte".into()));
    }

    let status = ResponseStatus::from_wire(payload[0]).ok_or_else(|| {
        Error::Protocol(format!("unknown response status byte: 0x{:02X}", payload[0]))
    })?;

    let rest = &payload[1..];
    let message = if rest.is_empty() {
        None
    } else {
        let (message, rest) = take_cstr(rest)?;
        expect_exhausted(rest)?;
        Some(message.to_string())
    };

    Ok(Some((Response { status, message }, consumed)))
}

/// Split `tag + length + payload` off the front of `buf`.
///
/// `Ok(None)` while the frame is incomplete. The length field counts
/// itself plus the payload and is bounded by `MAX_CONTROL_PACKET` before
/// the payload is touched.
fn split_frame(buf: &[u8]) -> Result<Option<(u8, &[u8], usize)>> {
    if buf.len() < 5 {
        return Ok(None);
    }

    let tag = buf[0];
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);

    if len < 4 {
        return Err(Error::Protocol(format!(
            "control frame length {len} below minimum"
        )));
    }
    if len > limits::MAX_CONTROL_PACKET {
        return Err(Error::Protocol(format!(
            "control frame length {len} exceeds maximum allowed {}",
            limits::MAX_CONTROL_PACKET
        )));
    }

    let total = 1 + len as usize;
    if buf.len() < total {
        return Ok(None);
    }

    Ok(Some((tag, &buf[5..total], total)))
}

/// Take one NUL-terminated UTF-8 string off the front of `data`.
fn take_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let end = data
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| Error::Protocol("missing NUL terminator in control payload".into()))?;
    let s = std::str::from_utf8(&data[..end])
        .map_err(|_| Error::Protocol("control payload is not valid UTF-8".into()))?;
    Ok((s, &data[end + 1..]))
}

fn expect_exhausted(rest: &[u8]) -> Result<()> {
    if rest.is_empty() {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "{} trailing bytes after control payload",
            rest.len()
        )))
    }
}

fn parse_node_id(payload: &[u8]) -> Result<i32> {
    let (text, rest) = take_cstr(payload)?;
    expect_exhausted(rest)?;
    text.parse::<i32>()
        .map_err(|_| Error::Protocol(format!("malformed node id in frame: {text:?}")))
}
