//! Frame encoding for the negotiation probe and the control channel

use bytes::{BufMut, BytesMut};

use super::constants::{tags, NEGOTIATE_CODE, NEGOTIATE_PACKET_LEN};
use super::message::{Command, NegotiationReply, Response};

/// Encode the security negotiation probe.
///
/// Always exactly eight bytes: length (8, includes itself) + reserved code.
pub fn encode_probe(buf: &mut BytesMut) {
    buf.put_u32(NEGOTIATE_PACKET_LEN);
    buf.put_u32(NEGOTIATE_CODE);
}

/// Encode the acceptor's single-byte reply.
pub fn encode_reply(buf: &mut BytesMut, reply: NegotiationReply) {
    buf.put_u8(reply.as_byte());
}

/// Encode an administrative command into a control frame.
pub fn encode_command(cmd: &Command) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(cmd.tag());

    let len_pos = buf.len();
    buf.put_u32(0);

    match cmd {
        Command::AttachNode { node_id } | Command::DetachNode { node_id } => {
            // Node ids travel as decimal ASCII so listener logs stay legible.
            buf.put(node_id.to_string().as_bytes());
            buf.put_u8(0);
        }
        Command::Shutdown { mode } => {
            buf.put_u8(mode.as_wire());
        }
    }

    backfill_length(&mut buf, len_pos);
    buf
}

/// Encode the credential submission frame: user NUL digest NUL.
pub fn encode_authenticate(user: &str, digest: &str) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(tags::AUTHENTICATE);

    let len_pos = buf.len();
    buf.put_u32(0);

    buf.put(user.as_bytes());
    buf.put_u8(0);
    buf.put(digest.as_bytes());
    buf.put_u8(0);

    backfill_length(&mut buf, len_pos);
    buf
}

/// Encode the session goodbye. No payload, no response expected.
pub fn encode_goodbye() -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(tags::GOODBYE);
    buf.put_u32(4); // Length includes itself
    buf
}

/// Encode a listener response: status byte + optional NUL-terminated
/// message. The listener side lives elsewhere; this is here so the codec
/// round-trips and test fixtures can speak the contract.
pub fn encode_response(resp: &Response) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(tags::RESPONSE);

    let len_pos = buf.len();
    buf.put_u32(0);

    buf.put_u8(resp.status.as_wire());
    if let Some(message) = &resp.message {
        buf.put(message.as_bytes());
        buf.put_u8(0);
    }

    backfill_length(&mut buf, len_pos);
    buf
}

/// Fill in a length field reserved at `len_pos`. The length counts itself
/// and everything after it, but not the tag byte before it.
fn backfill_length(buf: &mut BytesMut, len_pos: usize) {
    let len = (buf.len() - len_pos) as u32;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use crate::protocol::message::ShutdownMode;

    #[test]
    fn test_encode_probe() {
        let mut buf = BytesMut::new();
        encode_probe(&mut buf);

        // Exactly 8 bytes: 4-byte length (8) + 4-byte code (80877103)
        assert_eq!(buf.len(), 8);
        assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x08]);
        assert_eq!(&buf[4..8], &[0x04, 0xD2, 0x16, 0x2F]);
    }

    #[test]
    fn test_encode_reply_is_one_byte() {
        let mut buf = BytesMut::new();
        encode_reply(&mut buf, NegotiationReply::Declined);
        assert_eq!(&buf[..], b"N");

        let mut buf = BytesMut::new();
        encode_reply(&mut buf, NegotiationReply::Accepted);
        assert_eq!(&buf[..], b"S");
    }

    #[test]
    fn test_encode_attach() {
        let cmd = Command::attach_node(7, 128).unwrap();
        let buf = encode_command(&cmd);

        assert_eq!(buf[0], b'C');
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
        assert_eq!(&buf[5..], b"7\0");
    }

    #[test]
    fn test_encode_detach_multidigit_node() {
        let cmd = Command::detach_node(115, 128).unwrap();
        let buf = encode_command(&cmd);

        assert_eq!(buf[0], b'D');
        assert_eq!(&buf[5..], b"115\0");
    }

    #[test]
    fn test_encode_shutdown() {
        let cmd = Command::shutdown(ShutdownMode::Smart);
        let buf = encode_command(&cmd);

        assert_eq!(&buf[..], &[b'T', 0, 0, 0, 5, b's']);
    }

    #[test]
    fn test_encode_goodbye() {
        let buf = encode_goodbye();
        assert_eq!(&buf[..], &[b'X', 0, 0, 0, 4]);
    }

    #[test]
    fn test_encode_authenticate() {
        let buf = encode_authenticate("admin", "cafe01");

        assert_eq!(buf[0], b'M');
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]);
        assert_eq!(len as usize, buf.len() - 1);
        assert_eq!(&buf[5..], b"admin\0cafe01\0");
    }

    #[test]
    fn test_encode_response_without_message() {
        let resp = Response { status: super::super::message::ResponseStatus::Ok, message: None };
        let buf = encode_response(&resp);
        assert_eq!(&buf[..], &[b'R', 0, 0, 0, 5, 0]);
    }

    #[test]
    fn test_encode_response_with_message() {
        let resp = Response::err(ErrorCode::AuthFailed, "bad digest");
        let buf = encode_response(&resp);

        assert_eq!(buf[0], b'R');
        assert_eq!(buf[5], ErrorCode::AuthFailed.as_wire());
        assert_eq!(&buf[6..], b"bad digest\0");
    }
}
