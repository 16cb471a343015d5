#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::fuzz_target;
use poolgate_wire::protocol::decode_response;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    loop {
        match decode_response(&buf) {
            Ok(Some((response, consumed))) => {
                assert!(consumed >= 5);
                assert!(consumed <= buf.len());
                // A decoded message never carries an embedded NUL.
                if let Some(message) = &response.message {
                    assert!(!message.as_bytes().contains(&0));
                }
                buf.advance(consumed);
            }
            Ok(None) | Err(_) => break,
        }
    }
});
