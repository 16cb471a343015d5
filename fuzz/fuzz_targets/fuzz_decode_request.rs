#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::fuzz_target;
use poolgate_wire::protocol::decode_request;

fuzz_target!(|data: &[u8]| {
    let mut buf = BytesMut::from(data);

    // Drain the buffer frame by frame, the way the control listener would
    // when several requests land in one TCP segment.
    loop {
        match decode_request(&buf) {
            Ok(Some((_, consumed))) => {
                // A complete frame spans at least its tag and length field
                // and never claims bytes that have not arrived.
                assert!(consumed >= 5);
                assert!(consumed <= buf.len());
                buf.advance(consumed);
            }
            Ok(None) | Err(_) => break,
        }
    }
});
