#![no_main]

use bytes::{Buf, BytesMut};
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use poolgate_wire::protocol::decode_request;

#[derive(Debug)]
struct SplitInput {
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for SplitInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        let data: Vec<u8> = u.arbitrary()?;
        let split_points: Vec<u8> = u.arbitrary()?;
        Ok(Self { data, split_points })
    }
}

fuzz_target!(|input: SplitInput| {
    if input.data.is_empty() {
        return;
    }

    // Generate split indices from the raw split_points bytes
    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Feed the same bytes in arbitrary chunks and decode after each
    // arrival. Incomplete frames must wait without consuming anything;
    // once a frame is malformed the session is over.
    let mut buf = BytesMut::new();
    'delivery: for window in splits.windows(2) {
        buf.extend_from_slice(&input.data[window[0]..window[1]]);

        loop {
            match decode_request(&buf) {
                Ok(Some((_, consumed))) => {
                    assert!(consumed >= 5);
                    assert!(consumed <= buf.len());
                    buf.advance(consumed);
                }
                Ok(None) => break,
                Err(_) => break 'delivery,
            }
        }
    }
});
