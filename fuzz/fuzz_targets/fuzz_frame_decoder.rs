//! Fuzz target: `FrameDecoder::feed`
//!
//! Drives arbitrary byte sequences into the mux frame decoder, whole and
//! split in two, and checks that both paths agree. Decoded frames must
//! respect the size limit and re-encode to the bytes they came from.
//!
//! cargo fuzz run fuzz_frame_decoder

#![no_main]

use libfuzzer_sys::fuzz_target;
use tagmux::mux::codec::{FrameDecoder, HEADER_LEN};

const MAX_FRAME: usize = 4096;

fuzz_target!(|data: &[u8]| {
    let mut whole = FrameDecoder::new(MAX_FRAME);
    let whole_result = whole.feed(data);
    let whole_frames: Vec<_> = std::iter::from_fn(|| whole.next_frame()).collect();

    let cut = data.first().map_or(0, |b| *b as usize).min(data.len());
    let mut split = FrameDecoder::new(MAX_FRAME);
    let split_result = split.feed(&data[..cut]).and_then(|()| split.feed(&data[cut..]));
    let split_frames: Vec<_> = std::iter::from_fn(|| split.next_frame()).collect();

    assert_eq!(whole_result, split_result, "read boundaries changed the outcome");
    assert_eq!(whole_frames, split_frames);

    let mut offset = 0;
    for frame in &whole_frames {
        assert!(frame.body.len() + 4 <= MAX_FRAME, "frame exceeds the size limit");
        let bytes = frame.encode().expect("decoded frames re-encode");
        // legacy Rerr (127) is normalised, so only compare the body
        let end = offset + HEADER_LEN + frame.body.len();
        assert_eq!(&bytes[HEADER_LEN..], &data[offset + HEADER_LEN..end]);
        offset = end;
    }

    // After a reset the decoder must accept bytes cleanly again.
    whole.reset();
    let _ = whole.feed(data);
});
