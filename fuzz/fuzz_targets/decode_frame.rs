#![no_main]

use libfuzzer_sys::fuzz_target;
use nusbridge_channel::Frame;

// Decoding arbitrary transport messages should never panic, and valid frames re-encode to the
// same bytes
fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = Frame::decode(data) {
        assert_eq!(frame.encode(), data);
    }
});
