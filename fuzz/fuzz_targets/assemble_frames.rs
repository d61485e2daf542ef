#![no_main]

use libfuzzer_sys::fuzz_target;
use nusbridge_channel::{FrameAssembler, SENTINEL};

// The assembler should never panic and never emit a frame longer than its limit
fuzz_target!(|data: &[u8]| {
    let Some((&limit, stream)) = data.split_first() else {
        return;
    };

    let mut assembler = FrameAssembler::new(limit as usize);
    for frame in assembler.push(stream) {
        assert!(!frame.is_empty());
        assert!(frame.len() <= assembler.limit());
        assert!(!frame.ends_with(&SENTINEL));
    }
    assert!(assembler.pending().len() < assembler.limit());
});
