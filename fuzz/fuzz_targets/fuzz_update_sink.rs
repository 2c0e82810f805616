//! Fuzz target: `UpdateSink` fed an arbitrary declared length and body.
//!
//! The sink must never accept more bytes than declared, and a finalize
//! must succeed exactly when the declared length was written in full.
//!
//! cargo fuzz run fuzz_update_sink

#![no_main]

use dapbridge::update::{UpdateError, UpdateSink};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 5 {
        return;
    }
    let declared = u32::from(u16::from_le_bytes([data[0], data[1]]));
    let chunk = usize::from(data[2]).max(1);
    let body = &data[3..];

    let mut sink = UpdateSink::new();
    if sink.begin(declared).is_err() {
        assert_eq!(declared, 0);
        return;
    }

    let mut written = 0usize;
    for part in body.chunks(chunk) {
        match sink.write(part) {
            Ok(()) => written += part.len(),
            Err(UpdateError::Overflow) => {
                assert!(written + part.len() > declared as usize);
                break;
            }
            Err(e) => panic!("unexpected write error {e:?}"),
        }
    }
    assert!(written <= declared as usize);

    match sink.finalize() {
        Ok(()) => {
            assert_eq!(written, declared as usize);
            assert_eq!(sink.committed().map(<[u8]>::len), Some(written));
        }
        Err(UpdateError::Truncated) => assert!(written < declared as usize),
        Err(e) => panic!("unexpected finalize error {e:?}"),
    }
});
