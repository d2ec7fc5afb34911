//! Fuzz target for relay frame decoding
//!
//! Tests that the frame decoder correctly handles arbitrary input without panicking.

#![no_main]

use libfuzzer_sys::fuzz_target;
use relink_proto::{FrameReader, RelayMessage};

fuzz_target!(|data: &[u8]| {
    // Never panics, only Ok or Err
    let _ = RelayMessage::from_bytes(data);

    // Raw field reads past the opcode
    let mut reader = FrameReader::new(data);
    let _ = reader.read_u8();
    while reader.remaining() > 0 {
        if reader.read_string().is_err() {
            break;
        }
    }
});
