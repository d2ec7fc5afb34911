//! Fuzz target for room directory parsing
//!
//! Arbitrary JSON from a relay or load balancer must never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use relink_proto::Room;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = Room::parse_list(s);
        let _ = Room::parse_relay_address(s);
    }
});
