#![no_main]

use axolotl::Header;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Parsing arbitrary header serializations must never panic, and a
    // successful parse must survive a serialization roundtrip.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(header) = Header::from_json(s) {
            let reparsed = Header::from_json(&header.to_json()).unwrap();
            assert_eq!(reparsed, header);
        }
    }
});
