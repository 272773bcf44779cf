#![no_main]

use axolotl::{Envelope, PreKeyBundle, RegistrationBundle};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Deserializing attacker-controlled JSON must never panic, and a
    // bundle that parses must verify its signature without panicking.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(bundle) = serde_json::from_str::<PreKeyBundle>(s) {
            let _ = bundle.verify_signature();
        }
        let _ = serde_json::from_str::<RegistrationBundle>(s);
        let _ = serde_json::from_str::<Envelope>(s);
    }
});
