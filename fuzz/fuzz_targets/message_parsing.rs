#![no_main]

use axolotl::{EncryptedMessage, Message};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Wire parsing of both message kinds must never panic.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(message) = Message::from_wire(s) {
            let reparsed = Message::from_wire(&message.to_wire()).unwrap();
            assert_eq!(reparsed, message);
        }
        if let Ok(message) = EncryptedMessage::from_wire(s) {
            let _ = message.to_wire();
        }
    }
});
