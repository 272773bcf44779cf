#![no_main]

use axolotl::crypto::{decrypt, encrypt, SymmetricKey};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 32 {
        return;
    }

    let key = SymmetricKey::from_bytes(data[..32].try_into().unwrap());
    let rest = &data[32..];

    // Decrypting arbitrary payload strings must fail cleanly, never panic.
    if let Ok(payload) = std::str::from_utf8(rest) {
        let _ = decrypt(&key, payload, b"");
    }

    // A genuine roundtrip must always succeed.
    let payload = encrypt(&key, rest, b"ad");
    let plaintext = decrypt(&key, &payload, b"ad").unwrap();
    assert_eq!(plaintext, rest);
});
