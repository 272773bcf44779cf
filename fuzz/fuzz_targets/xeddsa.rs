#![no_main]

use axolotl::xeddsa::{XEdDSAPublicKey, SIGNATURE_LENGTH};
use axolotl::PublicKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() < 32 + SIGNATURE_LENGTH {
        return;
    }

    let public_bytes: [u8; 32] = data[..32].try_into().unwrap();
    let signature: [u8; SIGNATURE_LENGTH] =
        data[32..32 + SIGNATURE_LENGTH].try_into().unwrap();
    let message = &data[32 + SIGNATURE_LENGTH..];

    // Conversion may reject invalid points; verification of arbitrary
    // signatures may fail, but neither must ever panic.
    if let Ok(public) = XEdDSAPublicKey::from_x25519_public(&PublicKey::from_bytes(public_bytes)) {
        let _ = public.verify(message, &signature);
    }
});
