//! Key derivation and authenticated encryption for the ratchet layers.
//!
//! All derivations run over SHA-512. Message payloads are AES-256-CBC with
//! an encrypt-then-MAC HMAC-SHA512 tag; encrypted headers are AES-256-CBC
//! without a tag (authenticity comes from the payload MAC, which covers the
//! encrypted header through the associated data).

use crate::error::{Error, Result};
use crate::keys::{DhOutput, KEY_SIZE};

use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;
type HmacSha512 = Hmac<Sha512>;

/// HKDF info string for root key derivation (`KDF_RK` / `KDF_RK_HE`)
const ROOT_INFO: &[u8] = b"app-specific-secret-key";

/// HKDF info string for message encryption key material
const MESSAGE_INFO: &[u8] = b"app-specific-encryption-key";

/// HKDF info string for header encryption key material
const HEADER_INFO: &[u8] = b"app-specific-header-encryption-key";

/// Length of the HMAC-SHA512 tag appended to payloads, in hex characters
pub const TAG_HEX_LEN: usize = 128;

/// Derived symmetric key with automatic zeroization
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Create from raw bytes
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get key as bytes
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey([REDACTED])")
    }
}

/// Root KDF step: `(RK', CK) = KDF_RK(RK, DH_output)`
///
/// HKDF-SHA512 with the old root key as salt and the DH output as input
/// key material, expanded to 64 bytes and split in half.
#[must_use]
pub fn kdf_rk(root_key: &SymmetricKey, dh_output: &DhOutput) -> (SymmetricKey, SymmetricKey) {
    let hkdf = Hkdf::<Sha512>::new(Some(root_key.as_bytes()), dh_output.as_bytes());

    let mut okm = [0u8; 64];
    hkdf.expand(ROOT_INFO, &mut okm)
        .expect("output size is valid");

    let new_root = SymmetricKey::from_bytes(okm[..KEY_SIZE].try_into().expect("split is exact"));
    let chain = SymmetricKey::from_bytes(okm[KEY_SIZE..].try_into().expect("split is exact"));

    okm.zeroize();
    (new_root, chain)
}

/// Root KDF step with header key: `(RK', CK, NHK) = KDF_RK_HE(RK, DH_output)`
///
/// Same derivation as [`kdf_rk`] expanded to 96 bytes; the third slice is
/// the next header key for the new chain.
#[must_use]
pub fn kdf_rk_he(
    root_key: &SymmetricKey,
    dh_output: &DhOutput,
) -> (SymmetricKey, SymmetricKey, SymmetricKey) {
    let hkdf = Hkdf::<Sha512>::new(Some(root_key.as_bytes()), dh_output.as_bytes());

    let mut okm = [0u8; 96];
    hkdf.expand(ROOT_INFO, &mut okm)
        .expect("output size is valid");

    let new_root = SymmetricKey::from_bytes(okm[..32].try_into().expect("split is exact"));
    let chain = SymmetricKey::from_bytes(okm[32..64].try_into().expect("split is exact"));
    let next_header = SymmetricKey::from_bytes(okm[64..].try_into().expect("split is exact"));

    okm.zeroize();
    (new_root, chain, next_header)
}

/// Chain KDF step: `(CK', MK) = KDF_CK(CK)`
///
/// `MK = HMAC-SHA512(CK, 0x01)[..32]`, `CK' = HMAC-SHA512(CK, 0x02)[..32]`.
#[must_use]
pub fn kdf_ck(chain_key: &SymmetricKey) -> (SymmetricKey, SymmetricKey) {
    let mut mac =
        HmacSha512::new_from_slice(chain_key.as_bytes()).expect("HMAC accepts any key size");
    mac.update(&[0x01]);
    let digest = mac.finalize().into_bytes();
    let message_key =
        SymmetricKey::from_bytes(digest[..KEY_SIZE].try_into().expect("split is exact"));

    let mut mac =
        HmacSha512::new_from_slice(chain_key.as_bytes()).expect("HMAC accepts any key size");
    mac.update(&[0x02]);
    let digest = mac.finalize().into_bytes();
    let new_chain_key =
        SymmetricKey::from_bytes(digest[..KEY_SIZE].try_into().expect("split is exact"));

    (new_chain_key, message_key)
}

/// Expanded key material for one payload encryption
struct MessageKeys {
    enc_key: [u8; 32],
    auth_key: [u8; 32],
    iv: [u8; 16],
}

impl Drop for MessageKeys {
    fn drop(&mut self) {
        self.enc_key.zeroize();
        self.auth_key.zeroize();
        self.iv.zeroize();
    }
}

fn expand_message_keys(message_key: &SymmetricKey) -> MessageKeys {
    let hkdf = Hkdf::<Sha512>::new(Some(&[0u8; 80]), message_key.as_bytes());

    let mut okm = [0u8; 80];
    hkdf.expand(MESSAGE_INFO, &mut okm)
        .expect("output size is valid");

    let keys = MessageKeys {
        enc_key: okm[..32].try_into().expect("split is exact"),
        auth_key: okm[32..64].try_into().expect("split is exact"),
        iv: okm[64..].try_into().expect("split is exact"),
    };
    okm.zeroize();
    keys
}

/// Encrypts a payload under a single-use message key.
///
/// The message key is expanded into `enc_key || auth_key || iv`; the
/// plaintext is AES-256-CBC encrypted and a full HMAC-SHA512 tag over
/// `associated_data || plaintext` is appended. Output is one hex string;
/// the trailing [`TAG_HEX_LEN`] characters are the tag.
///
/// The IV is derived deterministically from the message key, which is safe
/// because each message key is used exactly once.
#[must_use]
pub fn encrypt(message_key: &SymmetricKey, plaintext: &[u8], associated_data: &[u8]) -> String {
    let keys = expand_message_keys(message_key);

    let cipher = Aes256CbcEnc::new_from_slices(&keys.enc_key, &keys.iv)
        .expect("key and iv lengths are fixed");
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut mac =
        HmacSha512::new_from_slice(&keys.auth_key).expect("HMAC accepts any key size");
    mac.update(associated_data);
    mac.update(plaintext);
    let tag = mac.finalize().into_bytes();

    let mut out = hex::encode(ciphertext);
    out.push_str(&hex::encode(tag));
    out
}

/// Decrypts a payload produced by [`encrypt`].
///
/// Recomputes the tag from the decrypted plaintext and compares it in
/// constant time; any mismatch (or padding failure) is an authentication
/// failure and the plaintext is discarded.
pub fn decrypt(
    message_key: &SymmetricKey,
    payload: &str,
    associated_data: &[u8],
) -> Result<Vec<u8>> {
    if payload.len() < TAG_HEX_LEN || payload.len() % 2 != 0 {
        return Err(Error::InvalidMessageFormat);
    }

    let (ct_hex, tag_hex) = payload.split_at(payload.len() - TAG_HEX_LEN);
    let ciphertext = hex::decode(ct_hex).map_err(|_| Error::InvalidMessageFormat)?;
    let tag = hex::decode(tag_hex).map_err(|_| Error::InvalidMessageFormat)?;

    let keys = expand_message_keys(message_key);

    let cipher = Aes256CbcDec::new_from_slices(&keys.enc_key, &keys.iv)
        .expect("key and iv lengths are fixed");
    let mut plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| Error::AuthFailure)?;

    let mut mac =
        HmacSha512::new_from_slice(&keys.auth_key).expect("HMAC accepts any key size");
    mac.update(associated_data);
    mac.update(&plaintext);
    let expected = mac.finalize().into_bytes();

    if bool::from(expected.as_slice().ct_eq(&tag)) {
        Ok(plaintext)
    } else {
        plaintext.zeroize();
        Err(Error::AuthFailure)
    }
}

/// Encrypts serialized header bytes under a header key; returns hex.
#[must_use]
pub fn hencrypt(header_key: &SymmetricKey, header_bytes: &[u8]) -> String {
    let hkdf = Hkdf::<Sha512>::new(Some(&[0u8; 48]), header_key.as_bytes());

    let mut okm = [0u8; 48];
    hkdf.expand(HEADER_INFO, &mut okm)
        .expect("output size is valid");

    let cipher = Aes256CbcEnc::new_from_slices(&okm[..32], &okm[32..])
        .expect("key and iv lengths are fixed");
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(header_bytes);
    okm.zeroize();

    hex::encode(ciphertext)
}

/// Attempts to decrypt an encrypted header under a candidate header key.
///
/// Returns `None` when the key does not match (bad hex, bad padding). This
/// is a signal, not an error: the header-encrypted ratchet trial-decrypts
/// against several keys to detect new DH epochs.
#[must_use]
pub fn hdecrypt(header_key: &SymmetricKey, ciphertext_hex: &str) -> Option<Vec<u8>> {
    let ciphertext = hex::decode(ciphertext_hex).ok()?;

    let hkdf = Hkdf::<Sha512>::new(Some(&[0u8; 48]), header_key.as_bytes());

    let mut okm = [0u8; 48];
    hkdf.expand(HEADER_INFO, &mut okm)
        .expect("output size is valid");

    let cipher = Aes256CbcDec::new_from_slices(&okm[..32], &okm[32..])
        .expect("key and iv lengths are fixed");
    let plaintext = cipher.decrypt_padded_vec_mut::<Pkcs7>(&ciphertext).ok();
    okm.zeroize();

    plaintext
}

/// Builds the associated data for one payload: an injective encoding of
/// `(ad, header_bytes)`.
///
/// Length-prefixing the caller data guarantees that no two distinct pairs
/// produce the same byte sequence.
#[must_use]
pub fn concat(associated_data: &[u8], header_bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + associated_data.len() + header_bytes.len());
    out.extend_from_slice(
        &u32::try_from(associated_data.len())
            .expect("associated data fits in u32")
            .to_be_bytes(),
    );
    out.extend_from_slice(associated_data);
    out.extend_from_slice(header_bytes);
    out
}
