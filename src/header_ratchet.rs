//! Double Ratchet variant with encrypted headers.
//!
//! Ratchet headers reveal traffic patterns (key rotations, chain
//! positions), so this variant encrypts them under dedicated header keys
//! that rotate in step with the DH ratchet. The receiver no longer sees
//! which epoch a message belongs to; it trial-decrypts the header against
//! the skipped-key cache, the current receiving header key, and the next
//! one. Success under the next header key is the signal that the sender
//! has started a new DH epoch.

use crate::crypto::{self, kdf_ck, kdf_rk_he, SymmetricKey};
use crate::double_ratchet::{Header, MAX_SKIP};
use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey};

use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use zeroize::Zeroize;

/// Ratchet message with an encrypted header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedMessage {
    /// Hex AES-256-CBC ciphertext of the canonical header serialization
    pub header: String,

    /// Hex payload ciphertext with trailing HMAC tag
    pub ciphertext: String,
}

impl EncryptedMessage {
    /// Wire form: `<encrypted-header-hex>;<payload-hex>`
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{};{}", self.header, self.ciphertext)
    }

    /// Parse the wire form
    pub fn from_wire(s: &str) -> Result<Self> {
        let (header, ciphertext) = s.split_once(';').ok_or(Error::InvalidMessageFormat)?;
        Ok(Self {
            header: header.to_owned(),
            ciphertext: ciphertext.to_owned(),
        })
    }
}

/// Header-encrypted Double Ratchet session state.
///
/// Same chain mechanics as [`crate::DoubleRatchet`], plus four header
/// keys: the current pair (`HKs`, `HKr`) and the next pair (`NHKs`,
/// `NHKr`) produced by `KDF_RK_HE` at each DH step. Skipped message keys
/// are indexed by header key rather than ratchet public key, since the
/// ratchet key is no longer visible in the clear.
#[derive(Clone)]
pub struct HeaderRatchet {
    dhs: SecretKey,
    dhr: Option<PublicKey>,
    rk: SymmetricKey,
    cks: Option<SymmetricKey>,
    ckr: Option<SymmetricKey>,
    /// Current sending / receiving header keys
    hks: Option<SymmetricKey>,
    hkr: Option<SymmetricKey>,
    /// Next header keys, promoted at each DH ratchet step
    nhks: SymmetricKey,
    nhkr: SymmetricKey,
    ns: u32,
    nr: u32,
    pn: u32,
    /// Skipped message keys by (header key bytes, message number)
    skipped: HashMap<([u8; 32], u32), SymmetricKey>,
}

impl HeaderRatchet {
    /// Initializes the session on the initiating side.
    ///
    /// `shared_hka` becomes the first sending header key; `shared_nhkb`
    /// is the header key under which the peer's first reply will arrive.
    /// Both are agreed during the handshake alongside the session key.
    #[must_use]
    pub fn init_initiator(
        session_key: SymmetricKey,
        shared_hka: SymmetricKey,
        shared_nhkb: SymmetricKey,
        key_pair: SecretKey,
        remote_public: PublicKey,
    ) -> Self {
        let dh_out = key_pair.diffie_hellman(&remote_public);
        let (rk, cks, nhks) = kdf_rk_he(&session_key, &dh_out);

        Self {
            dhs: key_pair,
            dhr: Some(remote_public),
            rk,
            cks: Some(cks),
            ckr: None,
            hks: Some(shared_hka),
            hkr: None,
            nhks,
            nhkr: shared_nhkb,
            ns: 0,
            nr: 0,
            pn: 0,
            skipped: HashMap::new(),
        }
    }

    /// Initializes the session on the responding side.
    ///
    /// No header key is usable for sending yet; the first inbound message
    /// must arrive under `shared_hka`, installed here as the next
    /// receiving header key.
    #[must_use]
    pub fn init_responder(
        session_key: SymmetricKey,
        shared_hka: SymmetricKey,
        shared_nhkb: SymmetricKey,
        key_pair: SecretKey,
    ) -> Self {
        Self {
            dhs: key_pair,
            dhr: None,
            rk: session_key,
            cks: None,
            ckr: None,
            hks: None,
            hkr: None,
            nhks: shared_nhkb,
            nhkr: shared_hka,
            ns: 0,
            nr: 0,
            pn: 0,
            skipped: HashMap::new(),
        }
    }

    /// Encrypts a message; the header travels encrypted under `HKs`.
    ///
    /// The payload's associated data covers the encrypted header, binding
    /// the two ciphertexts together.
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<EncryptedMessage> {
        let chain_key = self.cks.as_ref().ok_or(Error::NotInitialized)?;
        let header_key = self.hks.as_ref().ok_or(Error::NotInitialized)?;

        let (next_chain, message_key) = kdf_ck(chain_key);

        let header = Header {
            dh: self.dhs.public_key(),
            pn: self.pn,
            n: self.ns,
        };
        let encrypted_header = crypto::hencrypt(header_key, header.to_json().as_bytes());

        self.cks = Some(next_chain);
        self.ns += 1;

        let ad = crypto::concat(associated_data, encrypted_header.as_bytes());
        let ciphertext = crypto::encrypt(&message_key, plaintext, &ad);

        Ok(EncryptedMessage {
            header: encrypted_header,
            ciphertext,
        })
    }

    /// Decrypts a received message, detecting the epoch from the header.
    ///
    /// On any failure the session state is exactly as before the call.
    pub fn decrypt(
        &mut self,
        message: &EncryptedMessage,
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        let snapshot = self.clone();
        match self.decrypt_inner(message, associated_data) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) => {
                *self = snapshot;
                Err(err)
            }
        }
    }

    fn decrypt_inner(
        &mut self,
        message: &EncryptedMessage,
        associated_data: &[u8],
    ) -> Result<Vec<u8>> {
        let ad = crypto::concat(associated_data, message.header.as_bytes());

        if let Some(message_key) = self.take_skipped(&message.header) {
            return crypto::decrypt(&message_key, &message.ciphertext, &ad);
        }

        let header = if let Some(header) = self
            .hkr
            .as_ref()
            .and_then(|hkr| try_header(hkr, &message.header))
        {
            // same epoch
            header
        } else if let Some(header) = try_header(&self.nhkr, &message.header) {
            // next epoch: drain the old chain, then ratchet forward
            self.skip_message_keys(header.pn)?;
            self.dh_ratchet(&header);
            header
        } else {
            return Err(Error::HeaderDecryptFailure);
        };

        self.skip_message_keys(header.n)?;

        let chain_key = self.ckr.as_ref().ok_or(Error::NotInitialized)?;
        let (next_chain, message_key) = kdf_ck(chain_key);
        self.ckr = Some(next_chain);
        self.nr += 1;

        crypto::decrypt(&message_key, &message.ciphertext, &ad)
    }

    /// Scans the skipped-key cache by trial-decrypting the header under
    /// every stored header key. O(cache size), bounded by [`MAX_SKIP`]
    /// per retained chain.
    fn take_skipped(&mut self, encrypted_header: &str) -> Option<SymmetricKey> {
        let found = self.skipped.keys().find_map(|(hk_bytes, n)| {
            let header = try_header(&SymmetricKey::from_bytes(*hk_bytes), encrypted_header)?;
            (header.n == *n).then_some((*hk_bytes, *n))
        })?;
        self.skipped.remove(&found)
    }

    /// Advances the receiving chain to `until`, caching skipped keys
    /// under the current receiving header key.
    fn skip_message_keys(&mut self, until: u32) -> Result<()> {
        if self.nr + MAX_SKIP < until {
            return Err(Error::TooManySkipped);
        }

        if let Some(chain_key) = self.ckr.as_ref() {
            let header_key = *self
                .hkr
                .as_ref()
                .ok_or(Error::NotInitialized)?
                .as_bytes();
            let mut current = chain_key.clone();

            while self.nr < until {
                let (next_chain, message_key) = kdf_ck(&current);
                self.skipped.insert((header_key, self.nr), message_key);
                current = next_chain;
                self.nr += 1;
            }

            self.ckr = Some(current);
        }

        Ok(())
    }

    /// DH ratchet step: promote the next header keys and derive new ones.
    fn dh_ratchet(&mut self, header: &Header) {
        self.pn = self.ns;
        self.ns = 0;
        self.nr = 0;
        self.hks = Some(self.nhks.clone());
        self.hkr = Some(self.nhkr.clone());
        self.dhr = Some(header.dh);

        let dh_out = self.dhs.diffie_hellman(&header.dh);
        let (rk, ckr, nhkr) = kdf_rk_he(&self.rk, &dh_out);
        self.rk = rk;
        self.ckr = Some(ckr);
        self.nhkr = nhkr;

        self.dhs = SecretKey::generate(&mut OsRng);

        let dh_out = self.dhs.diffie_hellman(&header.dh);
        let (rk, cks, nhks) = kdf_rk_he(&self.rk, &dh_out);
        self.rk = rk;
        self.cks = Some(cks);
        self.nhks = nhks;
    }

    /// Number of cached skipped message keys
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Trial header decryption: wrong key, bad padding, or an unparseable
/// plaintext all read as "not this key".
fn try_header(header_key: &SymmetricKey, encrypted_header: &str) -> Option<Header> {
    let bytes = crypto::hdecrypt(header_key, encrypted_header)?;
    let json = std::str::from_utf8(&bytes).ok()?;
    Header::from_json(json).ok()
}

impl std::fmt::Debug for HeaderRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderRatchet")
            .field("ns", &self.ns)
            .field("nr", &self.nr)
            .field("pn", &self.pn)
            .field("skipped", &self.skipped.len())
            .finish()
    }
}

impl Zeroize for HeaderRatchet {
    fn zeroize(&mut self) {
        self.rk.zeroize();
        self.cks.zeroize();
        self.ckr.zeroize();
        self.hks.zeroize();
        self.hkr.zeroize();
        self.nhks.zeroize();
        self.nhkr.zeroize();
        self.skipped.clear();
    }
}

impl Drop for HeaderRatchet {
    fn drop(&mut self) {
        self.zeroize();
    }
}
