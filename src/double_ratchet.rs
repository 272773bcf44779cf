//! Double Ratchet session state machine.
//!
//! Every message is encrypted under a fresh symmetric key derived from a
//! per-direction KDF chain; every change of direction rotates the DH key
//! pair and reseeds both chains from the root key. Skipped message keys
//! are cached so out-of-order delivery (up to [`MAX_SKIP`] per chain
//! advance) still decrypts.
//!
//! A failing [`DoubleRatchet::decrypt`] restores the session to its
//! pre-call state, so a forged or reordered-beyond-bounds message can
//! never corrupt a session.

use crate::crypto::{self, kdf_ck, kdf_rk, SymmetricKey};
use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey};

use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use zeroize::Zeroize;

/// Maximum number of message keys one decrypt may skip past the current
/// receive counter
pub const MAX_SKIP: u32 = 32;

/// Message header carried with every ratchet message.
///
/// Serialized canonically as JSON with fields in declaration order:
/// `{"dh":"<hex>","pn":N,"n":N}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Sender's current ratchet public key
    pub dh: PublicKey,

    /// Number of messages in the sender's previous sending chain
    pub pn: u32,

    /// Message number in the current sending chain (starts at 0)
    pub n: u32,
}

impl Header {
    /// Canonical serialization, also used as AEAD associated data
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("header serialization is infallible")
    }

    /// Parse from the canonical serialization
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|_| Error::InvalidMessageFormat)
    }
}

/// Ratchet message: plaintext header plus hex payload.
///
/// The header is not encrypted but is authenticated: its serialization is
/// part of the payload's associated data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Message header
    pub header: Header,

    /// Hex ciphertext with trailing HMAC tag
    pub ciphertext: String,
}

impl Message {
    /// Wire form: `<header-json>;<payload-hex>`
    #[must_use]
    pub fn to_wire(&self) -> String {
        format!("{};{}", self.header.to_json(), self.ciphertext)
    }

    /// Parse the wire form
    pub fn from_wire(s: &str) -> Result<Self> {
        let (header, ciphertext) = s.split_once(';').ok_or(Error::InvalidMessageFormat)?;
        Ok(Self {
            header: Header::from_json(header)?,
            ciphertext: ciphertext.to_owned(),
        })
    }
}

/// Double Ratchet session state.
///
/// Created with [`DoubleRatchet::init_initiator`] or
/// [`DoubleRatchet::init_responder`]; mutates only through
/// [`DoubleRatchet::encrypt`] and [`DoubleRatchet::decrypt`].
#[derive(Clone)]
pub struct DoubleRatchet {
    /// Self DH key pair (sending ratchet)
    dhs: SecretKey,
    /// Remote ratchet public key; None on the responder side until the
    /// first inbound message
    dhr: Option<PublicKey>,
    /// Root key
    rk: SymmetricKey,
    /// Sending chain key
    cks: Option<SymmetricKey>,
    /// Receiving chain key
    ckr: Option<SymmetricKey>,
    /// Messages sent in the current sending chain
    ns: u32,
    /// Messages received in the current receiving chain
    nr: u32,
    /// Length of the previous sending chain
    pn: u32,
    /// Skipped message keys by (remote ratchet key, message number)
    skipped: HashMap<(PublicKey, u32), SymmetricKey>,
}

impl DoubleRatchet {
    /// Initializes the session on the initiating side.
    ///
    /// The initiator knows the peer's DH public key from the handshake and
    /// can send immediately: `(RK, CKs) = KDF_RK(SK, DH(DHs, DHr))`.
    #[must_use]
    pub fn init_initiator(
        session_key: SymmetricKey,
        key_pair: SecretKey,
        remote_public: PublicKey,
    ) -> Self {
        let dh_out = key_pair.diffie_hellman(&remote_public);
        let (rk, cks) = kdf_rk(&session_key, &dh_out);

        Self {
            dhs: key_pair,
            dhr: Some(remote_public),
            rk,
            cks: Some(cks),
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            skipped: HashMap::new(),
        }
    }

    /// Initializes the session on the responding side.
    ///
    /// The responder has no peer ratchet key yet; both chains stay empty
    /// until the first inbound message triggers a DH ratchet step.
    #[must_use]
    pub fn init_responder(session_key: SymmetricKey, key_pair: SecretKey) -> Self {
        Self {
            dhs: key_pair,
            dhr: None,
            rk: session_key,
            cks: None,
            ckr: None,
            ns: 0,
            nr: 0,
            pn: 0,
            skipped: HashMap::new(),
        }
    }

    /// Encrypts a message in the current sending chain.
    ///
    /// # Errors
    /// [`Error::NotInitialized`] when the sending chain does not exist yet
    /// (responder before its first receive).
    pub fn encrypt(&mut self, plaintext: &[u8], associated_data: &[u8]) -> Result<Message> {
        let chain_key = self.cks.as_ref().ok_or(Error::NotInitialized)?;
        let (next_chain, message_key) = kdf_ck(chain_key);
        self.cks = Some(next_chain);

        let header = Header {
            dh: self.dhs.public_key(),
            pn: self.pn,
            n: self.ns,
        };
        self.ns += 1;

        let ad = crypto::concat(associated_data, header.to_json().as_bytes());
        let ciphertext = crypto::encrypt(&message_key, plaintext, &ad);

        Ok(Message { header, ciphertext })
    }

    /// Decrypts a received message.
    ///
    /// Checks the skipped-key cache, performs a DH ratchet step when the
    /// header carries a new ratchet key, advances the receiving chain to
    /// the message's position (caching keys for the gap), then decrypts.
    ///
    /// On any failure the session state is exactly as before the call.
    pub fn decrypt(&mut self, message: &Message, associated_data: &[u8]) -> Result<Vec<u8>> {
        let snapshot = self.clone();
        match self.decrypt_inner(message, associated_data) {
            Ok(plaintext) => Ok(plaintext),
            Err(err) => {
                *self = snapshot;
                Err(err)
            }
        }
    }

    fn decrypt_inner(&mut self, message: &Message, associated_data: &[u8]) -> Result<Vec<u8>> {
        let ad = crypto::concat(associated_data, message.header.to_json().as_bytes());

        if let Some(message_key) = self
            .skipped
            .remove(&(message.header.dh, message.header.n))
        {
            return crypto::decrypt(&message_key, &message.ciphertext, &ad);
        }

        if Some(message.header.dh) != self.dhr {
            self.skip_message_keys(message.header.pn)?;
            self.dh_ratchet(&message.header);
        }

        self.skip_message_keys(message.header.n)?;

        let chain_key = self.ckr.as_ref().ok_or(Error::NotInitialized)?;
        let (next_chain, message_key) = kdf_ck(chain_key);
        self.ckr = Some(next_chain);
        self.nr += 1;

        crypto::decrypt(&message_key, &message.ciphertext, &ad)
    }

    /// Advances the receiving chain to `until`, caching each skipped key.
    fn skip_message_keys(&mut self, until: u32) -> Result<()> {
        if self.nr + MAX_SKIP < until {
            return Err(Error::TooManySkipped);
        }

        if let Some(chain_key) = self.ckr.as_ref() {
            let remote = self.dhr.ok_or(Error::NotInitialized)?;
            let mut current = chain_key.clone();

            while self.nr < until {
                let (next_chain, message_key) = kdf_ck(&current);
                self.skipped.insert((remote, self.nr), message_key);
                current = next_chain;
                self.nr += 1;
            }

            self.ckr = Some(current);
        }

        Ok(())
    }

    /// DH ratchet step on receipt of a new remote ratchet key.
    fn dh_ratchet(&mut self, header: &Header) {
        self.pn = self.ns;
        self.ns = 0;
        self.nr = 0;
        self.dhr = Some(header.dh);

        let dh_out = self.dhs.diffie_hellman(&header.dh);
        let (rk, ckr) = kdf_rk(&self.rk, &dh_out);
        self.rk = rk;
        self.ckr = Some(ckr);

        self.dhs = SecretKey::generate(&mut OsRng);

        let dh_out = self.dhs.diffie_hellman(&header.dh);
        let (rk, cks) = kdf_rk(&self.rk, &dh_out);
        self.rk = rk;
        self.cks = Some(cks);
    }

    /// The session's current ratchet public key
    #[must_use]
    pub fn public_key(&self) -> PublicKey {
        self.dhs.public_key()
    }

    /// Number of cached skipped message keys
    #[must_use]
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

impl std::fmt::Debug for DoubleRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DoubleRatchet")
            .field("ns", &self.ns)
            .field("nr", &self.nr)
            .field("pn", &self.pn)
            .field("skipped", &self.skipped.len())
            .finish()
    }
}

impl Zeroize for DoubleRatchet {
    fn zeroize(&mut self) {
        self.rk.zeroize();
        self.cks.zeroize();
        self.ckr.zeroize();
        self.skipped.clear();
    }
}

impl Drop for DoubleRatchet {
    fn drop(&mut self) {
        self.zeroize();
    }
}
