//! X3DH (Extended Triple Diffie-Hellman) asynchronous key agreement.
//!
//! The responder publishes a prekey bundle (identity key, signed prekey,
//! XEdDSA signature, optional one-time prekey). The initiator verifies the
//! signature, generates an ephemeral key, and combines three or four DH
//! outputs into the session key that seeds the Double Ratchet:
//!
//! - `DH1 = DH(IK_A, SPK_B)`
//! - `DH2 = DH(EK_A, IK_B)`
//! - `DH3 = DH(EK_A, SPK_B)`
//! - `DH4 = DH(EK_A, OPK_B)` when a one-time prekey was available
//!
//! The responder mirrors the computation with its stored private keys and
//! arrives at the same secret. Both sides also derive the associated data
//! `AD = Encode(IK_A) || Encode(IK_B)` that binds every ratchet message to
//! the two identities.

use crate::crypto::SymmetricKey;
use crate::error::{Error, Result};
use crate::keys::{DhOutput, PublicKey, SecretKey};
use crate::xeddsa::{XEdDSAPublicKey, SIGNATURE_LENGTH};

use hkdf::Hkdf;
use rand_core::CryptoRngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use zeroize::Zeroize;

/// HKDF info string for session key derivation
const SESSION_INFO: &[u8] = b"My super secret app";

/// 32 bytes of 0xFF prepended to the DH outputs, separating the X3DH
/// key derivation domain from XEdDSA hash inputs
const DOMAIN_SEPARATOR: [u8; 32] = [0xFF; 32];

/// Curve identifier byte for X25519 public key encodings
pub const CURVE_ID: u8 = 0x00;

/// A public prekey with its registry id, `{id, pk}` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreKeyRecord {
    /// Registry id, unique per user and key kind
    pub id: u32,

    /// The public key, lowercase hex on the wire
    pub pk: PublicKey,
}

/// Everything a user publishes to the server at registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationBundle {
    /// Long-term identity public key
    pub identity_key: PreKeyRecord,

    /// Medium-term signed prekey
    pub prekey: PreKeyRecord,

    /// XEdDSA signature over the signed prekey bytes, under the identity key
    #[serde(with = "signature_hex")]
    pub signature: [u8; SIGNATURE_LENGTH],

    /// One-time prekeys, consumed first-in-first-out
    pub one_time_prekeys: Vec<PreKeyRecord>,
}

/// A fetched prekey bundle: one one-time prekey at most, already popped
/// from the server's supply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyBundle {
    /// Responder's identity public key
    pub identity_key: PreKeyRecord,

    /// Responder's signed prekey
    pub prekey: PreKeyRecord,

    /// XEdDSA signature over the signed prekey bytes
    #[serde(with = "signature_hex")]
    pub signature: [u8; SIGNATURE_LENGTH],

    /// One one-time prekey, absent when the supply is exhausted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub one_time_prekey: Option<PreKeyRecord>,

    /// Unix timestamp of the registration
    pub created_at: u64,
}

impl PreKeyBundle {
    /// Verifies the signed-prekey signature under the bundle's identity key.
    pub fn verify_signature(&self) -> Result<()> {
        let verifier = XEdDSAPublicKey::from_x25519_public(&self.identity_key.pk)
            .map_err(|_| Error::HandshakeFailure)?;
        verifier
            .verify(self.prekey.pk.as_bytes(), &self.signature)
            .map_err(|_| Error::HandshakeFailure)
    }
}

/// Initiator's handshake output: the ratchet seed plus everything the
/// first envelope must carry.
pub struct InitiatorStart {
    /// Session key seeding the Double Ratchet
    pub session_key: SymmetricKey,

    /// `Encode(IK_A) || Encode(IK_B)`, associated data for the session
    pub associated_data: Vec<u8>,

    /// Ephemeral public key to include in the initial message
    pub ephemeral_key: PublicKey,

    /// Id of the signed prekey used
    pub prekey_id: u32,

    /// Id of the one-time prekey used, if any
    pub one_time_prekey_id: Option<u32>,
}

impl std::fmt::Debug for InitiatorStart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitiatorStart")
            .field("ephemeral_key", &self.ephemeral_key)
            .field("prekey_id", &self.prekey_id)
            .field("one_time_prekey_id", &self.one_time_prekey_id)
            .finish()
    }
}

/// Responder's handshake output.
pub struct ResponderStart {
    /// Session key seeding the Double Ratchet
    pub session_key: SymmetricKey,

    /// `Encode(IK_A) || Encode(IK_B)`, associated data for the session
    pub associated_data: Vec<u8>,
}

impl std::fmt::Debug for ResponderStart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponderStart").finish()
    }
}

/// Initiator side of the handshake.
///
/// Verifies the bundle signature, generates the ephemeral key, and
/// derives the session key and associated data.
///
/// # Errors
/// [`Error::HandshakeFailure`] when the signed-prekey signature does not
/// verify; no session material is produced.
pub fn initiate<R: CryptoRngCore>(
    rng: &mut R,
    identity: &SecretKey,
    bundle: &PreKeyBundle,
) -> Result<InitiatorStart> {
    bundle.verify_signature()?;

    let ephemeral = SecretKey::generate(rng);

    let dh1 = identity.diffie_hellman(&bundle.prekey.pk);
    let dh2 = ephemeral.diffie_hellman(&bundle.identity_key.pk);
    let dh3 = ephemeral.diffie_hellman(&bundle.prekey.pk);
    let dh4 = bundle
        .one_time_prekey
        .as_ref()
        .map(|opk| ephemeral.diffie_hellman(&opk.pk));

    let session_key = derive_session_key(&dh1, &dh2, &dh3, dh4.as_ref());
    let associated_data = associated_data(&identity.public_key(), &bundle.identity_key.pk);

    Ok(InitiatorStart {
        session_key,
        associated_data,
        ephemeral_key: ephemeral.public_key(),
        prekey_id: bundle.prekey.id,
        one_time_prekey_id: bundle.one_time_prekey.as_ref().map(|opk| opk.id),
    })
}

/// Responder side of the handshake.
///
/// The pairing order is mirrored so both sides compute the same DH
/// outputs: where the initiator paired its identity key with the signed
/// prekey, the responder pairs the signed prekey with the initiator's
/// identity key, and so on.
pub fn respond(
    identity: &SecretKey,
    signed_prekey: &SecretKey,
    one_time_prekey: Option<&SecretKey>,
    peer_identity: &PublicKey,
    peer_ephemeral: &PublicKey,
) -> Result<ResponderStart> {
    let dh1 = signed_prekey.diffie_hellman(peer_identity);
    let dh2 = identity.diffie_hellman(peer_ephemeral);
    let dh3 = signed_prekey.diffie_hellman(peer_ephemeral);
    let dh4 = one_time_prekey.map(|opk| opk.diffie_hellman(peer_ephemeral));

    let session_key = derive_session_key(&dh1, &dh2, &dh3, dh4.as_ref());
    let associated_data = associated_data(peer_identity, &identity.public_key());

    Ok(ResponderStart {
        session_key,
        associated_data,
    })
}

/// `SK = HKDF-SHA512(0xFF*32 || DH1 || .. || DHk)` with a zero salt.
fn derive_session_key(
    dh1: &DhOutput,
    dh2: &DhOutput,
    dh3: &DhOutput,
    dh4: Option<&DhOutput>,
) -> SymmetricKey {
    let mut ikm = Vec::with_capacity(32 * 5);
    ikm.extend_from_slice(&DOMAIN_SEPARATOR);
    ikm.extend_from_slice(dh1.as_bytes());
    ikm.extend_from_slice(dh2.as_bytes());
    ikm.extend_from_slice(dh3.as_bytes());
    if let Some(dh4) = dh4 {
        ikm.extend_from_slice(dh4.as_bytes());
    }

    let hkdf = Hkdf::<Sha512>::new(Some(&[0u8; 32]), &ikm);
    let mut okm = [0u8; 32];
    hkdf.expand(SESSION_INFO, &mut okm)
        .expect("output size is valid");

    ikm.zeroize();
    SymmetricKey::from_bytes(okm)
}

/// `AD = Encode(IK_A) || Encode(IK_B)` in initiator-then-responder order,
/// where `Encode(pk) = curve_id || pk`.
#[must_use]
pub fn associated_data(initiator_identity: &PublicKey, responder_identity: &PublicKey) -> Vec<u8> {
    let mut ad = Vec::with_capacity(2 + 64);
    ad.push(CURVE_ID);
    ad.extend_from_slice(initiator_identity.as_bytes());
    ad.push(CURVE_ID);
    ad.extend_from_slice(responder_identity.as_bytes());
    ad
}

/// Hex (de)serialization for 64-byte signatures.
mod signature_hex {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        sig: &[u8; super::SIGNATURE_LENGTH],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(sig))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; super::SIGNATURE_LENGTH], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s).map_err(D::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| D::Error::custom("signature must be 64 bytes"))
    }
}
