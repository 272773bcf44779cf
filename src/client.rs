//! Thin client driver: owns a user's identity and sessions.
//!
//! Orchestrates the handshake and ratchet layers against a [`Server`]:
//! registration publishes the prekey bundle, the first send to a new peer
//! runs X3DH and opens an initiator session, and received envelopes
//! either complete a handshake (responder side) or flow through the
//! established session. Undecryptable envelopes are discarded without
//! touching session state.

use crate::double_ratchet::{DoubleRatchet, Message};
use crate::error::{Error, Result};
use crate::keys::{PublicKey, SecretKey};
use crate::server::{Envelope, Server};
use crate::x3dh::{self, PreKeyRecord, RegistrationBundle};
use crate::xeddsa::XEdDSAPrivateKey;

use rand_core::CryptoRngCore;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Number of one-time prekeys published at registration
const ONE_TIME_PREKEY_COUNT: u32 = 10;

/// A decrypted message taken from the mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    /// Sender id
    pub from: String,

    /// Decrypted payload
    pub plaintext: Vec<u8>,
}

#[derive(Debug)]
struct Session {
    ratchet: DoubleRatchet,
    associated_data: Vec<u8>,
}

/// One user's identity, prekey secrets, and per-peer sessions.
pub struct Client {
    sid: String,
    identity: SecretKey,
    signed_prekey: SecretKey,
    signed_prekey_id: u32,
    one_time_prekeys: HashMap<u32, SecretKey>,
    sessions: HashMap<String, Session>,
}

impl Client {
    /// Creates a client with a fresh identity, signed prekey, and
    /// one-time prekeys.
    pub fn new<R: CryptoRngCore>(rng: &mut R, sid: impl Into<String>) -> Self {
        let one_time_prekeys = (1..=ONE_TIME_PREKEY_COUNT)
            .map(|id| (id, SecretKey::generate(rng)))
            .collect();

        Self {
            sid: sid.into(),
            identity: SecretKey::generate(rng),
            signed_prekey: SecretKey::generate(rng),
            signed_prekey_id: 1,
            one_time_prekeys,
            sessions: HashMap::new(),
        }
    }

    /// This client's id.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// This client's identity public key.
    #[must_use]
    pub fn identity_key(&self) -> PublicKey {
        self.identity.public_key()
    }

    /// Publishes this client's prekey bundle to the server.
    ///
    /// The signed prekey is signed with XEdDSA under the identity key;
    /// `rng` supplies the signature randomness.
    pub fn register<R: CryptoRngCore>(&self, rng: &mut R, server: &mut Server) {
        let signer = XEdDSAPrivateKey::from_x25519_private(self.identity.as_bytes());
        let mut random = [0u8; 64];
        rng.fill_bytes(&mut random);
        let signature = signer.sign(self.signed_prekey.public_key().as_bytes(), &random);

        let mut one_time_prekeys: Vec<PreKeyRecord> = self
            .one_time_prekeys
            .iter()
            .map(|(id, key)| PreKeyRecord {
                id: *id,
                pk: key.public_key(),
            })
            .collect();
        one_time_prekeys.sort_by_key(|record| record.id);

        server.register(
            &self.sid,
            RegistrationBundle {
                identity_key: PreKeyRecord {
                    id: 1,
                    pk: self.identity.public_key(),
                },
                prekey: PreKeyRecord {
                    id: self.signed_prekey_id,
                    pk: self.signed_prekey.public_key(),
                },
                signature,
                one_time_prekeys,
            },
        );
    }

    /// Encrypts and delivers a message to `to`.
    ///
    /// Opens a session via X3DH when none exists: fetches the peer's
    /// bundle, verifies the signed-prekey signature (aborting the send on
    /// failure), and wraps the first ciphertext in an initial envelope.
    ///
    /// # Errors
    /// [`Error::UnknownUser`] when the peer is not registered;
    /// [`Error::HandshakeFailure`] when the bundle signature is invalid.
    pub fn send<R: CryptoRngCore>(
        &mut self,
        rng: &mut R,
        server: &mut Server,
        to: &str,
        plaintext: &[u8],
    ) -> Result<()> {
        if let Some(session) = self.sessions.get_mut(to) {
            let message = session.ratchet.encrypt(plaintext, &session.associated_data)?;
            return server.deliver(
                to,
                Envelope::Ratchet {
                    sid: self.sid.clone(),
                    msg: message.to_wire(),
                },
            );
        }

        let bundle = server.prekey_bundle(to)?;
        let start = x3dh::initiate(rng, &self.identity, &bundle)?;
        debug!(from = self.sid.as_str(), to, "opening session");

        let mut ratchet = DoubleRatchet::init_initiator(
            start.session_key,
            self.identity.clone(),
            bundle.identity_key.pk,
        );
        let message = ratchet.encrypt(plaintext, &start.associated_data)?;

        server.deliver(
            to,
            Envelope::Initial {
                sid: self.sid.clone(),
                ik: self.identity.public_key(),
                ek: start.ephemeral_key,
                pkid: start.prekey_id,
                opkid: start.one_time_prekey_id,
                msg: message.to_wire(),
            },
        )?;

        self.sessions.insert(
            to.to_owned(),
            Session {
                ratchet,
                associated_data: start.associated_data,
            },
        );
        Ok(())
    }

    /// Drains this client's mailbox and decrypts what it can.
    ///
    /// Envelopes that fail (bad handshake parameters, authentication
    /// failure, no session) are logged and discarded; sessions stay
    /// intact either way.
    pub fn receive(&mut self, server: &mut Server) -> Vec<Incoming> {
        let mut incoming = Vec::new();

        for envelope in server.take_mailbox(&self.sid) {
            match self.open_envelope(envelope) {
                Ok(message) => incoming.push(message),
                Err(err) => {
                    warn!(user = self.sid.as_str(), error = %err, "discarding envelope");
                }
            }
        }

        incoming
    }

    fn open_envelope(&mut self, envelope: Envelope) -> Result<Incoming> {
        match envelope {
            Envelope::Initial {
                sid,
                ik,
                ek,
                pkid,
                opkid,
                msg,
            } => {
                let message = Message::from_wire(&msg)?;
                let plaintext = if self.sessions.contains_key(&sid) {
                    // redelivered initial envelope; the session already exists
                    self.decrypt_with_session(&sid, &message)?
                } else {
                    self.accept_session(&sid, &ik, &ek, pkid, opkid, &message)?
                };
                Ok(Incoming {
                    from: sid,
                    plaintext,
                })
            }
            Envelope::Ratchet { sid, msg } => {
                let message = Message::from_wire(&msg)?;
                let plaintext = self.decrypt_with_session(&sid, &message)?;
                Ok(Incoming {
                    from: sid,
                    plaintext,
                })
            }
        }
    }

    fn decrypt_with_session(&mut self, peer: &str, message: &Message) -> Result<Vec<u8>> {
        let session = self.sessions.get_mut(peer).ok_or(Error::NotInitialized)?;
        session.ratchet.decrypt(message, &session.associated_data)
    }

    /// Responder side of the handshake: mirrors the X3DH computation and
    /// opens a session keyed to the first message.
    fn accept_session(
        &mut self,
        from: &str,
        peer_identity: &PublicKey,
        peer_ephemeral: &PublicKey,
        prekey_id: u32,
        one_time_prekey_id: Option<u32>,
        message: &Message,
    ) -> Result<Vec<u8>> {
        if prekey_id != self.signed_prekey_id {
            return Err(Error::HandshakeFailure);
        }

        let one_time_prekey = match one_time_prekey_id {
            Some(id) => Some(
                self.one_time_prekeys
                    .get(&id)
                    .ok_or(Error::HandshakeFailure)?
                    .clone(),
            ),
            None => None,
        };

        let start = x3dh::respond(
            &self.identity,
            &self.signed_prekey,
            one_time_prekey.as_ref(),
            peer_identity,
            peer_ephemeral,
        )?;

        let mut ratchet =
            DoubleRatchet::init_responder(start.session_key, self.identity.clone());
        let plaintext = ratchet.decrypt(message, &start.associated_data)?;

        // handshake complete: the one-time prekey is spent
        if let Some(id) = one_time_prekey_id {
            self.one_time_prekeys.remove(&id);
        }
        debug!(user = self.sid.as_str(), from, "session established");

        self.sessions.insert(
            from.to_owned(),
            Session {
                ratchet,
                associated_data: start.associated_data,
            },
        );
        Ok(plaintext)
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("sid", &self.sid)
            .field("one_time_prekeys", &self.one_time_prekeys.len())
            .field("sessions", &self.sessions.len())
            .finish()
    }
}
