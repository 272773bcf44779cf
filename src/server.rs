//! In-memory bulletin board: prekey registry and mailboxes.
//!
//! Stands in for the untrusted delivery server of a real deployment. It
//! never sees key material beyond the public bundles users publish, and
//! it hands out one one-time prekey per bundle fetch, first-in-first-out,
//! until the supply runs dry.

use crate::error::{Error, Result};
use crate::keys::PublicKey;
use crate::x3dh::{PreKeyBundle, PreKeyRecord, RegistrationBundle};
use crate::xeddsa::SIGNATURE_LENGTH;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// A message waiting in a user's mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Envelope {
    /// X3DH initial message: handshake parameters plus the first ratchet
    /// ciphertext
    Initial {
        /// Sender id
        sid: String,
        /// Sender's identity public key, lowercase hex
        ik: PublicKey,
        /// Sender's ephemeral public key, lowercase hex
        ek: PublicKey,
        /// Id of the signed prekey the sender used
        pkid: u32,
        /// Id of the one-time prekey the sender used, if any
        #[serde(skip_serializing_if = "Option::is_none")]
        opkid: Option<u32>,
        /// First ratchet message, `<header>;<payload>` wire form
        msg: String,
    },

    /// Ratchet message on an established session
    Ratchet {
        /// Sender id
        sid: String,
        /// Ratchet message, `<header>;<payload>` wire form
        msg: String,
    },
}

#[derive(Debug, Clone)]
struct UserRecord {
    identity_key: PreKeyRecord,
    prekey: PreKeyRecord,
    signature: [u8; SIGNATURE_LENGTH],
    one_time_prekeys: VecDeque<PreKeyRecord>,
    created_at: u64,
}

/// In-memory prekey registry and message store.
#[derive(Debug, Default)]
pub struct Server {
    users: HashMap<String, UserRecord>,
    mailboxes: HashMap<String, Vec<Envelope>>,
}

impl Server {
    /// Creates an empty server.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) a user's prekey bundle and opens their
    /// mailbox.
    pub fn register(&mut self, sid: &str, bundle: RegistrationBundle) {
        debug!(
            user = sid,
            one_time_prekeys = bundle.one_time_prekeys.len(),
            "registering prekey bundle"
        );

        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());

        self.users.insert(
            sid.to_owned(),
            UserRecord {
                identity_key: bundle.identity_key,
                prekey: bundle.prekey,
                signature: bundle.signature,
                one_time_prekeys: bundle.one_time_prekeys.into(),
                created_at,
            },
        );
        self.mailboxes.entry(sid.to_owned()).or_default();
    }

    /// Fetches a prekey bundle for `sid`, consuming one one-time prekey.
    ///
    /// # Errors
    /// [`Error::UnknownUser`] when `sid` is not registered.
    pub fn prekey_bundle(&mut self, sid: &str) -> Result<PreKeyBundle> {
        let user = self.users.get_mut(sid).ok_or(Error::UnknownUser)?;

        let one_time_prekey = user.one_time_prekeys.pop_front();
        if one_time_prekey.is_none() {
            debug!(user = sid, "one-time prekeys exhausted");
        }

        Ok(PreKeyBundle {
            identity_key: user.identity_key,
            prekey: user.prekey,
            signature: user.signature,
            one_time_prekey,
            created_at: user.created_at,
        })
    }

    /// Number of one-time prekeys remaining for a user.
    #[must_use]
    pub fn one_time_prekey_count(&self, sid: &str) -> usize {
        self.users
            .get(sid)
            .map_or(0, |user| user.one_time_prekeys.len())
    }

    /// Drops an envelope into a registered user's mailbox.
    ///
    /// # Errors
    /// [`Error::UnknownUser`] when the recipient is not registered.
    pub fn deliver(&mut self, to: &str, envelope: Envelope) -> Result<()> {
        let mailbox = self.mailboxes.get_mut(to).ok_or(Error::UnknownUser)?;
        mailbox.push(envelope);
        Ok(())
    }

    /// Drains and returns a user's mailbox.
    pub fn take_mailbox(&mut self, sid: &str) -> Vec<Envelope> {
        self.mailboxes.get_mut(sid).map(std::mem::take).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SecretKey;
    use rand_core::OsRng;

    fn registration(one_time_count: u32) -> RegistrationBundle {
        let identity = SecretKey::generate(&mut OsRng);
        let prekey = SecretKey::generate(&mut OsRng);
        RegistrationBundle {
            identity_key: PreKeyRecord {
                id: 1,
                pk: identity.public_key(),
            },
            prekey: PreKeyRecord {
                id: 1,
                pk: prekey.public_key(),
            },
            signature: [0u8; SIGNATURE_LENGTH],
            one_time_prekeys: (1..=one_time_count)
                .map(|id| PreKeyRecord {
                    id,
                    pk: SecretKey::generate(&mut OsRng).public_key(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_unknown_user() {
        let mut server = Server::new();
        assert_eq!(server.prekey_bundle("nobody"), Err(Error::UnknownUser));
        assert_eq!(
            server.deliver(
                "nobody",
                Envelope::Ratchet {
                    sid: "a".into(),
                    msg: String::new()
                }
            ),
            Err(Error::UnknownUser)
        );
    }

    #[test]
    fn test_one_time_prekeys_pop_fifo_until_exhausted() {
        let mut server = Server::new();
        server.register("bob", registration(3));

        for expected_id in 1..=3 {
            let bundle = server.prekey_bundle("bob").unwrap();
            assert_eq!(bundle.one_time_prekey.unwrap().id, expected_id);
        }

        let drained = server.prekey_bundle("bob").unwrap();
        assert!(drained.one_time_prekey.is_none());
        assert_eq!(server.one_time_prekey_count("bob"), 0);
    }

    #[test]
    fn test_mailbox_drains_on_take() {
        let mut server = Server::new();
        server.register("bob", registration(0));

        let envelope = Envelope::Ratchet {
            sid: "alice".into(),
            msg: "header;payload".into(),
        };
        server.deliver("bob", envelope.clone()).unwrap();
        server.deliver("bob", envelope.clone()).unwrap();

        assert_eq!(server.take_mailbox("bob").len(), 2);
        assert!(server.take_mailbox("bob").is_empty());
    }

    #[test]
    fn test_envelope_serde_shape() {
        let envelope = Envelope::Initial {
            sid: "alice".into(),
            ik: PublicKey::from_bytes([1u8; 32]),
            ek: PublicKey::from_bytes([2u8; 32]),
            pkid: 1,
            opkid: None,
            msg: "h;p".into(),
        };
        let json = serde_json::to_string(&envelope).unwrap();
        assert!(json.contains("\"kind\":\"initial\""));
        // absent one-time prekey id is omitted entirely
        assert!(!json.contains("opkid"));
        assert_eq!(serde_json::from_str::<Envelope>(&json).unwrap(), envelope);
    }
}
