//! # Axolotl
//!
//! End-to-end encryption core for a Signal-style messenger: the X3DH
//! asynchronous key agreement, the Double Ratchet session state machine
//! (plain and header-encrypted), and XEdDSA signatures over X25519 key
//! material.
//!
//! ## Security Properties
//!
//! - **Forward secrecy**: every message is encrypted under a fresh key;
//!   compromising current keys does not expose past messages
//! - **Post-compromise security**: each direction change rotates DH key
//!   pairs, healing the session after a key compromise
//! - **Asynchronous**: the initiator can establish a session and send
//!   while the responder is offline, via published prekey bundles
//! - **Out-of-order tolerance**: skipped message keys are cached (up to
//!   [`MAX_SKIP`] per chain advance) so reordered messages still decrypt
//!
//! ## Usage
//!
//! ```rust,no_run
//! use axolotl::{Client, Server};
//! use rand_core::OsRng;
//!
//! let mut server = Server::new();
//!
//! let mut alice = Client::new(&mut OsRng, "alice");
//! let mut bob = Client::new(&mut OsRng, "bob");
//! alice.register(&mut OsRng, &mut server);
//! bob.register(&mut OsRng, &mut server);
//!
//! // First send runs X3DH against Bob's published bundle
//! alice.send(&mut OsRng, &mut server, "bob", b"Hi Bob!").unwrap();
//!
//! for message in bob.receive(&mut server) {
//!     println!("{}: {:?}", message.from, message.plaintext);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![warn(clippy::all, clippy::pedantic, clippy::cargo)]

pub mod client;
pub mod crypto;
pub mod double_ratchet;
pub mod error;
pub mod header_ratchet;
pub mod keys;
pub mod server;
pub mod x3dh;
pub mod xeddsa;

// Re-export main types
pub use client::{Client, Incoming};
pub use double_ratchet::{DoubleRatchet, Header, Message, MAX_SKIP};
pub use error::{Error, Result};
pub use header_ratchet::{EncryptedMessage, HeaderRatchet};
pub use keys::{PublicKey, SecretKey};
pub use server::{Envelope, Server};
pub use x3dh::{PreKeyBundle, PreKeyRecord, RegistrationBundle};
