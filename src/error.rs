//! Error types for the protocol implementation.

use thiserror::Error;

/// Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during protocol operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Send attempted before the sending chain exists (responder before
    /// first inbound message)
    #[error("session not initialized for sending")]
    NotInitialized,

    /// A decrypt would advance the receiving chain more than `MAX_SKIP`
    /// positions past the current counter
    #[error("too many skipped messages")]
    TooManySkipped,

    /// AEAD tag mismatch; the caller should discard the message and keep
    /// the session
    #[error("authentication failed")]
    AuthFailure,

    /// Encrypted header matched neither a skipped header key, the current
    /// receiving header key, nor the next one
    #[error("header decryption failed")]
    HeaderDecryptFailure,

    /// Handshake aborted: invalid signed-prekey signature, unknown prekey
    /// id, or missing one-time prekey
    #[error("handshake failed")]
    HandshakeFailure,

    /// XEdDSA signature rejected
    #[error("invalid signature")]
    InvalidSignature,

    /// Key material of the wrong length; programmer error, fail loud
    #[error("invalid key")]
    InvalidKey,

    /// Malformed wire data (header, payload, or envelope)
    #[error("invalid message format")]
    InvalidMessageFormat,

    /// The referenced user is not registered on the server
    #[error("unknown user")]
    UnknownUser,
}
