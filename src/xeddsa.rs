//! XEdDSA signature scheme for X25519 keys.
//!
//! Signs and verifies with Montgomery X25519 key material by deriving the
//! matching Ed25519 scalar on demand, following "The XEdDSA and VXEdDSA
//! Signature Schemes" (Perrin, 2016). The signed prekeys in the X3DH
//! handshake use this scheme, so a single identity key pair serves both
//! key agreement and authentication.

use crate::error::{Error, Result};
use crate::keys::PublicKey;

use curve25519_dalek::constants::ED25519_BASEPOINT_TABLE;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::montgomery::MontgomeryPoint;
use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// XEdDSA signature: 64 bytes (compressed R point followed by s scalar)
pub const SIGNATURE_LENGTH: usize = 64;

/// Curve25519 field prime 2^255 - 19, little-endian
const FIELD_PRIME: [u8; 32] = [
    0xed, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
    0xff, 0x7f,
];

/// Returns true when `bytes`, read little-endian, is strictly below the
/// field prime. Inputs here are public values.
fn is_canonical_field_element(bytes: &[u8; 32]) -> bool {
    for i in (0..32).rev() {
        if bytes[i] < FIELD_PRIME[i] {
            return true;
        }
        if bytes[i] > FIELD_PRIME[i] {
            return false;
        }
    }
    false
}

/// `H_i(X) = SHA-512(prefix_i || X)` where `prefix_i` is 32 bytes of 0xFF
/// with byte 0 replaced by `0xFF - i`, parsed little-endian mod q.
fn hash_i(i: u8, parts: &[&[u8]]) -> Scalar {
    let mut prefix = [0xFFu8; 32];
    prefix[0] = 0xFF - i;

    let mut hasher = Sha512::new();
    hasher.update(prefix);
    for part in parts {
        hasher.update(part);
    }

    Scalar::from_bytes_mod_order_wide(&hasher.finalize().into())
}

/// XEdDSA signing key derived from an X25519 private key
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct XEdDSAPrivateKey {
    /// Effective Ed25519 signing scalar, negated when E's sign bit is set
    a: Scalar,
    /// Ed25519 public key A with sign bit forced to zero
    #[zeroize(skip)]
    public: XEdDSAPublicKey,
}

/// XEdDSA public key (compressed Ed25519 point derived from X25519)
#[derive(Clone, Copy, Debug)]
pub struct XEdDSAPublicKey {
    compressed: CompressedEdwardsY,
}

impl XEdDSAPrivateKey {
    /// Derives the signing key pair from X25519 private key bytes.
    ///
    /// Computes `E = kB` on Ed25519 with the clamped scalar, takes
    /// `A = compress(E)` with sign bit forced to zero, and negates the
    /// scalar when E's sign bit was set, so that `aB == decompress(A)`.
    #[must_use]
    pub fn from_x25519_private(k_bytes: &[u8; 32]) -> Self {
        let mut k_clamped = *k_bytes;
        k_clamped[0] &= 248;
        k_clamped[31] &= 127;
        k_clamped[31] |= 64;

        let k = Scalar::from_bytes_mod_order(k_clamped);
        k_clamped.zeroize();

        let e_point = &k * ED25519_BASEPOINT_TABLE;
        let mut a_bytes = e_point.compress().to_bytes();
        let sign_bit = a_bytes[31] >> 7;
        a_bytes[31] &= 0x7F;

        let a = if sign_bit == 1 { -k } else { k };

        Self {
            a,
            public: XEdDSAPublicKey {
                compressed: CompressedEdwardsY(a_bytes),
            },
        }
    }

    /// Returns the XEdDSA public key.
    #[must_use]
    pub fn public_key(&self) -> &XEdDSAPublicKey {
        &self.public
    }

    /// Signs a message; `random` is 64 bytes of fresh randomness (Z).
    ///
    /// `r = H_1(a || M || Z)`, `R = rB`, `h = H_0(R || A || M)`,
    /// `s = r + h*a`, signature is `R || s`.
    #[must_use]
    pub fn sign(&self, message: &[u8], random: &[u8; 64]) -> [u8; SIGNATURE_LENGTH] {
        let r = hash_i(1, &[self.a.as_bytes(), message, random]);
        let cap_r = (&r * ED25519_BASEPOINT_TABLE).compress();

        let h = hash_i(
            0,
            &[cap_r.as_bytes(), self.public.compressed.as_bytes(), message],
        );
        let s = r + (h * self.a);

        let mut signature = [0u8; SIGNATURE_LENGTH];
        signature[..32].copy_from_slice(cap_r.as_bytes());
        signature[32..].copy_from_slice(s.as_bytes());
        signature
    }
}

impl std::fmt::Debug for XEdDSAPrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "XEdDSAPrivateKey([REDACTED])")
    }
}

impl XEdDSAPublicKey {
    /// Derives the Ed25519 verification key from an X25519 public key.
    ///
    /// Rejects `u >= p` and off-curve points. The birational map takes
    /// `y = (u - 1) / (u + 1)` and recovers x choosing the even root, so
    /// the compressed encoding always carries sign bit zero.
    pub fn from_x25519_public(public_key: &PublicKey) -> Result<Self> {
        let u = public_key.as_bytes();
        if !is_canonical_field_element(u) {
            return Err(Error::InvalidKey);
        }

        let edwards = MontgomeryPoint(*u)
            .to_edwards(0)
            .ok_or(Error::InvalidKey)?;

        let mut bytes = edwards.compress().to_bytes();
        bytes[31] &= 0x7F;

        Ok(Self {
            compressed: CompressedEdwardsY(bytes),
        })
    }

    /// Returns the compressed Edwards encoding of A.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.compressed.as_bytes()
    }

    /// Verifies an XEdDSA signature.
    ///
    /// Rejects signatures with `s >= 2^253`, a non-canonical or
    /// undecompressable R, then checks `compress(sB - hA) == R` in
    /// constant time.
    pub fn verify(&self, message: &[u8], signature: &[u8; SIGNATURE_LENGTH]) -> Result<()> {
        let mut r_bytes = [0u8; 32];
        let mut s_bytes = [0u8; 32];
        r_bytes.copy_from_slice(&signature[..32]);
        s_bytes.copy_from_slice(&signature[32..]);

        if (s_bytes[31] & 0xE0) != 0 {
            return Err(Error::InvalidSignature);
        }

        let mut r_y = r_bytes;
        r_y[31] &= 0x7F;
        if !is_canonical_field_element(&r_y) {
            return Err(Error::InvalidSignature);
        }

        let r_compressed = CompressedEdwardsY(r_bytes);
        if r_compressed.decompress().is_none() {
            return Err(Error::InvalidSignature);
        }

        let a_point = self
            .compressed
            .decompress()
            .ok_or(Error::InvalidSignature)?;

        let s = Scalar::from_bytes_mod_order(s_bytes);
        let h = hash_i(
            0,
            &[&r_bytes, self.compressed.as_bytes(), message],
        );

        let r_check = EdwardsPoint::vartime_double_scalar_mul_basepoint(&h, &-a_point, &s);

        if bool::from(r_check.compress().as_bytes().ct_eq(&r_bytes)) {
            Ok(())
        } else {
            Err(Error::InvalidSignature)
        }
    }
}
