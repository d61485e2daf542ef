use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Curve, CryptoError, Result};

/// AES-256 key size in bytes.
pub const SYMMETRIC_KEY_LENGTH: usize = 32;

/// Short SHA-256 preview of key material, safe to print.
fn fingerprint(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let hash = Sha256::digest(bytes);
    format!(
        "{:02x}{:02x}{:02x}{:02x}...",
        hash[0], hash[1], hash[2], hash[3]
    )
}

/// 256-bit key for the AES-256-CBC cipher context.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SymmetricKey([u8; SYMMETRIC_KEY_LENGTH]);

impl Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SymmetricKey({})", fingerprint(&self.0))
    }
}

impl SymmetricKey {
    /// Wrap an existing 32 byte key.
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_LENGTH]) -> Self {
        SymmetricKey(bytes)
    }

    /// Copy a key out of a slice, which must be exactly 32 bytes long.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; SYMMETRIC_KEY_LENGTH] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidLength { len: bytes.len() })?;
        Ok(SymmetricKey(bytes))
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_LENGTH] {
        &self.0
    }
}

pub(crate) enum PrivateKeyInner {
    P256(p256::SecretKey),
    P384(p384::SecretKey),
}

/// Private scalar of a local key pair. Zeroized on drop by the underlying curve crate.
pub struct PrivateKey(pub(crate) PrivateKeyInner);

impl PrivateKey {
    /// Curve this scalar belongs to.
    pub fn curve(&self) -> Curve {
        match self.0 {
            PrivateKeyInner::P256(_) => Curve::P256,
            PrivateKeyInner::P384(_) => Curve::P384,
        }
    }

    /// Derive the matching public point.
    pub fn public_key(&self) -> PublicKey {
        match &self.0 {
            PrivateKeyInner::P256(secret) => PublicKey(PublicKeyInner::P256(secret.public_key())),
            PrivateKeyInner::P384(secret) => PublicKey(PublicKeyInner::P384(secret.public_key())),
        }
    }
}

impl Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey({}, ...)", self.curve())
    }
}

#[derive(Clone, PartialEq, Eq)]
pub(crate) enum PublicKeyInner {
    P256(p256::PublicKey),
    P384(p384::PublicKey),
}

/// A validated public point on one of the supported curves.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey(pub(crate) PublicKeyInner);

impl PublicKey {
    /// Curve this point lies on.
    pub fn curve(&self) -> Curve {
        match self.0 {
            PublicKeyInner::P256(_) => Curve::P256,
            PublicKeyInner::P384(_) => Curve::P384,
        }
    }
}

impl Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let raw = crate::CryptoProvider::new(self.curve()).serialize_public(self);
        write!(f, "PublicKey({}, {})", self.curve(), fingerprint(raw.as_bytes()))
    }
}

/// Raw wire encoding of a public key: `x || y`, big endian, without the SEC1 `0x04` tag.
///
/// The length is always [`Curve::public_key_len`] of the key's curve.
#[derive(Clone, PartialEq, Eq)]
pub struct RawPublicKey(pub(crate) Vec<u8>);

impl RawPublicKey {
    /// The `x || y` bytes as sent on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false for a key produced by this crate.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Debug for RawPublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawPublicKey({} bytes, {})", self.0.len(), fingerprint(&self.0))
    }
}

/// A local key pair. The public half is cached in raw form since it is sent on every handshake.
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
    raw_public: RawPublicKey,
}

impl KeyPair {
    pub(crate) fn new(private: PrivateKey, raw_public: RawPublicKey) -> Self {
        let public = private.public_key();
        KeyPair {
            private,
            public,
            raw_public,
        }
    }

    /// Curve of both halves.
    pub fn curve(&self) -> Curve {
        self.private.curve()
    }

    /// The private scalar, used for agreement.
    pub fn private_key(&self) -> &PrivateKey {
        &self.private
    }

    /// The public point.
    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The serialized public key, ready to be placed in a handshake frame.
    pub fn raw_public_key(&self) -> &RawPublicKey {
        &self.raw_public
    }
}

impl Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("curve", &self.curve())
            .field("public", &self.raw_public)
            .finish_non_exhaustive()
    }
}

/// Raw ECDH output: the x-coordinate of the shared point.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret(Vec<u8>);

impl SharedSecret {
    pub(crate) fn new(bytes: Vec<u8>) -> Self {
        SharedSecret(bytes)
    }

    /// The x-coordinate, big endian, [`Curve::shared_secret_len`] bytes long.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The AES-256 key for this secret: the leading 32 bytes of the x-coordinate.
    pub fn cipher_key(&self) -> Result<SymmetricKey> {
        let prefix = self
            .0
            .get(..SYMMETRIC_KEY_LENGTH)
            .ok_or(CryptoError::InvalidLength { len: self.0.len() })?;
        SymmetricKey::try_from_slice(prefix)
    }
}

impl Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SharedSecret({})", fingerprint(&self.0))
    }
}
