//! Elliptic-curve Diffie-Hellman over the configured NIST curve.
//!
//! Public keys travel as raw `x || y` coordinates. Decoding re-attaches the SEC1 uncompressed
//! tag and runs the full point validation of the curve crate, so a peer cannot hand us a point
//! that is off the curve or the identity.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use rand::{rngs::OsRng, CryptoRng, RngCore};
use tracing::{debug, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    keys::{PrivateKeyInner, PublicKeyInner},
    Curve, CryptoError, KeyPair, PrivateKey, PublicKey, RawPublicKey, Result, SharedSecret,
};

/// SEC1 tag for an uncompressed point.
const SEC1_UNCOMPRESSED_TAG: u8 = 0x04;

/// Scalars drawn outside `[1, n)` are rejected and redrawn. The chance of needing even a second
/// attempt is below 2^-32 on both curves.
const MAX_SCALAR_ATTEMPTS: usize = 8;

/// Key agreement for a single curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoProvider {
    curve: Curve,
}

impl CryptoProvider {
    /// Provider for keys on `curve`.
    pub fn new(curve: Curve) -> Self {
        CryptoProvider { curve }
    }

    /// The curve every key of this provider lives on.
    pub fn curve(&self) -> Curve {
        self.curve
    }

    /// Generate a fresh key pair from the operating system's entropy source.
    pub fn generate_keypair(&self) -> Result<KeyPair> {
        self.generate_keypair_with_rng(&mut OsRng)
    }

    /// Generate a key pair from the given RNG.
    ///
    /// Fails with [`CryptoError::KeyGeneration`] only when the RNG reports an error.
    #[instrument(level = "debug", skip(rng), fields(curve = %self.curve))]
    pub fn generate_keypair_with_rng<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<KeyPair> {
        let mut scalar = Zeroizing::new(vec![0u8; self.curve.field_len()]);

        for _ in 0..MAX_SCALAR_ATTEMPTS {
            rng.try_fill_bytes(&mut scalar).map_err(|e| {
                warn!("Entropy source failed: {e}");
                CryptoError::KeyGeneration
            })?;

            if let Ok(keypair) = self.keypair_from_scalar(&scalar) {
                debug!("Generated key pair");
                return Ok(keypair);
            }
        }

        Err(CryptoError::KeyGeneration)
    }

    /// Rebuild a key pair from a big-endian private scalar, e.g. one kept across restarts.
    ///
    /// Fails with [`CryptoError::InvalidLength`] if the scalar is not the curve's field size and
    /// with [`CryptoError::InvalidEncoding`] if it is zero or not below the group order.
    pub fn keypair_from_scalar(&self, scalar: &[u8]) -> Result<KeyPair> {
        if scalar.len() != self.curve.field_len() {
            return Err(CryptoError::InvalidLength { len: scalar.len() });
        }

        let inner = match self.curve {
            Curve::P256 => p256::SecretKey::from_slice(scalar).map(PrivateKeyInner::P256),
            Curve::P384 => p384::SecretKey::from_slice(scalar).map(PrivateKeyInner::P384),
        }
        .map_err(|_| CryptoError::InvalidEncoding)?;

        let private = PrivateKey(inner);
        let raw_public = self.serialize_public(&private.public_key());
        Ok(KeyPair::new(private, raw_public))
    }

    /// Encode a public key as raw `x || y` bytes.
    ///
    /// The output length is [`Curve::public_key_len`] of the key's own curve.
    pub fn serialize_public(&self, key: &PublicKey) -> RawPublicKey {
        let encoded = match &key.0 {
            PublicKeyInner::P256(pk) => pk.to_encoded_point(false).as_bytes().to_vec(),
            PublicKeyInner::P384(pk) => pk.to_encoded_point(false).as_bytes().to_vec(),
        };
        // Uncompressed SEC1: tag byte followed by both coordinates.
        RawPublicKey(encoded.into_iter().skip(1).collect())
    }

    /// Decode raw `x || y` bytes into a validated public key on this provider's curve.
    pub fn deserialize_public(&self, bytes: &[u8]) -> Result<PublicKey> {
        if bytes.len() != self.curve.public_key_len() {
            debug!(
                expected = self.curve.public_key_len(),
                actual = bytes.len(),
                "Public key has the wrong length"
            );
            return Err(CryptoError::InvalidEncoding);
        }

        let mut sec1 = Vec::with_capacity(bytes.len() + 1);
        sec1.push(SEC1_UNCOMPRESSED_TAG);
        sec1.extend_from_slice(bytes);

        let inner = match self.curve {
            Curve::P256 => p256::PublicKey::from_sec1_bytes(&sec1).map(PublicKeyInner::P256),
            Curve::P384 => p384::PublicKey::from_sec1_bytes(&sec1).map(PublicKeyInner::P384),
        }
        .map_err(|_| CryptoError::InvalidEncoding)?;

        Ok(PublicKey(inner))
    }

    /// Raw ECDH: multiply the peer's point by our scalar and return the x-coordinate.
    pub fn compute_shared_secret(
        &self,
        private: &PrivateKey,
        public: &PublicKey,
    ) -> Result<SharedSecret> {
        let bytes = match (&private.0, &public.0) {
            (PrivateKeyInner::P256(sk), PublicKeyInner::P256(pk)) => {
                p256::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            (PrivateKeyInner::P384(sk), PublicKeyInner::P384(pk)) => {
                p384::ecdh::diffie_hellman(sk.to_nonzero_scalar(), pk.as_affine())
                    .raw_secret_bytes()
                    .to_vec()
            }
            _ => {
                return Err(CryptoError::CurveMismatch {
                    private: private.curve(),
                    public: public.curve(),
                })
            }
        };

        Ok(SharedSecret::new(bytes))
    }
}
