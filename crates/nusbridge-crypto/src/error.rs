use thiserror::Error;

use crate::Curve;

/// Errors raised by the key agreement and cipher primitives.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The bytes do not decode to a valid point on the configured curve.
    #[error("Public key does not decode to a valid curve point")]
    InvalidEncoding,

    /// Ciphertext is empty, not block aligned, or larger than the cipher buffer.
    #[error("Invalid length: {len} bytes")]
    InvalidLength {
        /// Length that was rejected.
        len: usize,
    },

    /// Private and public key belong to different curves.
    #[error("Curve mismatch: private key on {private}, public key on {public}")]
    CurveMismatch {
        /// Curve of the private key.
        private: Curve,
        /// Curve of the public key.
        public: Curve,
    },

    /// The entropy source failed while generating a key pair.
    #[error("Key generation failed")]
    KeyGeneration,

    /// The entropy source failed while drawing a random IV.
    #[error("Random number generator failed")]
    Randomness,

    /// Plaintext does not fit the cipher buffer once padded.
    #[error("Plaintext too long: {len} bytes, at most {max} fit")]
    PlaintextTooLong {
        /// Plaintext length in bytes.
        len: usize,
        /// Longest accepted plaintext.
        max: usize,
    },
}

pub(crate) type Result<T, E = CryptoError> = std::result::Result<T, E>;
