#![doc = include_str!("../README.md")]

mod cipher;
pub use cipher::{
    padded_len, strip_trailing_control, CipherContext, BLOCK_SIZE, IV_SIZE, MAX_PLAINTEXT_LEN,
    PAD_BYTE, SCRATCH_SIZE, ZERO_IV,
};
mod curve;
pub use curve::Curve;
mod ecdh;
pub use ecdh::CryptoProvider;
mod error;
pub(crate) use error::Result;
pub use error::CryptoError;
mod keys;
pub use keys::{
    KeyPair, PrivateKey, PublicKey, RawPublicKey, SharedSecret, SymmetricKey,
    SYMMETRIC_KEY_LENGTH,
};
