//! AES-256-CBC cipher context with the legacy padding convention.
//!
//! Plaintext is padded with [`PAD_BYTE`] up to the next block boundary. The padding always adds
//! at least one byte, so a block aligned plaintext grows by a full block. The receiver recovers
//! the message by trimming trailing control bytes, see [`strip_trailing_control`]. This only
//! works for payloads that do not themselves end in bytes below `0x20`.

use cbc::cipher::{block_padding::NoPadding, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::{CryptoRng, RngCore};
use zeroize::Zeroize;

use crate::{CryptoError, Result, SymmetricKey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size in bytes. Ciphertext lengths are always a multiple of it.
pub const BLOCK_SIZE: usize = 16;
/// CBC initialization vector size in bytes.
pub const IV_SIZE: usize = 16;

/// Fill byte for the final block. Existing peers strip it by treating anything below `0x20` as
/// padding.
pub const PAD_BYTE: u8 = 0x04;

/// Size of the per-context scratch buffer. Bounds both plaintext and ciphertext.
pub const SCRATCH_SIZE: usize = 256;

/// Longest plaintext that still fits [`SCRATCH_SIZE`] once padded.
pub const MAX_PLAINTEXT_LEN: usize = SCRATCH_SIZE - 1;

/// The fixed IV legacy peers use for every message.
pub const ZERO_IV: [u8; IV_SIZE] = [0; IV_SIZE];

/// Length of `len` plaintext bytes after padding.
pub const fn padded_len(len: usize) -> usize {
    (len / BLOCK_SIZE + 1) * BLOCK_SIZE
}

/// Trim trailing bytes below the space character.
pub fn strip_trailing_control(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|&b| b >= b' ')
        .map_or(0, |last| last + 1);
    &bytes[..end]
}

/// AES-256-CBC with a fixed key and IV.
///
/// Each context owns its scratch buffer; it is wiped after every operation and on drop.
pub struct CipherContext {
    key: SymmetricKey,
    iv: [u8; IV_SIZE],
    scratch: [u8; SCRATCH_SIZE],
}

impl CipherContext {
    /// Set up the cipher with the given key and IV.
    ///
    /// Reusing one IV for many messages under the same key is insecure: equal plaintext prefixes
    /// produce equal ciphertext prefixes. Only use a fixed IV where an existing peer requires it.
    pub fn configure(key: SymmetricKey, iv: [u8; IV_SIZE]) -> Self {
        CipherContext {
            key,
            iv,
            scratch: [0; SCRATCH_SIZE],
        }
    }

    /// Set up the cipher with the all-zero IV expected by legacy peers.
    pub fn with_zero_iv(key: SymmetricKey) -> Self {
        Self::configure(key, ZERO_IV)
    }

    /// The IV used by the next operation.
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Replace the IV used by subsequent operations.
    pub fn set_iv(&mut self, iv: [u8; IV_SIZE]) {
        self.iv = iv;
    }

    /// Draw a fresh IV from `rng` for subsequent operations and return it, so it can be sent
    /// along with the ciphertext.
    ///
    /// Fails with [`CryptoError::Randomness`] if the RNG reports an error. The previous IV is
    /// kept in that case.
    pub fn randomize_iv<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<[u8; IV_SIZE]> {
        let mut iv = [0u8; IV_SIZE];
        rng.try_fill_bytes(&mut iv).map_err(|_| CryptoError::Randomness)?;
        self.iv = iv;
        Ok(iv)
    }

    /// Pad and encrypt. The output length is [`padded_len`] of the input length.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        if plaintext.is_empty() {
            return Err(CryptoError::InvalidLength { len: 0 });
        }
        if plaintext.len() > MAX_PLAINTEXT_LEN {
            return Err(CryptoError::PlaintextTooLong {
                len: plaintext.len(),
                max: MAX_PLAINTEXT_LEN,
            });
        }

        let len = padded_len(plaintext.len());
        self.scratch.fill(PAD_BYTE);
        self.scratch[..plaintext.len()].copy_from_slice(plaintext);

        let result = Aes256CbcEnc::new_from_slices(self.key.as_bytes(), &self.iv)
            .map_err(|_| CryptoError::InvalidLength { len })
            .and_then(|cipher| {
                cipher
                    .encrypt_padded_mut::<NoPadding>(&mut self.scratch[..len], len)
                    .map(|ciphertext| ciphertext.to_vec())
                    .map_err(|_| CryptoError::InvalidLength { len })
            });

        self.scratch.zeroize();
        result
    }

    /// Decrypt a block aligned ciphertext. Padding is left in place for the caller to strip.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let len = ciphertext.len();
        if len == 0 || len % BLOCK_SIZE != 0 || len > SCRATCH_SIZE {
            return Err(CryptoError::InvalidLength { len });
        }

        self.scratch[..len].copy_from_slice(ciphertext);

        let result = Aes256CbcDec::new_from_slices(self.key.as_bytes(), &self.iv)
            .map_err(|_| CryptoError::InvalidLength { len })
            .and_then(|cipher| {
                cipher
                    .decrypt_padded_mut::<NoPadding>(&mut self.scratch[..len])
                    .map(|plaintext| plaintext.to_vec())
                    .map_err(|_| CryptoError::InvalidLength { len })
            });

        self.scratch.zeroize();
        result
    }
}

impl Drop for CipherContext {
    fn drop(&mut self) {
        self.scratch.zeroize();
        self.iv.zeroize();
    }
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherContext")
            .field("key", &self.key)
            .field("zero_iv", &(self.iv == ZERO_IV))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    struct ExhaustedRng;

    impl RngCore for ExhaustedRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
            Err(rand::Error::new("entropy source unavailable"))
        }
    }

    impl CryptoRng for ExhaustedRng {}

    fn pad(plaintext: &[u8]) -> Vec<u8> {
        let mut padded = plaintext.to_vec();
        padded.resize(padded_len(plaintext.len()), PAD_BYTE);
        padded
    }

    fn context() -> CipherContext {
        CipherContext::with_zero_iv(SymmetricKey::from_bytes(*b"NORDIC SEMICONDUCTORAES&MAC TEST"))
    }

    #[test]
    fn test_padded_len() {
        assert_eq!(padded_len(1), 16);
        assert_eq!(padded_len(15), 16);
        assert_eq!(padded_len(16), 32);
        assert_eq!(padded_len(17), 32);
        assert_eq!(padded_len(MAX_PLAINTEXT_LEN), SCRATCH_SIZE);
    }

    #[test]
    fn test_decrypt_of_encrypt_is_padded_plaintext() {
        let mut cipher = context();
        for len in [1, 5, 15, 16, 17, 31, 32, 100, 243, MAX_PLAINTEXT_LEN] {
            let plaintext: Vec<u8> = (0..len).map(|i| b'A' + (i % 26) as u8).collect();
            let ciphertext = cipher.encrypt(&plaintext).expect("should encrypt");
            assert_eq!(ciphertext.len(), padded_len(len));
            assert_ne!(&ciphertext[..len.min(16)], &plaintext[..len.min(16)]);

            let decrypted = cipher.decrypt(&ciphertext).expect("should decrypt");
            assert_eq!(decrypted, pad(&plaintext));
            assert_eq!(strip_trailing_control(&decrypted), plaintext.as_slice());
        }
    }

    #[test]
    fn test_zero_iv_is_deterministic() {
        let mut cipher = context();
        let first = cipher.encrypt(b"HELLO").expect("should encrypt");
        let second = cipher.encrypt(b"HELLO").expect("should encrypt");
        assert_eq!(first, second);
    }

    #[test]
    fn test_iv_changes_ciphertext() {
        let mut cipher = context();
        let zero = cipher.encrypt(b"HELLO").expect("should encrypt");
        cipher.set_iv([9; IV_SIZE]);
        let other = cipher.encrypt(b"HELLO").expect("should encrypt");
        assert_ne!(zero, other);
        assert_eq!(
            strip_trailing_control(&cipher.decrypt(&other).expect("should decrypt")),
            b"HELLO"
        );
    }

    #[test]
    fn test_randomize_iv() {
        let mut cipher = context();
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let first = cipher.randomize_iv(&mut rng).expect("should draw");
        assert_eq!(cipher.iv(), &first);
        let second = cipher.randomize_iv(&mut rng).expect("should draw");
        assert_ne!(first, second);
        assert_ne!(first, ZERO_IV);
    }

    #[test]
    fn test_randomize_iv_rng_failure() {
        let mut cipher = context();
        cipher.set_iv([7; IV_SIZE]);
        assert_eq!(
            cipher.randomize_iv(&mut ExhaustedRng),
            Err(CryptoError::Randomness)
        );
        assert_eq!(cipher.iv(), &[7; IV_SIZE]);
    }

    #[test]
    fn test_decrypt_rejects_unaligned_length() {
        let mut cipher = context();
        for len in [1, 15, 17, 33, 255] {
            assert_eq!(
                cipher.decrypt(&vec![0u8; len]),
                Err(CryptoError::InvalidLength { len })
            );
        }
        assert_eq!(cipher.decrypt(&[]), Err(CryptoError::InvalidLength { len: 0 }));
        assert_eq!(
            cipher.decrypt(&[0u8; SCRATCH_SIZE + BLOCK_SIZE]),
            Err(CryptoError::InvalidLength {
                len: SCRATCH_SIZE + BLOCK_SIZE
            })
        );
    }

    #[test]
    fn test_encrypt_rejects_empty_and_oversized() {
        let mut cipher = context();
        assert_eq!(cipher.encrypt(&[]), Err(CryptoError::InvalidLength { len: 0 }));
        assert_eq!(
            cipher.encrypt(&[b'x'; SCRATCH_SIZE]),
            Err(CryptoError::PlaintextTooLong {
                len: SCRATCH_SIZE,
                max: MAX_PLAINTEXT_LEN
            })
        );
    }

    #[test]
    fn test_wrong_key_does_not_recover_plaintext() {
        let mut sender = context();
        let mut receiver = CipherContext::with_zero_iv(SymmetricKey::from_bytes([1; 32]));
        let ciphertext = sender.encrypt(b"HELLO").expect("should encrypt");
        let decrypted = receiver.decrypt(&ciphertext).expect("length is valid");
        assert_ne!(strip_trailing_control(&decrypted), b"HELLO");
    }

    #[test]
    fn test_strip_trailing_control() {
        assert_eq!(strip_trailing_control(b"abc\x04\x04\x04"), b"abc");
        assert_eq!(strip_trailing_control(b"abc\r\n\x04"), b"abc");
        assert_eq!(strip_trailing_control(b"a\x01b\x04"), b"a\x01b");
        assert_eq!(strip_trailing_control(b"\x04\x04"), b"");
        assert_eq!(strip_trailing_control(b""), b"");
        assert_eq!(strip_trailing_control(b"abc "), b"abc ");
    }
}
