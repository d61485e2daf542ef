use std::time::Duration;

use nusbridge_crypto::{padded_len, Curve, SymmetricKey, BLOCK_SIZE, IV_SIZE, SCRATCH_SIZE};
use serde::{Deserialize, Serialize};

use crate::{error::ConfigurationError, traits::ConfigurationStore};

/// Longest device identifier the storage slot holds (16 bytes including the terminator).
pub const DEVICE_IDENTIFIER_MAX_LEN: usize = 15;

/// Payload size to assume before the transport reports one: the default BLE ATT MTU of 23 minus
/// the 3 byte ATT header.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 20;

/// Device configuration as persisted by the storage collaborator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DeviceConfigurationRepr")]
pub struct DeviceConfiguration {
    device_identifier: String,
    static_key: SymmetricKey,
}

#[derive(Deserialize)]
struct DeviceConfigurationRepr {
    device_identifier: String,
    static_key: SymmetricKey,
}

impl TryFrom<DeviceConfigurationRepr> for DeviceConfiguration {
    type Error = ConfigurationError;

    fn try_from(value: DeviceConfigurationRepr) -> Result<Self, Self::Error> {
        DeviceConfiguration::new(value.device_identifier, value.static_key)
    }
}

impl DeviceConfiguration {
    /// Validate and wrap the stored values.
    pub fn new(
        device_identifier: impl Into<String>,
        static_key: SymmetricKey,
    ) -> Result<Self, ConfigurationError> {
        let device_identifier = device_identifier.into();
        if device_identifier.is_empty() {
            return Err(ConfigurationError::DeviceIdentifierEmpty);
        }
        if device_identifier.len() > DEVICE_IDENTIFIER_MAX_LEN {
            return Err(ConfigurationError::DeviceIdentifierTooLong {
                len: device_identifier.len(),
                max: DEVICE_IDENTIFIER_MAX_LEN,
            });
        }

        Ok(DeviceConfiguration {
            device_identifier,
            static_key,
        })
    }

    /// Build from a key slice as read from storage.
    pub fn from_key_slice(
        device_identifier: impl Into<String>,
        static_key: &[u8],
    ) -> Result<Self, ConfigurationError> {
        let static_key = SymmetricKey::try_from_slice(static_key).map_err(|_| {
            ConfigurationError::InvalidStaticKeyLength {
                len: static_key.len(),
            }
        })?;
        Self::new(device_identifier, static_key)
    }

    /// Snapshot a store. Called once, when the channel is created.
    pub fn load(store: &impl ConfigurationStore) -> Result<Self, ConfigurationError> {
        Self::new(store.device_identifier(), store.static_key())
    }

    /// The validated device identifier.
    pub fn device_identifier(&self) -> &str {
        &self.device_identifier
    }

    /// The static key for legacy outbound data.
    pub fn static_key(&self) -> &SymmetricKey {
        &self.static_key
    }
}

impl ConfigurationStore for DeviceConfiguration {
    fn static_key(&self) -> SymmetricKey {
        self.static_key.clone()
    }

    fn device_identifier(&self) -> String {
        self.device_identifier.clone()
    }
}

/// IV handling for DATA frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IvMode {
    /// All-zero IV on every message. Required by existing peers, but leaks equal prefixes
    /// between messages.
    #[default]
    Zero,
    /// A fresh random IV per message, sent as the first 16 bytes of the DATA payload.
    RandomPrefixed,
}

/// Key used to encrypt outbound DATA frames. Inbound frames always use the ECDH secret.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKey {
    /// The key both sides derived from the handshake.
    #[default]
    SharedSecret,
    /// The configured static key, for peers that expect the asymmetric legacy scheme.
    StaticKey,
}

/// Encoding applied to plaintext before encryption.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadEncoding {
    /// Plaintext is encrypted as is.
    #[default]
    Raw,
    /// Standard base64, as produced and expected by legacy peers.
    Base64,
}

/// Behaviour switches of a [`SecureChannel`](crate::SecureChannel). Missing fields take their
/// default when deserialized.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    /// Curve for the key agreement. Both peers must use the same one.
    pub curve: Curve,
    /// IV handling for DATA frames.
    pub iv_mode: IvMode,
    /// Key for outbound DATA frames.
    pub outbound_key: OutboundKey,
    /// Encoding applied before encryption and removed after decryption.
    pub payload_encoding: PayloadEncoding,
    /// Decrypt messages with an unknown kind byte as headerless ciphertext.
    pub legacy_data_fallback: bool,
    /// Attempts per transport send while the transport reports busy.
    pub max_send_attempts: u32,
    /// Give up on an unanswered KEY_REQUEST after this many milliseconds. `None` waits forever.
    pub handshake_timeout_ms: Option<u64>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        ChannelSettings {
            curve: Curve::P256,
            iv_mode: IvMode::Zero,
            outbound_key: OutboundKey::SharedSecret,
            payload_encoding: PayloadEncoding::Raw,
            legacy_data_fallback: true,
            max_send_attempts: 8,
            handshake_timeout_ms: None,
        }
    }
}

impl ChannelSettings {
    /// Settings matching deployed firmware peers: zero IV, static outbound key and base64
    /// payloads.
    pub fn legacy() -> Self {
        ChannelSettings {
            outbound_key: OutboundKey::StaticKey,
            payload_encoding: PayloadEncoding::Base64,
            ..Default::default()
        }
    }

    /// [`ChannelSettings::handshake_timeout_ms`] as a duration.
    pub fn handshake_timeout(&self) -> Option<Duration> {
        self.handshake_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn send_attempts(&self) -> u32 {
        self.max_send_attempts.max(1)
    }

    /// Longest plaintext whose DATA frame fits in `max_payload_size` bytes.
    ///
    /// Accounts for the kind byte, the random IV prefix, padding (at least one byte) and base64
    /// expansion, and never exceeds the cipher scratch buffer.
    pub fn plaintext_budget(&self, max_payload_size: usize) -> usize {
        let iv_len = match self.iv_mode {
            IvMode::Zero => 0,
            IvMode::RandomPrefixed => IV_SIZE,
        };
        let room = max_payload_size.saturating_sub(1 + iv_len).min(SCRATCH_SIZE);
        let padded = room / BLOCK_SIZE * BLOCK_SIZE;
        let Some(encoded) = padded.checked_sub(1) else {
            return 0;
        };
        debug_assert!(encoded == 0 || padded_len(encoded) == padded);

        match self.payload_encoding {
            PayloadEncoding::Raw => encoded,
            PayloadEncoding::Base64 => encoded / 4 * 3,
        }
    }
}
