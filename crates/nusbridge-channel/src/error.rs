use nusbridge_crypto::CryptoError;
use thiserror::Error;

/// A transport message that cannot be split into kind and payload.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FrameError {
    /// Not even a kind byte.
    #[error("Empty message")]
    Empty,

    /// The kind byte is not a known [`MessageKind`](crate::MessageKind).
    #[error("Unknown message type: {0:#04x}")]
    UnknownType(u8),
}

/// Errors from the key exchange. None of them change the handshake state.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandshakeError {
    /// A non-handshake frame was passed to the coordinator.
    #[error("Unknown message type: {0:#04x}")]
    UnknownType(u8),

    /// Handshake payload is not exactly one serialized public key.
    #[error("Invalid handshake payload length: expected {expected}, got {actual}")]
    InvalidLength {
        /// Public key length of the configured curve.
        expected: usize,
        /// Payload length received.
        actual: usize,
    },

    /// The payload does not decode to a point on the configured curve.
    #[error("Peer public key is not a valid curve point")]
    InvalidEncoding,

    /// The peer key and the local key pair are on different curves.
    #[error("Peer public key is on a different curve")]
    CurveMismatch,

    /// No local key pair was available and generating one failed.
    #[error("Local key pair generation failed")]
    KeyGeneration,

    /// [`initiate`](crate::HandshakeCoordinator::initiate) was called on an established session.
    #[error("Handshake already established")]
    AlreadyEstablished,

    /// No KEY_RESPONSE arrived within the configured timeout.
    #[error("Handshake timed out")]
    Timeout,
}

/// Invalid device configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The device identifier is the empty string.
    #[error("Device identifier must not be empty")]
    DeviceIdentifierEmpty,

    /// The device identifier does not fit its storage slot.
    #[error("Device identifier is {len} bytes, at most {max} are allowed")]
    DeviceIdentifierTooLong {
        /// Identifier length in bytes.
        len: usize,
        /// Longest identifier allowed.
        max: usize,
    },

    /// The stored static key is not an AES-256 key.
    #[error("Static key must be 32 bytes, got {len}")]
    InvalidStaticKeyLength {
        /// Stored key length in bytes.
        len: usize,
    },
}

/// Errors surfaced by [`SecureChannel`](crate::SecureChannel).
///
/// Everything except [`ChannelError::TransportFatal`] is local to one message. The session
/// survives, though a failed handshake send restarts its handshake.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChannelError {
    /// A handshake message was rejected.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Key agreement or the data cipher failed.
    #[error(transparent)]
    Crypto(#[from] CryptoError),

    /// The configuration store holds invalid values.
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    /// A data message arrived before the handshake completed.
    #[error("Secure channel not established")]
    NotEstablished,

    /// Unknown kind byte, with the legacy data fallback disabled.
    #[error("Unknown message type: {0:#04x}")]
    UnknownType(u8),

    /// An empty transport message or an empty plaintext.
    #[error("Empty message")]
    EmptyMessage,

    /// The connection has no session, or there is no active connection to send on.
    #[error("No session for this connection")]
    NoSession,

    /// Every session slot is taken.
    #[error("Session table is full")]
    SessionTableFull,

    /// The plaintext does not fit one DATA frame at the current payload size.
    #[error("Payload of {len} bytes exceeds the {max} bytes that fit one frame")]
    PayloadTooLarge {
        /// Plaintext length in bytes.
        len: usize,
        /// Longest plaintext that fits.
        max: usize,
    },

    /// Base64 payload encoding is configured and the decrypted bytes are not base64.
    #[error("Decrypted payload is not valid base64")]
    InvalidPayloadEncoding,

    /// The transport stayed busy for every attempt. Retry later.
    #[error("Transport busy")]
    TransportBusy,

    /// The transport failed permanently. The session has been torn down.
    #[error("Transport failed: {0}")]
    TransportFatal(String),
}

impl From<FrameError> for ChannelError {
    fn from(value: FrameError) -> Self {
        match value {
            FrameError::Empty => ChannelError::EmptyMessage,
            FrameError::UnknownType(id) => ChannelError::UnknownType(id),
        }
    }
}
