//! Transport message codec: one kind byte followed by the payload.

use std::fmt::Debug;

use nusbridge_crypto::RawPublicKey;

use crate::error::FrameError;

/// Message kind discriminator (1 byte)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Initiator's public key
    KeyRequest = 0x01,
    /// Responder's public key
    KeyResponse = 0x02,
    /// Encrypted application data
    Data = 0x03,
}

impl MessageKind {
    /// The kind byte on the wire.
    pub fn to_id(self) -> u8 {
        self as u8
    }

    /// Parse a kind byte. Fails with [`FrameError::UnknownType`] for anything but 1 to 3.
    pub fn from_id(id: u8) -> Result<Self, FrameError> {
        match id {
            0x01 => Ok(MessageKind::KeyRequest),
            0x02 => Ok(MessageKind::KeyResponse),
            0x03 => Ok(MessageKind::Data),
            _ => Err(FrameError::UnknownType(id)),
        }
    }

    /// KEY_REQUEST or KEY_RESPONSE.
    pub fn is_handshake(self) -> bool {
        matches!(self, MessageKind::KeyRequest | MessageKind::KeyResponse)
    }
}

/// A single transport message.
///
/// Payload length rules (public key size for handshakes, block alignment for data) are enforced
/// by the consumers, not by the codec.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    kind: MessageKind,
    payload: Vec<u8>,
}

impl Frame {
    /// Frame with an arbitrary kind and payload.
    pub fn new(kind: MessageKind, payload: Vec<u8>) -> Self {
        Frame { kind, payload }
    }

    /// KEY_REQUEST carrying the initiator's public key.
    pub fn key_request(public_key: &RawPublicKey) -> Self {
        Self::new(MessageKind::KeyRequest, public_key.as_bytes().to_vec())
    }

    /// KEY_RESPONSE carrying the responder's public key.
    pub fn key_response(public_key: &RawPublicKey) -> Self {
        Self::new(MessageKind::KeyResponse, public_key.as_bytes().to_vec())
    }

    /// DATA frame carrying ciphertext.
    pub fn data(ciphertext: Vec<u8>) -> Self {
        Self::new(MessageKind::Data, ciphertext)
    }

    /// Kind of this frame.
    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Everything after the kind byte.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Size on the wire, header included.
    pub fn encoded_len(&self) -> usize {
        1 + self.payload.len()
    }

    /// Encode to wire format: kind byte, then payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.push(self.kind.to_id());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Decode from wire format. Only the kind byte is validated.
    pub fn decode(data: &[u8]) -> Result<Self, FrameError> {
        let (&kind, payload) = data.split_first().ok_or(FrameError::Empty)?;
        Ok(Frame {
            kind: MessageKind::from_id(kind)?,
            payload: payload.to_vec(),
        })
    }
}

impl Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("kind", &self.kind)
            .field("payload_len", &self.payload.len())
            .finish()
    }
}
