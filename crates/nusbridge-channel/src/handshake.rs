//! Two message ECDH handshake.
//!
//! Initiator: `NotStarted -> KeySent -> Established` (sends KEY_REQUEST, receives KEY_RESPONSE).
//! Responder: `NotStarted -> Established` on the first valid KEY_REQUEST, answering with a
//! KEY_RESPONSE.
//!
//! Once established the coordinator ignores every further handshake message for the lifetime of
//! the session. A fresh key agreement needs a new session.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use nusbridge_crypto::{CryptoProvider, KeyPair, PublicKey, RawPublicKey, SharedSecret};
use tracing::{debug, info, instrument, warn};

use crate::{
    error::HandshakeError,
    frame::{Frame, MessageKind},
};

/// Where a session is in the key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// No handshake message sent or accepted yet.
    NotStarted,
    /// Our KEY_REQUEST is out, waiting for the KEY_RESPONSE.
    KeySent,
    /// Both sides hold the shared secret.
    Established,
}

/// What the caller has to do after a handshake message was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Nothing to send.
    None,
    /// Send this frame back to the peer.
    Respond(Frame),
}

/// Progress of the exchange. Key material only exists in the established state.
enum Progress {
    NotStarted,
    KeySent { sent_at: Instant },
    Established {
        peer_public_key: PublicKey,
        shared_secret: SharedSecret,
    },
}

/// Drives the key exchange for one session.
pub struct HandshakeCoordinator {
    provider: CryptoProvider,
    local_keypair: Option<Arc<KeyPair>>,
    progress: Progress,
    timeout: Option<Duration>,
}

impl HandshakeCoordinator {
    /// Create a coordinator for one session.
    ///
    /// `local_keypair` is normally the process wide key pair. When absent, one is generated on
    /// first use and kept for the lifetime of the coordinator.
    pub fn new(provider: CryptoProvider, local_keypair: Option<Arc<KeyPair>>) -> Self {
        HandshakeCoordinator {
            provider,
            local_keypair,
            progress: Progress::NotStarted,
            timeout: None,
        }
    }

    /// Abort an initiated handshake that has not completed within `timeout`, see
    /// [`HandshakeCoordinator::check_deadline`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Current state, without any key material.
    pub fn state(&self) -> HandshakeState {
        match self.progress {
            Progress::NotStarted => HandshakeState::NotStarted,
            Progress::KeySent { .. } => HandshakeState::KeySent,
            Progress::Established { .. } => HandshakeState::Established,
        }
    }

    /// Whether the shared secret is available.
    pub fn is_established(&self) -> bool {
        matches!(self.progress, Progress::Established { .. })
    }

    /// The agreed secret, once established.
    pub fn shared_secret(&self) -> Option<&SharedSecret> {
        match &self.progress {
            Progress::Established { shared_secret, .. } => Some(shared_secret),
            _ => None,
        }
    }

    /// The peer's validated public key, once established.
    pub fn peer_public_key(&self) -> Option<&PublicKey> {
        match &self.progress {
            Progress::Established {
                peer_public_key, ..
            } => Some(peer_public_key),
            _ => None,
        }
    }

    /// Our public key, if a key pair has been supplied or generated.
    pub fn local_public_key(&self) -> Option<&RawPublicKey> {
        self.local_keypair.as_deref().map(KeyPair::raw_public_key)
    }

    /// Build a KEY_REQUEST and move to `KeySent`.
    ///
    /// Calling it again while `KeySent` builds the same request and restarts the deadline.
    #[instrument(level = "debug", skip(self))]
    pub fn initiate(&mut self) -> Result<Frame, HandshakeError> {
        if self.is_established() {
            warn!("Refusing to restart an established handshake");
            return Err(HandshakeError::AlreadyEstablished);
        }

        let keypair = self.ensure_keypair()?;
        let frame = Frame::key_request(keypair.raw_public_key());
        self.progress = Progress::KeySent {
            sent_at: Instant::now(),
        };
        debug!("Key request built");
        Ok(frame)
    }

    /// Process a handshake message from the peer.
    #[instrument(level = "debug", skip(self, frame), fields(kind = ?frame.kind()))]
    pub fn on_receive(&mut self, frame: &Frame) -> Result<Action, HandshakeError> {
        if !frame.kind().is_handshake() {
            return Err(HandshakeError::UnknownType(frame.kind().to_id()));
        }

        if self.is_established() {
            debug!("Handshake already established, ignoring");
            return Ok(Action::None);
        }

        let (peer_public_key, shared_secret) = self.agree(frame.payload())?;
        let keypair = self.ensure_keypair()?;
        self.progress = Progress::Established {
            peer_public_key,
            shared_secret,
        };

        match frame.kind() {
            MessageKind::KeyRequest => {
                info!("Handshake established as responder");
                Ok(Action::Respond(Frame::key_response(keypair.raw_public_key())))
            }
            _ => {
                info!("Handshake established as initiator");
                Ok(Action::None)
            }
        }
    }

    /// Fail with [`HandshakeError::Timeout`] and fall back to `NotStarted` if a KEY_REQUEST has
    /// been outstanding for longer than the configured timeout.
    pub fn check_deadline(&mut self, now: Instant) -> Result<(), HandshakeError> {
        let (Some(timeout), Progress::KeySent { sent_at }) = (self.timeout, &self.progress) else {
            return Ok(());
        };

        if now.saturating_duration_since(*sent_at) >= timeout {
            warn!(?timeout, "Handshake timed out");
            self.progress = Progress::NotStarted;
            return Err(HandshakeError::Timeout);
        }
        Ok(())
    }

    /// Forget all peer state. The local key pair is kept.
    pub fn reset(&mut self) {
        self.progress = Progress::NotStarted;
    }

    fn ensure_keypair(&mut self) -> Result<Arc<KeyPair>, HandshakeError> {
        if let Some(keypair) = &self.local_keypair {
            return Ok(keypair.clone());
        }

        let keypair = Arc::new(
            self.provider
                .generate_keypair()
                .map_err(|_| HandshakeError::KeyGeneration)?,
        );
        self.local_keypair = Some(keypair.clone());
        Ok(keypair)
    }

    /// Validate the peer key and derive the shared secret, without touching any state.
    fn agree(&mut self, payload: &[u8]) -> Result<(PublicKey, SharedSecret), HandshakeError> {
        let expected = self.provider.curve().public_key_len();
        if payload.len() != expected {
            warn!(expected, actual = payload.len(), "Wrong handshake payload length");
            return Err(HandshakeError::InvalidLength {
                expected,
                actual: payload.len(),
            });
        }

        let peer_public_key = self.provider.deserialize_public(payload).map_err(|_| {
            warn!("Peer public key is not on the curve");
            HandshakeError::InvalidEncoding
        })?;

        let keypair = self.ensure_keypair()?;
        let shared_secret = self
            .provider
            .compute_shared_secret(keypair.private_key(), &peer_public_key)
            .map_err(|_| HandshakeError::CurveMismatch)?;

        Ok((peer_public_key, shared_secret))
    }
}

impl std::fmt::Debug for HandshakeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeCoordinator")
            .field("curve", &self.provider.curve())
            .field("state", &self.state())
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
