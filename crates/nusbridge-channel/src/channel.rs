use std::{sync::Arc, time::Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use nusbridge_crypto::{
    strip_trailing_control, CryptoError, CryptoProvider, KeyPair, RawPublicKey, IV_SIZE,
};
use rand::rngs::OsRng;
use tracing::{debug, info, instrument, trace, warn};

use crate::{
    assembler::FrameAssembler,
    config::{
        ChannelSettings, DeviceConfiguration, IvMode, PayloadEncoding, DEFAULT_MAX_PAYLOAD_SIZE,
    },
    error::{ChannelError, FrameError},
    frame::{Frame, MessageKind},
    handshake::{Action, HandshakeCoordinator, HandshakeState},
    session::{ConnectionId, Session, SessionTable},
    traits::{ConfigurationStore, PlaintextSink, SendFailure, Transport},
};

/// What an inbound transport message did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A KEY_REQUEST was accepted and answered with a KEY_RESPONSE.
    HandshakeResponded,
    /// A KEY_RESPONSE completed a handshake this side initiated.
    HandshakeCompleted,
    /// A handshake message arrived on an established session and was dropped.
    HandshakeIgnored,
    /// Decrypted plaintext, already passed to the sink.
    Delivered(Vec<u8>),
}

/// What [`SecureChannel::send_plaintext`] did with the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The payload went out as a DATA frame.
    Sent,
    /// No session key yet. A KEY_REQUEST was sent and the payload was dropped.
    HandshakeInitiated,
    /// A KEY_REQUEST was already outstanding. It was sent again and the payload was dropped.
    HandshakePending,
}

/// Secure channel over a message transport.
///
/// All entry points are expected to be called from one event loop. Each inbound error is local
/// to its message: it is returned to the caller and leaves the session as it was, with two
/// exceptions. [`ChannelError::TransportFatal`] removes the session, and a handshake frame that
/// could not be sent puts the handshake back to `NotStarted`.
pub struct SecureChannel<T: Transport, K: PlaintextSink> {
    settings: ChannelSettings,
    configuration: DeviceConfiguration,
    provider: CryptoProvider,
    local_keypair: Arc<KeyPair>,
    sessions: SessionTable<Session>,
    outbound_assembler: FrameAssembler,
    transport: T,
    sink: K,
}

impl<T: Transport, K: PlaintextSink> SecureChannel<T, K> {
    /// Read the configuration once and generate the process key pair.
    pub fn new(
        store: &impl ConfigurationStore,
        settings: ChannelSettings,
        transport: T,
        sink: K,
    ) -> Result<Self, ChannelError> {
        let keypair = CryptoProvider::new(settings.curve).generate_keypair()?;
        Self::with_keypair(store, settings, keypair, transport, sink)
    }

    /// Like [`SecureChannel::new`], with a caller supplied key pair.
    pub fn with_keypair(
        store: &impl ConfigurationStore,
        settings: ChannelSettings,
        keypair: KeyPair,
        transport: T,
        sink: K,
    ) -> Result<Self, ChannelError> {
        if keypair.curve() != settings.curve {
            return Err(CryptoError::CurveMismatch {
                private: keypair.curve(),
                public: settings.curve,
            }
            .into());
        }

        let configuration = DeviceConfiguration::load(store)?;
        let outbound_limit = settings.plaintext_budget(DEFAULT_MAX_PAYLOAD_SIZE);
        info!(
            device = configuration.device_identifier(),
            curve = %settings.curve,
            "Secure channel created"
        );

        Ok(SecureChannel {
            provider: CryptoProvider::new(settings.curve),
            settings,
            configuration,
            local_keypair: Arc::new(keypair),
            sessions: SessionTable::new(),
            outbound_assembler: FrameAssembler::new(outbound_limit),
            transport,
            sink,
        })
    }

    /// Settings the channel was created with.
    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Configuration snapshot taken at creation.
    pub fn configuration(&self) -> &DeviceConfiguration {
        &self.configuration
    }

    /// Public key new sessions send in their handshake.
    pub fn local_public_key(&self) -> &RawPublicKey {
        self.local_keypair.raw_public_key()
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Mutable access to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The plaintext sink.
    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Mutable access to the plaintext sink.
    pub fn sink_mut(&mut self) -> &mut K {
        &mut self.sink
    }

    /// Session state of `connection`.
    pub fn session(&self, connection: ConnectionId) -> Option<&Session> {
        self.sessions.get(connection)
    }

    /// `None` when the connection has no session.
    pub fn handshake_state(&self, connection: ConnectionId) -> Option<HandshakeState> {
        self.sessions.get(connection).map(Session::state)
    }

    /// The connection outbound data goes to.
    pub fn active_connection(&self) -> Option<ConnectionId> {
        self.sessions.active().next()
    }

    /// Start a fresh session. A session left over for the same connection is replaced.
    #[instrument(level = "debug", skip(self), fields(connection = %connection))]
    pub fn on_connect(&mut self, connection: ConnectionId) -> Result<(), ChannelError> {
        let handshake =
            HandshakeCoordinator::new(self.provider, Some(self.local_keypair.clone()))
                .with_timeout(self.settings.handshake_timeout());
        let max_payload_size = self.transport.max_payload_size(connection);
        self.sessions.insert(
            connection,
            Session::new(connection, handshake, max_payload_size),
        )?;
        self.refresh_payload_limits();
        info!(max_payload_size, "Connected");
        Ok(())
    }

    /// Drop the session and all key material derived for it. Returns whether there was one.
    #[instrument(level = "debug", skip(self), fields(connection = %connection))]
    pub fn on_disconnect(&mut self, connection: ConnectionId) -> bool {
        let removed = self.sessions.remove(connection).is_some();
        if removed {
            self.outbound_assembler.clear();
            info!("Disconnected, session dropped");
        } else {
            debug!("Disconnect for unknown connection");
        }
        removed
    }

    /// Re-read the negotiated payload sizes, e.g. after an MTU exchange.
    pub fn refresh_payload_limits(&mut self) {
        for (connection, session) in self.sessions.iter_mut() {
            session
                .inbound_assembler_mut()
                .set_limit(self.transport.max_payload_size(connection));
        }

        let max_payload_size = self
            .active_connection()
            .map_or(DEFAULT_MAX_PAYLOAD_SIZE, |connection| {
                self.transport.max_payload_size(connection)
            });
        let budget = self.settings.plaintext_budget(max_payload_size);
        self.outbound_assembler.set_limit(budget);
        debug!(max_payload_size, budget, "Payload limits refreshed");
    }

    /// Generate a new local key pair. Sessions that already exist keep the old one.
    pub fn reinitialize_keypair(&mut self) -> Result<(), ChannelError> {
        self.local_keypair = Arc::new(self.provider.generate_keypair()?);
        info!("Local key pair regenerated");
        Ok(())
    }

    /// Expire handshakes that have been waiting for a KEY_RESPONSE past the configured timeout.
    ///
    /// Expired sessions fall back to `NotStarted`.
    pub fn poll(&mut self, now: Instant) -> Result<(), ChannelError> {
        let mut result = Ok(());
        for (connection, session) in self.sessions.iter_mut() {
            if let Err(e) = session.handshake_mut().check_deadline(now) {
                warn!(connection = %connection, "Handshake expired");
                session.reset();
                result = Err(e.into());
            }
        }
        result
    }

    /// Feed a raw chunk from the transport through the inbound assembler and handle every frame
    /// it completes.
    pub fn on_transport_bytes(
        &mut self,
        connection: ConnectionId,
        chunk: &[u8],
    ) -> Vec<Result<Inbound, ChannelError>> {
        let Some(session) = self.sessions.get_mut(connection) else {
            return vec![Err(ChannelError::NoSession)];
        };

        session
            .inbound_assembler_mut()
            .push(chunk)
            .into_iter()
            .map(|message| self.on_transport_message(connection, &message))
            .collect()
    }

    /// Handle one complete transport message.
    #[instrument(
        level = "debug",
        skip(self, message),
        fields(connection = %connection, len = message.len())
    )]
    pub fn on_transport_message(
        &mut self,
        connection: ConnectionId,
        message: &[u8],
    ) -> Result<Inbound, ChannelError> {
        if !self.sessions.contains(connection) {
            return Err(ChannelError::NoSession);
        }

        let result = match Frame::decode(message) {
            Ok(frame) if frame.kind() == MessageKind::Data => {
                self.receive_data(connection, frame.payload())
            }
            Ok(frame) => self.receive_handshake(connection, frame),
            Err(FrameError::UnknownType(id)) => self.receive_unknown(connection, id, message),
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &result {
            warn!(error = %e, "Inbound message rejected");
        }
        result
    }

    /// Feed locally produced bytes through the outbound assembler and send every run it
    /// completes.
    pub fn on_input_bytes(&mut self, chunk: &[u8]) -> Vec<Result<SendOutcome, ChannelError>> {
        self.outbound_assembler
            .push(chunk)
            .into_iter()
            .map(|run| self.send_plaintext(&run))
            .collect()
    }

    /// Encrypt and send `plaintext` on the active connection.
    ///
    /// Before the handshake is established the payload is dropped and a KEY_REQUEST goes out
    /// instead, also when one is already outstanding, so a lost request or response is
    /// recovered by the next send. The caller has to send the payload again once the handshake
    /// completes.
    #[instrument(level = "debug", skip(self, plaintext), fields(len = plaintext.len()))]
    pub fn send_plaintext(&mut self, plaintext: &[u8]) -> Result<SendOutcome, ChannelError> {
        let connection = self.active_connection().ok_or(ChannelError::NoSession)?;
        self.send_plaintext_to(connection, plaintext)
    }

    /// Like [`SecureChannel::send_plaintext`], on a given connection.
    pub fn send_plaintext_to(
        &mut self,
        connection: ConnectionId,
        plaintext: &[u8],
    ) -> Result<SendOutcome, ChannelError> {
        if plaintext.is_empty() {
            return Err(ChannelError::EmptyMessage);
        }

        let session = self
            .sessions
            .get_mut(connection)
            .ok_or(ChannelError::NoSession)?;

        let (frame, outcome) = match session.state() {
            HandshakeState::KeySent => {
                let request = session.handshake_mut().initiate()?;
                debug!("Handshake pending, key request sent again");
                (request, SendOutcome::HandshakePending)
            }
            HandshakeState::NotStarted => {
                let request = session.handshake_mut().initiate()?;
                info!("No session key yet, initiating handshake");
                (request, SendOutcome::HandshakeInitiated)
            }
            HandshakeState::Established => {
                let max = self
                    .settings
                    .plaintext_budget(self.transport.max_payload_size(connection));
                if plaintext.len() > max {
                    return Err(ChannelError::PayloadTooLarge {
                        len: plaintext.len(),
                        max,
                    });
                }
                let payload = encrypt_data(&self.settings, session, plaintext)?;
                (Frame::data(payload), SendOutcome::Sent)
            }
        };

        if let Err(e) = self.transmit(connection, &frame) {
            if outcome != SendOutcome::Sent {
                if let Some(session) = self.sessions.get_mut(connection) {
                    session.reset();
                }
            }
            return Err(e);
        }
        trace!(?frame, "Frame sent");
        Ok(outcome)
    }

    fn receive_handshake(
        &mut self,
        connection: ConnectionId,
        frame: Frame,
    ) -> Result<Inbound, ChannelError> {
        let session = self
            .sessions
            .get_mut(connection)
            .ok_or(ChannelError::NoSession)?;

        if session.handshake().is_established() {
            debug!(kind = ?frame.kind(), "Handshake message on established session ignored");
            return Ok(Inbound::HandshakeIgnored);
        }

        let action = session.handshake_mut().on_receive(&frame)?;
        if let Err(e) =
            session.install_ciphers(self.settings.outbound_key, self.configuration.static_key())
        {
            session.reset();
            return Err(e);
        }

        match action {
            Action::None => Ok(Inbound::HandshakeCompleted),
            Action::Respond(response) => {
                if let Err(e) = self.transmit(connection, &response) {
                    // The peer never saw our key, so the session cannot be used.
                    if let Some(session) = self.sessions.get_mut(connection) {
                        session.reset();
                    }
                    return Err(e);
                }
                Ok(Inbound::HandshakeResponded)
            }
        }
    }

    fn receive_data(
        &mut self,
        connection: ConnectionId,
        payload: &[u8],
    ) -> Result<Inbound, ChannelError> {
        let session = self
            .sessions
            .get_mut(connection)
            .ok_or(ChannelError::NoSession)?;

        if !session.handshake().is_established() {
            return Err(ChannelError::NotEstablished);
        }

        let plaintext = decrypt_data(&self.settings, session, payload)?;
        if !plaintext.is_empty() {
            self.sink.accept(&plaintext);
        }
        debug!(len = plaintext.len(), "Plaintext delivered");
        Ok(Inbound::Delivered(plaintext))
    }

    /// Legacy peers send bare ciphertext without a kind byte.
    fn receive_unknown(
        &mut self,
        connection: ConnectionId,
        id: u8,
        message: &[u8],
    ) -> Result<Inbound, ChannelError> {
        if !self.settings.legacy_data_fallback {
            return Err(ChannelError::UnknownType(id));
        }

        debug!(id, "Unknown message type, trying headerless data");
        self.receive_data(connection, message)
    }

    /// Send with retries while the transport is busy. A fatal failure removes the session.
    fn transmit(&mut self, connection: ConnectionId, frame: &Frame) -> Result<(), ChannelError> {
        let result = transmit(
            &mut self.transport,
            connection,
            &frame.encode(),
            self.settings.send_attempts(),
        );

        if let Err(ChannelError::TransportFatal(reason)) = &result {
            warn!(connection = %connection, reason, "Transport failed, dropping session");
            self.sessions.remove(connection);
            self.outbound_assembler.clear();
        }
        result
    }
}

impl<T: Transport, K: PlaintextSink> std::fmt::Debug for SecureChannel<T, K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("settings", &self.settings)
            .field("device", &self.configuration.device_identifier())
            .field("sessions", &self.sessions)
            .finish_non_exhaustive()
    }
}

fn transmit<T: Transport>(
    transport: &mut T,
    connection: ConnectionId,
    bytes: &[u8],
    attempts: u32,
) -> Result<(), ChannelError> {
    for attempt in 1..=attempts {
        match transport.send(connection, bytes) {
            Ok(()) => return Ok(()),
            Err(SendFailure::Busy) => trace!(attempt, "Transport busy"),
            Err(SendFailure::Fatal(e)) => return Err(ChannelError::TransportFatal(e.to_string())),
        }
    }

    warn!(attempts, "Transport still busy, giving up");
    Err(ChannelError::TransportBusy)
}

fn encrypt_data(
    settings: &ChannelSettings,
    session: &mut Session,
    plaintext: &[u8],
) -> Result<Vec<u8>, ChannelError> {
    let encoded;
    let plaintext = match settings.payload_encoding {
        PayloadEncoding::Raw => plaintext,
        PayloadEncoding::Base64 => {
            encoded = STANDARD.encode(plaintext);
            encoded.as_bytes()
        }
    };

    let cipher = session.outbound_cipher()?;
    match settings.iv_mode {
        IvMode::Zero => Ok(cipher.encrypt(plaintext)?),
        IvMode::RandomPrefixed => {
            let iv = cipher.randomize_iv(&mut OsRng)?;
            let ciphertext = cipher.encrypt(plaintext)?;

            let mut payload = Vec::with_capacity(IV_SIZE + ciphertext.len());
            payload.extend_from_slice(&iv);
            payload.extend_from_slice(&ciphertext);
            Ok(payload)
        }
    }
}

fn decrypt_data(
    settings: &ChannelSettings,
    session: &mut Session,
    payload: &[u8],
) -> Result<Vec<u8>, ChannelError> {
    let cipher = session.inbound_cipher()?;
    let ciphertext = match settings.iv_mode {
        IvMode::Zero => payload,
        IvMode::RandomPrefixed => {
            if payload.len() <= IV_SIZE {
                return Err(CryptoError::InvalidLength { len: payload.len() }.into());
            }
            let (iv, ciphertext) = payload.split_at(IV_SIZE);
            let mut next_iv = [0u8; IV_SIZE];
            next_iv.copy_from_slice(iv);
            cipher.set_iv(next_iv);
            ciphertext
        }
    };

    let padded = cipher.decrypt(ciphertext)?;
    let stripped = strip_trailing_control(&padded);

    match settings.payload_encoding {
        PayloadEncoding::Raw => Ok(stripped.to_vec()),
        PayloadEncoding::Base64 => STANDARD
            .decode(stripped)
            .map_err(|_| ChannelError::InvalidPayloadEncoding),
    }
}
