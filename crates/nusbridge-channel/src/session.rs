//! Per connection state and the fixed capacity table that owns it.

use nusbridge_crypto::{CipherContext, SymmetricKey};
use tracing::debug;

use crate::{
    assembler::FrameAssembler,
    config::OutboundKey,
    error::ChannelError,
    handshake::{HandshakeCoordinator, HandshakeState},
};

/// Connections the channel serves at the same time.
pub const MAX_CONNECTIONS: usize = 1;

/// Opaque connection handle assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u16);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// State of one connection. Dropped on disconnect, which also drops every key derived for it.
#[derive(Debug)]
pub struct Session {
    connection_id: ConnectionId,
    handshake: HandshakeCoordinator,
    inbound: Option<CipherContext>,
    outbound: Option<CipherContext>,
    inbound_assembler: FrameAssembler,
}

impl Session {
    /// Fresh session with an inbound assembler bounded by `max_payload_size`.
    pub fn new(
        connection_id: ConnectionId,
        handshake: HandshakeCoordinator,
        max_payload_size: usize,
    ) -> Self {
        Session {
            connection_id,
            handshake,
            inbound: None,
            outbound: None,
            inbound_assembler: FrameAssembler::new(max_payload_size),
        }
    }

    /// The connection this session belongs to.
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// The key exchange state machine.
    pub fn handshake(&self) -> &HandshakeCoordinator {
        &self.handshake
    }

    /// Mutable access to the key exchange state machine.
    pub fn handshake_mut(&mut self) -> &mut HandshakeCoordinator {
        &mut self.handshake
    }

    /// Shorthand for the handshake state.
    pub fn state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Assembler for bytes arriving on this connection.
    pub fn inbound_assembler_mut(&mut self) -> &mut FrameAssembler {
        &mut self.inbound_assembler
    }

    /// Key the data ciphers once the handshake is established.
    ///
    /// Inbound always uses the ECDH secret; outbound uses it or `static_key` depending on
    /// `outbound_key`.
    pub(crate) fn install_ciphers(
        &mut self,
        outbound_key: OutboundKey,
        static_key: &SymmetricKey,
    ) -> Result<(), ChannelError> {
        let session_key = self
            .handshake
            .shared_secret()
            .ok_or(ChannelError::NotEstablished)?
            .cipher_key()?;

        let outbound = match outbound_key {
            OutboundKey::SharedSecret => session_key.clone(),
            OutboundKey::StaticKey => static_key.clone(),
        };

        self.inbound = Some(CipherContext::with_zero_iv(session_key));
        self.outbound = Some(CipherContext::with_zero_iv(outbound));
        debug!(connection = %self.connection_id, ?outbound_key, "Session ciphers installed");
        Ok(())
    }

    pub(crate) fn inbound_cipher(&mut self) -> Result<&mut CipherContext, ChannelError> {
        self.inbound.as_mut().ok_or(ChannelError::NotEstablished)
    }

    pub(crate) fn outbound_cipher(&mut self) -> Result<&mut CipherContext, ChannelError> {
        self.outbound.as_mut().ok_or(ChannelError::NotEstablished)
    }

    /// Back to `NotStarted`: handshake progress and ciphers are dropped.
    ///
    /// Bytes the inbound assembler has buffered are kept, since they belong to the peer's next
    /// frame and not to the failed exchange.
    pub fn reset(&mut self) {
        self.handshake.reset();
        self.inbound = None;
        self.outbound = None;
    }
}

/// Fixed capacity map from connection to session state.
pub struct SessionTable<S, const N: usize = MAX_CONNECTIONS> {
    slots: [Option<(ConnectionId, S)>; N],
}

impl<S, const N: usize> SessionTable<S, N> {
    /// Empty table.
    pub fn new() -> Self {
        SessionTable {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        N
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Whether no slot is occupied.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `connection` has a session.
    pub fn contains(&self, connection: ConnectionId) -> bool {
        self.get(connection).is_some()
    }

    /// Session of `connection`.
    pub fn get(&self, connection: ConnectionId) -> Option<&S> {
        self.slots
            .iter()
            .flatten()
            .find(|(id, _)| *id == connection)
            .map(|(_, session)| session)
    }

    /// Mutable session of `connection`.
    pub fn get_mut(&mut self, connection: ConnectionId) -> Option<&mut S> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|(id, _)| *id == connection)
            .map(|(_, session)| session)
    }

    /// Store `session` for `connection`, replacing the previous one for the same connection.
    pub fn insert(&mut self, connection: ConnectionId, session: S) -> Result<(), ChannelError> {
        if let Some(existing) = self.get_mut(connection) {
            *existing = session;
            return Ok(());
        }

        let slot = self
            .slots
            .iter_mut()
            .find(|slot| slot.is_none())
            .ok_or(ChannelError::SessionTableFull)?;
        *slot = Some((connection, session));
        Ok(())
    }

    /// Take the session of `connection` out, freeing its slot.
    pub fn remove(&mut self, connection: ConnectionId) -> Option<S> {
        self.slots
            .iter_mut()
            .find(|slot| matches!(slot, Some((id, _)) if *id == connection))
            .and_then(Option::take)
            .map(|(_, session)| session)
    }

    /// Connections that currently hold a session.
    pub fn active(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.slots.iter().flatten().map(|(id, _)| *id)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (ConnectionId, &mut S)> + '_ {
        self.slots
            .iter_mut()
            .flatten()
            .map(|(id, session)| (*id, session))
    }
}

impl<S, const N: usize> Default for SessionTable<S, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: std::fmt::Debug, const N: usize> std::fmt::Debug for SessionTable<S, N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.slots.iter().flatten().map(|(id, s)| (id, s)))
            .finish()
    }
}
