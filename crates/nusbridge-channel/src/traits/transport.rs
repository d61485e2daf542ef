use std::fmt::Display;

use crate::session::ConnectionId;

/// Why a [`Transport::send`] did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure<E> {
    /// The transport has no room right now. The same bytes may be sent again.
    Busy,
    /// The link is unusable. The channel tears the session down.
    Fatal(E),
}

/// The byte transport the channel rides on, e.g. a BLE serial service.
///
/// The implementation needs to guarantee that:
///     - Every successful `send` delivers the bytes as one message, never merged with another.
///     - `max_payload_size` reports the negotiated size for the connection, or a safe default
///       before negotiation.
pub trait Transport {
    /// Reason for a fatal failure, logged and carried in
    /// [`ChannelError::TransportFatal`](crate::ChannelError::TransportFatal).
    type Error: Display;

    /// Send one encoded frame to the peer on `connection`.
    fn send(
        &mut self,
        connection: ConnectionId,
        bytes: &[u8],
    ) -> Result<(), SendFailure<Self::Error>>;

    /// Largest message the transport accepts for `connection`.
    fn max_payload_size(&self, connection: ConnectionId) -> usize;
}
