use std::collections::{HashMap, VecDeque};

use nusbridge_channel::{ConnectionId, SendFailure, Transport, DEFAULT_MAX_PAYLOAD_SIZE};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct MemoryTransportError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub connection: ConnectionId,
    pub bytes: Vec<u8>,
}

enum Scripted {
    Busy,
    Fatal(String),
}

/// Records every message sent and replays scripted failures in order.
#[derive(Default)]
pub struct MemoryTransport {
    sent: Vec<SentMessage>,
    script: VecDeque<Scripted>,
    max_payload_size: HashMap<ConnectionId, usize>,
    default_max_payload_size: Option<usize>,
    attempts: usize,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `size` for every connection without an explicit size.
    pub fn with_max_payload_size(mut self, size: usize) -> Self {
        self.default_max_payload_size = Some(size);
        self
    }

    pub fn set_max_payload_size(&mut self, connection: ConnectionId, size: usize) {
        self.max_payload_size.insert(connection, size);
    }

    /// The next `count` sends report [`SendFailure::Busy`].
    pub fn busy_for(&mut self, count: usize) {
        self.script
            .extend(std::iter::repeat_with(|| Scripted::Busy).take(count));
    }

    /// The next send, after any queued busy replies, fails permanently.
    pub fn fail_next(&mut self, reason: impl Into<String>) {
        self.script.push_back(Scripted::Fatal(reason.into()));
    }

    pub fn sent(&self) -> &[SentMessage] {
        &self.sent
    }

    pub fn last_sent(&self) -> Option<&[u8]> {
        self.sent.last().map(|message| message.bytes.as_slice())
    }

    /// Remove and return everything sent so far.
    pub fn take_sent(&mut self) -> Vec<Vec<u8>> {
        self.sent.drain(..).map(|message| message.bytes).collect()
    }

    /// Calls to `send`, including failed ones.
    pub fn attempts(&self) -> usize {
        self.attempts
    }
}

impl Transport for MemoryTransport {
    type Error = MemoryTransportError;

    fn send(
        &mut self,
        connection: ConnectionId,
        bytes: &[u8],
    ) -> Result<(), SendFailure<Self::Error>> {
        self.attempts += 1;
        match self.script.pop_front() {
            Some(Scripted::Busy) => Err(SendFailure::Busy),
            Some(Scripted::Fatal(reason)) => Err(SendFailure::Fatal(MemoryTransportError(reason))),
            None => {
                self.sent.push(SentMessage {
                    connection,
                    bytes: bytes.to_vec(),
                });
                Ok(())
            }
        }
    }

    fn max_payload_size(&self, connection: ConnectionId) -> usize {
        self.max_payload_size
            .get(&connection)
            .copied()
            .or(self.default_max_payload_size)
            .unwrap_or(DEFAULT_MAX_PAYLOAD_SIZE)
    }
}

impl std::fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("sent", &self.sent.len())
            .field("scripted", &self.script.len())
            .finish()
    }
}
