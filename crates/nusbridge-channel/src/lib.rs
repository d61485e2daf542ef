#![doc = include_str!("../README.md")]

mod assembler;
pub use assembler::{FrameAssembler, SENTINEL};
mod channel;
pub use channel::{Inbound, SecureChannel, SendOutcome};
mod config;
pub use config::{
    ChannelSettings, DeviceConfiguration, IvMode, OutboundKey, PayloadEncoding,
    DEFAULT_MAX_PAYLOAD_SIZE, DEVICE_IDENTIFIER_MAX_LEN,
};
mod error;
pub use error::{ChannelError, ConfigurationError, FrameError, HandshakeError};
mod frame;
pub use frame::{Frame, MessageKind};
mod handshake;
pub use handshake::{Action, HandshakeCoordinator, HandshakeState};
mod session;
pub use session::{ConnectionId, Session, SessionTable, MAX_CONNECTIONS};
mod traits;
pub use traits::{ConfigurationStore, PlaintextSink, SendFailure, Transport};
