#![allow(missing_docs)]

//! In-memory collaborators for exercising `nusbridge-channel` without a radio.

mod config;
mod sink;
mod transport;

pub use config::MemoryConfigurationStore;
pub use sink::RecordingSink;
pub use transport::{MemoryTransport, MemoryTransportError, SentMessage};
