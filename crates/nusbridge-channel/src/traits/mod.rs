mod configuration_store;
mod sink;
mod transport;

pub use configuration_store::ConfigurationStore;
pub use sink::PlaintextSink;
pub use transport::{SendFailure, Transport};
