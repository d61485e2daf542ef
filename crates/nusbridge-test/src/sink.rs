use nusbridge_channel::PlaintextSink;

/// Keeps every plaintext it is handed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordingSink {
    received: Vec<Vec<u8>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&self) -> &[Vec<u8>] {
        &self.received
    }

    /// Everything received, as the serial port would see it.
    pub fn concatenated(&self) -> Vec<u8> {
        self.received.concat()
    }

    pub fn take(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.received)
    }
}

impl PlaintextSink for RecordingSink {
    fn accept(&mut self, plaintext: &[u8]) {
        self.received.push(plaintext.to_vec());
    }
}
