/// Receives decrypted application data, e.g. a UART.
pub trait PlaintextSink {
    /// Take one decrypted, non-empty payload.
    fn accept(&mut self, plaintext: &[u8]);
}

impl<F> PlaintextSink for F
where
    F: FnMut(&[u8]),
{
    fn accept(&mut self, plaintext: &[u8]) {
        self(plaintext)
    }
}
