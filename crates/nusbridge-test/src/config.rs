use nusbridge_channel::ConfigurationStore;
use nusbridge_crypto::SymmetricKey;

/// Static key used by the reference firmware test vectors.
const TEST_STATIC_KEY: [u8; 32] = *b"NORDIC SEMICONDUCTORAES&MAC TEST";

#[derive(Debug, Clone)]
pub struct MemoryConfigurationStore {
    pub device_identifier: String,
    pub static_key: SymmetricKey,
}

impl MemoryConfigurationStore {
    pub fn new(device_identifier: impl Into<String>, static_key: SymmetricKey) -> Self {
        MemoryConfigurationStore {
            device_identifier: device_identifier.into(),
            static_key,
        }
    }
}

impl Default for MemoryConfigurationStore {
    fn default() -> Self {
        Self::new("MEGO", SymmetricKey::from_bytes(TEST_STATIC_KEY))
    }
}

impl ConfigurationStore for MemoryConfigurationStore {
    fn static_key(&self) -> SymmetricKey {
        self.static_key.clone()
    }

    fn device_identifier(&self) -> String {
        self.device_identifier.clone()
    }
}
