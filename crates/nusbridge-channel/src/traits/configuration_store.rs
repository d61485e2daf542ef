use nusbridge_crypto::SymmetricKey;

/// Persistent device configuration, owned by the storage layer.
///
/// The channel reads it once when it is created. Later changes need a new channel.
pub trait ConfigurationStore {
    /// Key used for outbound data in [`OutboundKey::StaticKey`](crate::OutboundKey::StaticKey)
    /// mode.
    fn static_key(&self) -> SymmetricKey;

    /// Name the device advertises, at most
    /// [`DEVICE_IDENTIFIER_MAX_LEN`](crate::DEVICE_IDENTIFIER_MAX_LEN) bytes.
    fn device_identifier(&self) -> String;
}
