use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Elliptic curve used for the key agreement.
///
/// Both peers must agree on the curve out of band; the wire format carries no curve identifier,
/// only raw public key bytes whose length is fixed by the curve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Curve {
    /// NIST P-256 (secp256r1). 64 byte public keys, 32 byte shared secrets.
    #[default]
    #[serde(rename = "p256")]
    P256,
    /// NIST P-384 (secp384r1). 96 byte public keys, 48 byte shared secrets.
    #[serde(rename = "p384")]
    P384,
}

impl Curve {
    /// Length of a serialized public key (`x || y`, no SEC1 tag).
    pub const fn public_key_len(self) -> usize {
        2 * self.field_len()
    }

    /// Length of the raw ECDH output (the x-coordinate of the shared point).
    pub const fn shared_secret_len(self) -> usize {
        self.field_len()
    }

    pub(crate) const fn field_len(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
        }
    }
}

impl Display for Curve {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(Curve::P256.public_key_len(), 64);
        assert_eq!(Curve::P256.shared_secret_len(), 32);
        assert_eq!(Curve::P384.public_key_len(), 96);
        assert_eq!(Curve::P384.shared_secret_len(), 48);
    }

    #[test]
    fn test_default_is_p256() {
        assert_eq!(Curve::default(), Curve::P256);
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&Curve::P384).expect("should serialize");
        assert_eq!(json, "\"p384\"");
        let parsed: Curve = serde_json::from_str("\"p256\"").expect("should deserialize");
        assert_eq!(parsed, Curve::P256);
    }
}
