//! Credential records as persisted in the key store

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One identity's registered public key material.
///
/// Created on registration and only ever replaced as a whole. Logging in does
/// not write it back, so `sign_count` keeps its registration value: perk
/// assertions made with the same credential may arrive out of order or more
/// than once and must keep verifying against a constant baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Ceremony-library specific public key encoding
    pub public_key: Value,
    /// Authenticator credential id
    #[serde(with = "base64url")]
    pub credential_id: Vec<u8>,
    /// Authenticator counter at registration
    pub sign_count: u32,
}

/// A credential record together with the issuer id the store assigned it
#[derive(Debug, Clone, PartialEq)]
pub struct StoredCredential {
    pub record: CredentialRecord,
    pub issuer_id: String,
}

/// Serde helper: bytes as unpadded base64url text
pub mod base64url {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        URL_SAFE_NO_PAD
            .decode(text.trim_end_matches('='))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_credential_id_serializes_as_base64url() {
        let record = CredentialRecord {
            public_key: json!({"kty": "EC"}),
            credential_id: vec![0xfb, 0xff, 0x01],
            sign_count: 7,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["credential_id"], "-_8B");
        let back: CredentialRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }
}
