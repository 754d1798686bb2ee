//! WebAuthn wire types
//!
//! Browser clients differ in how they put authenticator output on the wire.
//! Byte fields are accepted as JSON arrays of integers or as base64url text;
//! `clientDataJSON` may also arrive as the raw JSON text. Everything is
//! normalized to bytes here and re-encoded as base64url on output.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::ceremony::CeremonyError;

/// Bytes on the wire
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteBuf(pub Vec<u8>);

#[derive(Deserialize)]
#[serde(untagged)]
enum WireBytes {
    Bytes(Vec<u8>),
    Text(String),
}

fn decode_base64url(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    // Some clients send the standard alphabet, some pad
    let normalized: String = text
        .trim_end_matches('=')
        .chars()
        .map(|c| match c {
            '+' => '-',
            '/' => '_',
            c => c,
        })
        .collect();
    URL_SAFE_NO_PAD.decode(normalized)
}

impl ByteBuf {
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        URL_SAFE_NO_PAD.encode(&self.0)
    }
}

impl From<Vec<u8>> for ByteBuf {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for ByteBuf {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> Deserialize<'de> for ByteBuf {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match WireBytes::deserialize(deserializer)? {
            WireBytes::Bytes(bytes) => Ok(Self(bytes)),
            WireBytes::Text(text) => decode_base64url(&text)
                .map(Self)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// `clientDataJSON` bytes; also accepts the JSON document as plain text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientDataJson(pub Vec<u8>);

impl Serialize for ClientDataJson {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&URL_SAFE_NO_PAD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for ClientDataJson {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match WireBytes::deserialize(deserializer)? {
            WireBytes::Bytes(bytes) => Ok(Self(bytes)),
            WireBytes::Text(text) if text.trim_start().starts_with('{') => {
                Ok(Self(text.into_bytes()))
            }
            WireBytes::Text(text) => decode_base64url(&text)
                .map(Self)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// The fields of `clientDataJSON` this server looks at
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CollectedClientData {
    #[serde(rename = "type")]
    pub kind: String,
    pub challenge: String,
    pub origin: String,
}

impl ClientDataJson {
    pub fn parse(&self) -> Result<CollectedClientData, CeremonyError> {
        serde_json::from_slice(&self.0)
            .map_err(|e| CeremonyError::Rejected(format!("invalid clientDataJSON: {e}")))
    }

    /// Challenge bytes the authenticator signed over
    pub fn challenge(&self) -> Result<Vec<u8>, CeremonyError> {
        decode_base64url(&self.parse()?.challenge)
            .map_err(|e| CeremonyError::Rejected(format!("invalid challenge encoding: {e}")))
    }
}

fn public_key_type() -> String {
    "public-key".to_string()
}

/// Credential creation response (`navigator.credentials.create`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    #[serde(default)]
    pub id: String,
    pub raw_id: ByteBuf,
    pub response: AttestationPayload,
    #[serde(rename = "type", default = "public_key_type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationPayload {
    pub attestation_object: ByteBuf,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: ClientDataJson,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transports: Option<Vec<String>>,
}

/// Credential assertion response (`navigator.credentials.get`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    #[serde(default)]
    pub id: String,
    pub raw_id: ByteBuf,
    pub response: AssertionPayload,
    #[serde(rename = "type", default = "public_key_type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionPayload {
    pub authenticator_data: ByteBuf,
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: ClientDataJson,
    pub signature: ByteBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<ByteBuf>,
}

impl AttestationResponse {
    /// Credential id as base64url, derived from `rawId` when `id` is absent
    pub fn credential_id(&self) -> String {
        if self.id.is_empty() {
            self.raw_id.to_base64url()
        } else {
            self.id.clone()
        }
    }
}

impl AssertionResponse {
    pub fn credential_id(&self) -> String {
        if self.id.is_empty() {
            self.raw_id.to_base64url()
        } else {
            self.id.clone()
        }
    }

    /// User handle reported by the authenticator, if any (empty counts as none)
    pub fn user_handle(&self) -> Option<&[u8]> {
        self.response
            .user_handle
            .as_ref()
            .map(ByteBuf::as_slice)
            .filter(|handle| !handle.is_empty())
    }
}
