//! Caller-signed payload tokens
//!
//! A perk assertion signs a compact `header.payload.signature` token chosen
//! by the calling application. The token's own signature is not checked
//! here: the WebAuthn assertion over it is what authenticates the payload.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde_json::Value;

use crate::error::TokenError;

/// Decode the JSON claims of a compact token, enforcing `exp` and `nbf`
/// (seconds since epoch) when present
pub fn decode_claims(signed: &[u8], now_secs: u64) -> Result<Value, TokenError> {
    let text = std::str::from_utf8(signed).map_err(|_| TokenError::Malformed)?;
    let mut parts = text.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(TokenError::Malformed);
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| TokenError::InvalidPayload(e.to_string()))?;
    let claims: Value =
        serde_json::from_slice(&bytes).map_err(|e| TokenError::InvalidPayload(e.to_string()))?;

    if !claims.is_object() {
        return Err(TokenError::InvalidPayload("claims must be an object".into()));
    }

    if let Some(exp) = numeric_claim(&claims, "exp")? {
        if now_secs >= exp {
            return Err(TokenError::Expired);
        }
    }
    if let Some(nbf) = numeric_claim(&claims, "nbf")? {
        if now_secs < nbf {
            return Err(TokenError::NotYetValid);
        }
    }

    Ok(claims)
}

fn numeric_claim(claims: &Value, name: &str) -> Result<Option<u64>, TokenError> {
    match claims.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| Some(v as u64))
            .ok_or_else(|| TokenError::InvalidPayload(format!("{name} must be a number"))),
    }
}

/// Build an unsigned compact token around `claims` (tests and tooling)
pub fn encode_unsigned(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.")
}
