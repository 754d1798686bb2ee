//! Authenticated Challenges
//!
//! A challenge is a sealed `[identity, flow, payload, issued_at]` record that the
//! server hands to a client and later accepts back. Nothing is stored
//! server-side; integrity and confidentiality come from AES-256-GCM and the
//! only time bound is the timeout checked on open.
//!
//! Opening fails if the ciphertext does not authenticate, if the identity or
//! flow differ from what the calling endpoint expects, or once
//! `issued_at + timeout <= now`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::Clock;
use crate::crypto::{Sealed, SecretBox};
use crate::error::ChallengeError;

/// Client-side transport form of a challenge (`{ciphertext, nonce}`, base64)
pub type SessionData = Sealed;

/// Default challenge timeout (60 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// The ceremony a challenge was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    /// Credential registration (attestation)
    #[serde(alias = "attestation")]
    Registration,
    /// Proof of possession of a registered credential (assertion)
    #[serde(alias = "assertion")]
    Login,
    /// Enrollment of an end user's credential for the access administrator
    Access,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Login => "login",
            Self::Access => "access",
        }
    }
}

impl fmt::Display for FlowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Authenticated but unchecked header of a challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChallengeHeader {
    pub identity: String,
    pub flow: FlowType,
    pub issued_at: u64,
}

/// Wire layout of the sealed plaintext
type ChallengeRecord = (String, FlowType, Value, u64);

/// Seals and opens Authenticated Challenges with one key and clock
#[derive(Clone)]
pub struct ChallengeCodec {
    secret: SecretBox,
    clock: Arc<dyn Clock>,
}

impl ChallengeCodec {
    pub fn new(secret: SecretBox, clock: Arc<dyn Clock>) -> Self {
        Self { secret, clock }
    }

    /// Seal `payload` for `identity` and `flow`, stamped with the current time
    pub fn seal(
        &self,
        identity: &str,
        flow: FlowType,
        payload: &Value,
    ) -> Result<SessionData, ChallengeError> {
        let record: (&str, FlowType, &Value, u64) =
            (identity, flow, payload, self.clock.now_millis());
        self.secret
            .seal_json(&record)
            .map_err(|e| ChallengeError::Serialization(e.to_string()))
    }

    /// Open a challenge and enforce identity, flow and expiry
    pub fn open(
        &self,
        sealed: &SessionData,
        expected_identity: &str,
        expected_flow: FlowType,
        timeout_ms: u64,
    ) -> Result<Value, ChallengeError> {
        let (identity, flow, payload, issued_at) = self.decrypt(sealed)?;

        if identity != expected_identity {
            return Err(ChallengeError::WrongIdentity);
        }

        if flow != expected_flow {
            return Err(ChallengeError::WrongFlowType {
                expected: expected_flow.to_string(),
                actual: flow.to_string(),
            });
        }

        let now = self.clock.now_millis();
        if issued_at.saturating_add(timeout_ms) <= now {
            return Err(ChallengeError::ChallengeExpired {
                issued_at,
                timeout_ms,
                now,
            });
        }

        Ok(payload)
    }

    /// Authenticate a challenge and return who and what it was issued for,
    /// without checking identity, flow or expiry
    pub fn peek(&self, sealed: &SessionData) -> Result<ChallengeHeader, ChallengeError> {
        let (identity, flow, _, issued_at) = self.decrypt(sealed)?;
        Ok(ChallengeHeader {
            identity,
            flow,
            issued_at,
        })
    }

    fn decrypt(&self, sealed: &SessionData) -> Result<ChallengeRecord, ChallengeError> {
        // Wrong key, corrupted ciphertext and tampered nonce all land here
        self.secret
            .open_json::<ChallengeRecord>(sealed)
            .map_err(|_| ChallengeError::ChallengeInvalid)
    }
}

impl fmt::Debug for ChallengeCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChallengeCodec")
            .field("secret", &self.secret)
            .finish_non_exhaustive()
    }
}

/// How session state travels between a begin and a complete request
pub trait ChallengeTransport: Send + Sync {
    /// Issue a transportable challenge carrying `payload`
    fn issue(
        &self,
        identity: &str,
        flow: FlowType,
        payload: &Value,
    ) -> Result<SessionData, ChallengeError>;

    /// Redeem a challenge previously issued for `identity` and `flow`
    fn redeem(
        &self,
        session_data: &SessionData,
        identity: &str,
        flow: FlowType,
    ) -> Result<Value, ChallengeError>;

    /// Authenticated identity and flow of a challenge, before redeeming it
    fn peek(&self, session_data: &SessionData) -> Result<ChallengeHeader, ChallengeError>;
}

/// Stateless transport: the whole session state is sealed into the challenge
#[derive(Debug, Clone)]
pub struct SealedChallenges {
    codec: ChallengeCodec,
    timeout_ms: u64,
}

impl SealedChallenges {
    pub fn new(codec: ChallengeCodec, timeout_ms: u64) -> Self {
        Self { codec, timeout_ms }
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }
}

impl ChallengeTransport for SealedChallenges {
    fn issue(
        &self,
        identity: &str,
        flow: FlowType,
        payload: &Value,
    ) -> Result<SessionData, ChallengeError> {
        self.codec.seal(identity, flow, payload)
    }

    fn redeem(
        &self,
        session_data: &SessionData,
        identity: &str,
        flow: FlowType,
    ) -> Result<Value, ChallengeError> {
        self.codec
            .open(session_data, identity, flow, self.timeout_ms)
    }

    fn peek(&self, session_data: &SessionData) -> Result<ChallengeHeader, ChallengeError> {
        self.codec.peek(session_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde_json::json;

    const START: u64 = 1_700_000_000_000;

    fn codec_with_clock() -> (ChallengeCodec, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(START));
        let secret = SecretBox::new(&[3u8; 32]).unwrap();
        (ChallengeCodec::new(secret, clock.clone()), clock)
    }

    fn flip_bit(encoded: &str, bit: usize) -> String {
        let mut bytes = BASE64.decode(encoded).unwrap();
        bytes[bit / 8] ^= 1 << (bit % 8);
        BASE64.encode(bytes)
    }

    #[test]
    fn test_roundtrip_every_flow() {
        let (codec, _) = codec_with_clock();
        let payload = json!({ "challenge": [1, 2, 3], "nested": { "a": "b" } });

        for flow in [FlowType::Registration, FlowType::Login, FlowType::Access] {
            let sealed = codec.seal("alice", flow, &payload).unwrap();
            let opened = codec.open(&sealed, "alice", flow, 1).unwrap();
            assert_eq!(opened, payload);
        }
    }

    #[test]
    fn test_any_ciphertext_bit_flip_is_rejected() {
        let (codec, _) = codec_with_clock();
        let sealed = codec.seal("alice", FlowType::Login, &json!("p")).unwrap();
        let bits = BASE64.decode(&sealed.ciphertext).unwrap().len() * 8;

        for bit in 0..bits {
            let tampered = SessionData {
                ciphertext: flip_bit(&sealed.ciphertext, bit),
                nonce: sealed.nonce.clone(),
            };
            assert_eq!(
                codec.open(&tampered, "alice", FlowType::Login, DEFAULT_TIMEOUT_MS),
                Err(ChallengeError::ChallengeInvalid),
                "bit {bit} of ciphertext"
            );
        }
    }

    #[test]
    fn test_any_nonce_bit_flip_is_rejected() {
        let (codec, _) = codec_with_clock();
        let sealed = codec.seal("alice", FlowType::Login, &json!("p")).unwrap();

        for bit in 0..96 {
            let tampered = SessionData {
                ciphertext: sealed.ciphertext.clone(),
                nonce: flip_bit(&sealed.nonce, bit),
            };
            assert_eq!(
                codec.open(&tampered, "alice", FlowType::Login, DEFAULT_TIMEOUT_MS),
                Err(ChallengeError::ChallengeInvalid),
                "bit {bit} of nonce"
            );
        }
    }

    #[test]
    fn test_garbage_transport_fields_are_invalid() {
        let (codec, _) = codec_with_clock();
        let garbage = SessionData {
            ciphertext: "not base64!".into(),
            nonce: "AAAA".into(),
        };
        assert_eq!(
            codec.open(&garbage, "alice", FlowType::Login, DEFAULT_TIMEOUT_MS),
            Err(ChallengeError::ChallengeInvalid)
        );
    }

    #[test]
    fn test_wrong_key_is_invalid() {
        let (codec, clock) = codec_with_clock();
        let sealed = codec.seal("alice", FlowType::Login, &json!(1)).unwrap();
        let other = ChallengeCodec::new(SecretBox::new(&[4u8; 32]).unwrap(), clock);
        assert_eq!(
            other.open(&sealed, "alice", FlowType::Login, DEFAULT_TIMEOUT_MS),
            Err(ChallengeError::ChallengeInvalid)
        );
    }

    #[test]
    fn test_registration_challenge_rejected_for_login() {
        let (codec, _) = codec_with_clock();
        let sealed = codec
            .seal("alice", FlowType::Registration, &json!(null))
            .unwrap();
        assert_eq!(
            codec.open(&sealed, "alice", FlowType::Login, DEFAULT_TIMEOUT_MS),
            Err(ChallengeError::WrongFlowType {
                expected: "login".into(),
                actual: "registration".into(),
            })
        );
    }

    #[test]
    fn test_identity_mismatch() {
        let (codec, _) = codec_with_clock();
        let sealed = codec.seal("alice", FlowType::Login, &json!(null)).unwrap();
        assert_eq!(
            codec.open(&sealed, "bob", FlowType::Login, DEFAULT_TIMEOUT_MS),
            Err(ChallengeError::WrongIdentity)
        );
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let (codec, clock) = codec_with_clock();
        let timeout = 60_000;
        let sealed = codec.seal("alice", FlowType::Login, &json!("x")).unwrap();

        clock.set(START + timeout - 1);
        assert_eq!(
            codec.open(&sealed, "alice", FlowType::Login, timeout),
            Ok(json!("x"))
        );

        clock.set(START + timeout);
        assert_eq!(
            codec.open(&sealed, "alice", FlowType::Login, timeout),
            Err(ChallengeError::ChallengeExpired {
                issued_at: START,
                timeout_ms: timeout,
                now: START + timeout,
            })
        );
    }

    #[test]
    fn test_peek_reports_header_without_checks() {
        let (codec, clock) = codec_with_clock();
        let sealed = codec.seal("admin", FlowType::Access, &json!({})).unwrap();
        clock.advance(10 * DEFAULT_TIMEOUT_MS);

        let header = codec.peek(&sealed).unwrap();
        assert_eq!(header.identity, "admin");
        assert_eq!(header.flow, FlowType::Access);
        assert_eq!(header.issued_at, START);
    }

    #[test]
    fn test_transport_uses_configured_timeout() {
        let (codec, clock) = codec_with_clock();
        let transport = SealedChallenges::new(codec, 1_000);
        let sealed = transport
            .issue("alice", FlowType::Registration, &json!([9]))
            .unwrap();

        clock.advance(999);
        assert_eq!(
            transport.redeem(&sealed, "alice", FlowType::Registration),
            Ok(json!([9]))
        );
        clock.advance(1);
        assert!(matches!(
            transport.redeem(&sealed, "alice", FlowType::Registration),
            Err(ChallengeError::ChallengeExpired { .. })
        ));
    }

    #[test]
    fn test_historical_flow_names_deserialize() {
        let flow: FlowType = serde_json::from_str("\"attestation\"").unwrap();
        assert_eq!(flow, FlowType::Registration);
        let flow: FlowType = serde_json::from_str("\"assertion\"").unwrap();
        assert_eq!(flow, FlowType::Login);
    }
}
