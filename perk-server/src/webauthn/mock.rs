//! Software ceremony for tests and local development
//!
//! [`SoftAuthenticator`] plays the browser and security key; [`MockCeremony`]
//! plays the WebAuthn library. They share a deterministic signature scheme
//! (`SHA3-256(public_key || authenticator_data || SHA3-256(clientDataJSON))`)
//! that offers no security and exists so the whole protocol can run without
//! a browser. The authenticator data layout follows WebAuthn: 32-byte RP id
//! hash, one flags byte, then a big-endian 32-bit counter.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use perk_core::CredentialRecord;
use serde_json::{json, Value};
use sha3::{Digest, Sha3_256};

use super::ceremony::{
    counter_regressed, AssertionExpectations, Ceremony, CeremonyError, CeremonyStart,
    CeremonyUser, LoginOutcome, VerifiedAssertion,
};
use super::types::{
    AssertionPayload, AssertionResponse, AttestationPayload, AttestationResponse, ByteBuf,
    ClientDataJson,
};

const FLAG_USER_PRESENT: u8 = 0x01;
const FLAG_USER_VERIFIED: u8 = 0x04;
const AUTH_DATA_LEN: usize = 37;

fn sign(public_key: &[u8], authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let client_hash = Sha3_256::digest(client_data_json);
    let mut hasher = Sha3_256::new();
    hasher.update(public_key);
    hasher.update(authenticator_data);
    hasher.update(client_hash);
    hasher.finalize().to_vec()
}

fn random_bytes() -> Vec<u8> {
    let mut bytes = uuid::Uuid::new_v4().as_bytes().to_vec();
    bytes.extend_from_slice(uuid::Uuid::new_v4().as_bytes());
    bytes
}

fn challenge_from_options(options: &Value) -> Option<Vec<u8>> {
    let text = options.pointer("/publicKey/challenge")?.as_str()?;
    URL_SAFE_NO_PAD.decode(text).ok()
}

/// A software security key holding one credential
#[derive(Debug)]
pub struct SoftAuthenticator {
    credential_id: Vec<u8>,
    public_key: Vec<u8>,
    origin: String,
    counter: AtomicU32,
    user_verified: bool,
    user_handle: Option<Vec<u8>>,
}

impl SoftAuthenticator {
    /// New credential that reports `origin` in its client data
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            credential_id: random_bytes()[..16].to_vec(),
            public_key: Sha3_256::digest(random_bytes()).to_vec(),
            origin: origin.into(),
            counter: AtomicU32::new(0),
            user_verified: true,
            user_handle: None,
        }
    }

    /// Report user presence only
    pub fn without_user_verification(mut self) -> Self {
        self.user_verified = false;
        self
    }

    pub fn with_user_handle(mut self, handle: &[u8]) -> Self {
        self.user_handle = Some(handle.to_vec());
        self
    }

    pub fn credential_id(&self) -> &[u8] {
        &self.credential_id
    }

    pub fn counter(&self) -> u32 {
        self.counter.load(Ordering::SeqCst)
    }

    /// Force the next assertion's counter (e.g. to simulate a cloned key)
    pub fn set_counter(&self, counter: u32) {
        self.counter.store(counter, Ordering::SeqCst);
    }

    fn client_data(&self, kind: &str, challenge: &[u8]) -> ClientDataJson {
        let document = json!({
            "type": kind,
            "challenge": URL_SAFE_NO_PAD.encode(challenge),
            "origin": self.origin,
        });
        ClientDataJson(document.to_string().into_bytes())
    }

    fn authenticator_data(&self, counter: u32) -> Vec<u8> {
        let mut flags = FLAG_USER_PRESENT;
        if self.user_verified {
            flags |= FLAG_USER_VERIFIED;
        }
        let mut data = Sha3_256::digest(self.origin.as_bytes()).to_vec();
        data.push(flags);
        data.extend_from_slice(&counter.to_be_bytes());
        data
    }

    /// Answer creation options from a registration discovery
    pub fn attest(&self, options: &Value) -> AttestationResponse {
        let challenge = challenge_from_options(options).unwrap_or_default();
        let attestation = json!({
            "fmt": "soft",
            "publicKey": URL_SAFE_NO_PAD.encode(&self.public_key),
            "counter": self.counter(),
        });

        AttestationResponse {
            id: URL_SAFE_NO_PAD.encode(&self.credential_id),
            raw_id: ByteBuf(self.credential_id.clone()),
            response: AttestationPayload {
                attestation_object: ByteBuf(attestation.to_string().into_bytes()),
                client_data_json: self.client_data("webauthn.create", &challenge),
                transports: None,
            },
            kind: "public-key".into(),
        }
    }

    /// Sign an arbitrary challenge, advancing the counter
    pub fn assert(&self, challenge: &[u8]) -> AssertionResponse {
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let authenticator_data = self.authenticator_data(counter);
        let client_data_json = self.client_data("webauthn.get", challenge);
        let signature = sign(&self.public_key, &authenticator_data, &client_data_json.0);

        AssertionResponse {
            id: URL_SAFE_NO_PAD.encode(&self.credential_id),
            raw_id: ByteBuf(self.credential_id.clone()),
            response: AssertionPayload {
                authenticator_data: ByteBuf(authenticator_data),
                client_data_json,
                signature: ByteBuf(signature),
                user_handle: self.user_handle.clone().map(ByteBuf),
            },
            kind: "public-key".into(),
        }
    }

    /// Answer request options from a login discovery
    pub fn assert_options(&self, options: &Value) -> AssertionResponse {
        self.assert(&challenge_from_options(options).unwrap_or_default())
    }
}

/// Ceremony double that verifies [`SoftAuthenticator`] output
#[derive(Debug, Clone)]
pub struct MockCeremony {
    origin: String,
}

impl MockCeremony {
    /// Accept ceremonies whose client data reports `origin`
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
        }
    }
}

struct CheckedAssertion {
    challenge: Vec<u8>,
    origin: String,
    counter: u32,
    user_verified: bool,
}

fn state_challenge(state: &Value) -> Result<String, CeremonyError> {
    state
        .get("challenge")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| CeremonyError::Internal("ceremony state has no challenge".into()))
}

fn record_public_key(record: &CredentialRecord) -> Result<Vec<u8>, CeremonyError> {
    record
        .public_key
        .get("soft")
        .and_then(Value::as_str)
        .and_then(|text| URL_SAFE_NO_PAD.decode(text).ok())
        .ok_or_else(|| CeremonyError::Internal("record does not hold a soft public key".into()))
}

/// Signature and structure checks common to login and perk verification
fn check_assertion(
    record: &CredentialRecord,
    car: &AssertionResponse,
) -> Result<CheckedAssertion, CeremonyError> {
    if car.raw_id.as_slice() != record.credential_id.as_slice() {
        return Err(CeremonyError::Rejected(
            "assertion was made with a different credential".into(),
        ));
    }

    let client_data = car.response.client_data_json.parse()?;
    if client_data.kind != "webauthn.get" {
        return Err(CeremonyError::Rejected(format!(
            "unexpected client data type {}",
            client_data.kind
        )));
    }

    let auth_data = car.response.authenticator_data.as_slice();
    if auth_data.len() < AUTH_DATA_LEN {
        return Err(CeremonyError::Rejected("authenticator data too short".into()));
    }
    let flags = auth_data[32];
    if flags & FLAG_USER_PRESENT == 0 {
        return Err(CeremonyError::Rejected("user not present".into()));
    }

    let expected = sign(
        &record_public_key(record)?,
        auth_data,
        &car.response.client_data_json.0,
    );
    if expected != car.response.signature.0 {
        return Err(CeremonyError::Rejected("signature validation failed".into()));
    }

    let mut counter = [0u8; 4];
    counter.copy_from_slice(&auth_data[33..AUTH_DATA_LEN]);

    Ok(CheckedAssertion {
        challenge: car.response.client_data_json.challenge()?,
        origin: client_data.origin,
        counter: u32::from_be_bytes(counter),
        user_verified: flags & FLAG_USER_VERIFIED != 0,
    })
}

#[async_trait]
impl Ceremony for MockCeremony {
    async fn begin_registration(&self, user: &CeremonyUser) -> Result<CeremonyStart, CeremonyError> {
        let challenge = URL_SAFE_NO_PAD.encode(random_bytes());
        Ok(CeremonyStart {
            options: json!({
                "publicKey": {
                    "challenge": challenge,
                    "rp": { "name": "mock" },
                    "user": {
                        "id": URL_SAFE_NO_PAD.encode(user.handle),
                        "name": user.name,
                        "displayName": user.display_name,
                    },
                    "pubKeyCredParams": [{ "type": "public-key", "alg": -7 }],
                    "attestation": "none",
                }
            }),
            state: json!({ "challenge": challenge }),
        })
    }

    async fn finish_registration(
        &self,
        state: &Value,
        ccr: &AttestationResponse,
    ) -> Result<CredentialRecord, CeremonyError> {
        let client_data = ccr.response.client_data_json.parse()?;
        if client_data.kind != "webauthn.create" {
            return Err(CeremonyError::Rejected(format!(
                "unexpected client data type {}",
                client_data.kind
            )));
        }
        if client_data.challenge != state_challenge(state)? {
            return Err(CeremonyError::Rejected("challenge mismatch".into()));
        }
        if client_data.origin != self.origin {
            return Err(CeremonyError::Rejected("origin mismatch".into()));
        }

        let attestation: Value = serde_json::from_slice(ccr.response.attestation_object.as_slice())
            .map_err(|e| CeremonyError::Rejected(format!("invalid attestation object: {e}")))?;
        let public_key = attestation
            .get("publicKey")
            .and_then(Value::as_str)
            .ok_or_else(|| CeremonyError::Rejected("attestation carries no public key".into()))?;
        let counter = attestation
            .get("counter")
            .and_then(Value::as_u64)
            .and_then(|c| u32::try_from(c).ok())
            .unwrap_or(0);

        Ok(CredentialRecord {
            public_key: json!({ "soft": public_key }),
            credential_id: ccr.raw_id.0.clone(),
            sign_count: counter,
        })
    }

    async fn begin_login(&self, record: &CredentialRecord) -> Result<CeremonyStart, CeremonyError> {
        let challenge = URL_SAFE_NO_PAD.encode(random_bytes());
        Ok(CeremonyStart {
            options: json!({
                "publicKey": {
                    "challenge": challenge,
                    "allowCredentials": [{
                        "type": "public-key",
                        "id": URL_SAFE_NO_PAD.encode(&record.credential_id),
                    }],
                    "userVerification": "preferred",
                }
            }),
            state: json!({ "challenge": challenge }),
        })
    }

    async fn finish_login(
        &self,
        state: &Value,
        car: &AssertionResponse,
        record: &CredentialRecord,
    ) -> Result<LoginOutcome, CeremonyError> {
        let checked = check_assertion(record, car)?;
        if URL_SAFE_NO_PAD.encode(&checked.challenge) != state_challenge(state)? {
            return Err(CeremonyError::Rejected("challenge mismatch".into()));
        }
        if checked.origin != self.origin {
            return Err(CeremonyError::Rejected("origin mismatch".into()));
        }
        if counter_regressed(checked.counter, record.sign_count) {
            return Err(CeremonyError::PossibleClone);
        }

        Ok(LoginOutcome {
            counter: checked.counter,
            user_verified: checked.user_verified,
        })
    }

    async fn verify_assertion(
        &self,
        record: &CredentialRecord,
        car: &AssertionResponse,
        expectations: &AssertionExpectations,
    ) -> Result<VerifiedAssertion, CeremonyError> {
        let checked = check_assertion(record, car)?;
        if checked.origin != expectations.origin {
            return Err(CeremonyError::Rejected(format!(
                "origin {} does not match expected {}",
                checked.origin, expectations.origin
            )));
        }
        if let (Some(expected), Some(actual)) = (&expectations.user_handle, car.user_handle()) {
            if expected.as_slice() != actual {
                return Err(CeremonyError::Rejected("user handle mismatch".into()));
            }
        }
        if counter_regressed(checked.counter, expectations.prev_counter) {
            return Err(CeremonyError::PossibleClone);
        }
        if !expectations.factor.accepts(checked.user_verified) {
            return Err(CeremonyError::Rejected("user verification required".into()));
        }

        Ok(VerifiedAssertion {
            challenge: checked.challenge,
            counter: checked.counter,
            user_verified: checked.user_verified,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
