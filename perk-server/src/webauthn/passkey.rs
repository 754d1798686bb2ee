//! Ceremony implementation backed by webauthn-rs
//!
//! Built on the library's security-key ceremonies, whose verification policy
//! leaves user verification to the caller: the configured [`Factor`] decides
//! what browsers are asked for and what an assertion must show. Ceremony
//! state is carried as the serialized `SecurityKeyRegistration` /
//! `SecurityKeyAuthentication`. Perk assertions sign a challenge the caller
//! chose, so verifying one starts a fresh authentication and re-targets its
//! state at that challenge and at the expected counter baseline.

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use perk_core::CredentialRecord;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use webauthn_rs::prelude::{
    PublicKeyCredential, RegisterPublicKeyCredential, SecurityKey, SecurityKeyAuthentication,
    SecurityKeyRegistration, Uuid, WebauthnError,
};

use super::ceremony::{
    counter_regressed, AssertionExpectations, Ceremony, CeremonyError, CeremonyStart,
    CeremonyUser, Factor, LoginOutcome, VerifiedAssertion,
};
use super::types::{AssertionResponse, AttestationResponse};
use super::WebAuthnConfig;

pub struct PasskeyCeremony {
    config: WebAuthnConfig,
}

impl PasskeyCeremony {
    pub fn new(config: WebAuthnConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &WebAuthnConfig {
        &self.config
    }

    fn start_authentication(&self, record: &CredentialRecord) -> Result<(Value, Value), CeremonyError> {
        let key: SecurityKey = from_state(record.public_key.clone())?;
        let (rcr, state) = self
            .config
            .webauthn()
            .start_securitykey_authentication(&[key])
            .map_err(internal)?;

        let mut options = to_state(&rcr)?;
        if let Some(public_key) = options.get_mut("publicKey").and_then(Value::as_object_mut) {
            public_key.insert(
                "userVerification".into(),
                Value::from(self.config.factor().user_verification()),
            );
        }
        Ok((options, to_state(&state)?))
    }

    fn finish_authentication(
        &self,
        state: &SecurityKeyAuthentication,
        car: &AssertionResponse,
        factor: Factor,
    ) -> Result<(u32, bool), CeremonyError> {
        let credential: PublicKeyCredential = from_client(assertion_json(car))?;
        let result = self
            .config
            .webauthn()
            .finish_securitykey_authentication(&credential, state)
            .map_err(rejected)?;
        if !factor.accepts(result.user_verified()) {
            return Err(CeremonyError::Rejected("user verification required".into()));
        }
        Ok((result.counter(), result.user_verified()))
    }
}

impl std::fmt::Debug for PasskeyCeremony {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasskeyCeremony")
            .field("config", &self.config)
            .finish()
    }
}

fn to_state<T: Serialize>(value: &T) -> Result<Value, CeremonyError> {
    serde_json::to_value(value).map_err(|e| CeremonyError::Internal(e.to_string()))
}

/// Parse library state we produced ourselves
fn from_state<T: DeserializeOwned>(value: Value) -> Result<T, CeremonyError> {
    serde_json::from_value(value).map_err(|e| CeremonyError::Internal(e.to_string()))
}

/// Parse a client-supplied structure
fn from_client<T: DeserializeOwned>(value: Value) -> Result<T, CeremonyError> {
    serde_json::from_value(value)
        .map_err(|e| CeremonyError::Rejected(format!("malformed credential response: {e}")))
}

fn rejected(err: WebauthnError) -> CeremonyError {
    match err {
        WebauthnError::CredentialPossibleCompromise => CeremonyError::PossibleClone,
        other => CeremonyError::Rejected(other.to_string()),
    }
}

fn internal(err: WebauthnError) -> CeremonyError {
    CeremonyError::Internal(err.to_string())
}

fn credential_id_bytes(key: &SecurityKey) -> Vec<u8> {
    let id: &[u8] = key.cred_id().as_ref();
    id.to_vec()
}

/// Counter the library recorded for a serialized security key
fn stored_counter(public_key: &Value) -> u32 {
    public_key
        .pointer("/cred/counter")
        .and_then(Value::as_u64)
        .and_then(|counter| u32::try_from(counter).ok())
        .unwrap_or(0)
}

/// Library JSON form of a creation response
fn registration_json(ccr: &AttestationResponse) -> Value {
    json!({
        "id": ccr.credential_id(),
        "rawId": ccr.raw_id,
        "response": {
            "attestationObject": ccr.response.attestation_object,
            "clientDataJSON": ccr.response.client_data_json,
        },
        "extensions": {},
        "type": ccr.kind,
    })
}

/// Library JSON form of an assertion response
fn assertion_json(car: &AssertionResponse) -> Value {
    json!({
        "id": car.credential_id(),
        "rawId": car.raw_id,
        "response": {
            "authenticatorData": car.response.authenticator_data,
            "clientDataJSON": car.response.client_data_json,
            "signature": car.response.signature,
            "userHandle": car.response.user_handle,
        },
        "extensions": {},
        "type": car.kind,
    })
}

/// Point a serialized authentication state at `challenge` with every allowed
/// credential's counter set to `baseline`
fn retarget_authentication(
    state: &mut Value,
    challenge: &[u8],
    baseline: u32,
) -> Result<(), CeremonyError> {
    let layout = || CeremonyError::Internal("unexpected authentication state layout".into());

    let slot = state.pointer_mut("/ast/challenge").ok_or_else(layout)?;
    *slot = Value::String(URL_SAFE_NO_PAD.encode(challenge));

    let credentials = state
        .pointer_mut("/ast/credentials")
        .and_then(Value::as_array_mut)
        .ok_or_else(layout)?;
    for credential in credentials {
        let fields = credential.as_object_mut().ok_or_else(layout)?;
        fields.insert("counter".into(), Value::from(baseline));
    }
    Ok(())
}

fn require_credential(car: &AssertionResponse, record: &CredentialRecord) -> Result<(), CeremonyError> {
    if car.raw_id.as_slice() != record.credential_id.as_slice() {
        return Err(CeremonyError::Rejected(
            "assertion was made with a different credential".into(),
        ));
    }
    Ok(())
}

#[async_trait]
impl Ceremony for PasskeyCeremony {
    async fn begin_registration(&self, user: &CeremonyUser) -> Result<CeremonyStart, CeremonyError> {
        let (ccr, state) = self
            .config
            .webauthn()
            .start_securitykey_registration(
                Uuid::from_bytes(user.handle),
                &user.name,
                &user.display_name,
                None,
                None,
                None,
            )
            .map_err(internal)?;

        let mut options = to_state(&ccr)?;
        if let Some(public_key) = options.get_mut("publicKey").and_then(Value::as_object_mut) {
            public_key.insert(
                "attestation".into(),
                Value::from(self.config.attestation().as_str()),
            );
            let selection = public_key
                .entry("authenticatorSelection")
                .or_insert_with(|| json!({}));
            if let Some(selection) = selection.as_object_mut() {
                selection.insert(
                    "userVerification".into(),
                    Value::from(self.config.factor().user_verification()),
                );
            }
        }

        Ok(CeremonyStart {
            options,
            state: to_state(&state)?,
        })
    }

    async fn finish_registration(
        &self,
        state: &Value,
        ccr: &AttestationResponse,
    ) -> Result<CredentialRecord, CeremonyError> {
        let state: SecurityKeyRegistration = from_state(state.clone())?;
        let credential: RegisterPublicKeyCredential = from_client(registration_json(ccr))?;

        let key = self
            .config
            .webauthn()
            .finish_securitykey_registration(&credential, &state)
            .map_err(rejected)?;

        let public_key = to_state(&key)?;
        Ok(CredentialRecord {
            sign_count: stored_counter(&public_key),
            credential_id: credential_id_bytes(&key),
            public_key,
        })
    }

    async fn begin_login(&self, record: &CredentialRecord) -> Result<CeremonyStart, CeremonyError> {
        let (options, state) = self.start_authentication(record)?;
        Ok(CeremonyStart { options, state })
    }

    async fn finish_login(
        &self,
        state: &Value,
        car: &AssertionResponse,
        record: &CredentialRecord,
    ) -> Result<LoginOutcome, CeremonyError> {
        require_credential(car, record)?;
        let state: SecurityKeyAuthentication = from_state(state.clone())?;
        let (counter, user_verified) =
            self.finish_authentication(&state, car, self.config.factor())?;

        if counter_regressed(counter, record.sign_count) {
            return Err(CeremonyError::PossibleClone);
        }

        Ok(LoginOutcome {
            counter,
            user_verified,
        })
    }

    async fn verify_assertion(
        &self,
        record: &CredentialRecord,
        car: &AssertionResponse,
        expectations: &AssertionExpectations,
    ) -> Result<VerifiedAssertion, CeremonyError> {
        require_credential(car, record)?;

        let client_data = car.response.client_data_json.parse()?;
        if client_data.kind != "webauthn.get" {
            return Err(CeremonyError::Rejected(format!(
                "unexpected client data type {}",
                client_data.kind
            )));
        }
        if client_data.origin != expectations.origin {
            return Err(CeremonyError::Rejected(format!(
                "origin {} does not match expected {}",
                client_data.origin, expectations.origin
            )));
        }
        if let (Some(expected), Some(actual)) = (&expectations.user_handle, car.user_handle()) {
            if expected.as_slice() != actual {
                return Err(CeremonyError::Rejected("user handle mismatch".into()));
            }
        }
        let challenge = car.response.client_data_json.challenge()?;

        let (_, mut state) = self.start_authentication(record)?;
        retarget_authentication(&mut state, &challenge, expectations.prev_counter)?;
        let state: SecurityKeyAuthentication = from_state(state)?;

        let (counter, user_verified) =
            self.finish_authentication(&state, car, expectations.factor)?;
        if counter_regressed(counter, expectations.prev_counter) {
            return Err(CeremonyError::PossibleClone);
        }

        Ok(VerifiedAssertion {
            challenge,
            counter,
            user_verified,
        })
    }

    fn name(&self) -> &'static str {
        "webauthn-rs"
    }
}
