//! Credential controller: discovery, registration and login per identity
//!
//! Routes are addressed by identity name (`/cred/{id}/`). Names outside the
//! configured table answer 404 before any store access.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use perk_core::{
    ChallengeTransport, CredentialRegistry, FlowType, Identity, IdentityTable, SessionData,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use super::json_body;
use crate::error::ApiError;
use crate::state::AppState;
use crate::webauthn::{AssertionResponse, AttestationResponse, Ceremony, CeremonyUser};

/// Registration options for an identity without a credential
#[derive(Debug, Serialize, ToSchema)]
pub struct RegistrationChallenge {
    /// Credential creation options for `navigator.credentials.create`
    #[schema(value_type = Object)]
    pub options: Value,
    #[schema(value_type = Object)]
    pub session_data: SessionData,
}

/// Login options for an identity with a credential
#[derive(Debug, Serialize, ToSchema)]
pub struct LoginChallenge {
    pub issuer_id: String,
    /// Credential request options for `navigator.credentials.get`
    #[schema(value_type = Object)]
    pub options: Value,
    #[schema(value_type = Object)]
    pub session_data: SessionData,
}

/// Outcome of discovery: which ceremony the client should run
#[derive(Debug)]
pub enum Discovery {
    Register(RegistrationChallenge),
    Login(LoginChallenge),
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegistrationRequest {
    /// Credential creation response from the browser
    #[schema(value_type = Object)]
    pub ccr: AttestationResponse,
    #[schema(value_type = Object)]
    pub session_data: SessionData,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    /// Credential assertion response from the browser
    #[schema(value_type = Object)]
    #[serde(alias = "assertion")]
    pub car: AssertionResponse,
    #[schema(value_type = Object)]
    pub session_data: SessionData,
}

/// Drives registration and login for one identity table
pub struct CredController {
    identities: Arc<IdentityTable>,
    registry: CredentialRegistry,
    ceremony: Arc<dyn Ceremony>,
    challenges: Arc<dyn ChallengeTransport>,
}

pub(crate) fn issue(
    challenges: &dyn ChallengeTransport,
    identity: &str,
    flow: FlowType,
    state: &Value,
) -> Result<SessionData, ApiError> {
    challenges
        .issue(identity, flow, state)
        .map_err(|e| ApiError::internal(format!("failed to seal session data: {e}")))
}

impl CredController {
    pub fn new(
        identities: Arc<IdentityTable>,
        registry: CredentialRegistry,
        ceremony: Arc<dyn Ceremony>,
        challenges: Arc<dyn ChallengeTransport>,
    ) -> Self {
        Self {
            identities,
            registry,
            ceremony,
            challenges,
        }
    }

    pub fn identities(&self) -> &Arc<IdentityTable> {
        &self.identities
    }

    pub fn ceremony(&self) -> &Arc<dyn Ceremony> {
        &self.ceremony
    }

    pub fn challenges(&self) -> &Arc<dyn ChallengeTransport> {
        &self.challenges
    }

    /// Look up a configured identity by name
    pub fn resolve(&self, name: &str) -> Result<&Identity, ApiError> {
        self.identities
            .resolve(name)
            .ok_or_else(|| ApiError::not_found(format!("unknown identity {name:?}")))
    }

    /// Look up the identity a session was issued for
    pub fn resolve_session(&self, session_data: &SessionData) -> Result<&Identity, ApiError> {
        let header = self.challenges.peek(session_data)?;
        self.identities
            .by_hash(&header.identity)
            .ok_or(ApiError::Challenge(perk_core::ChallengeError::WrongIdentity))
    }

    fn user(identity: &Identity) -> CeremonyUser {
        CeremonyUser {
            handle: identity.user_handle(),
            name: identity.name.clone(),
            display_name: identity.name.clone(),
        }
    }

    /// Begin registration or login depending on whether a record exists
    pub async fn discover(&self, identity: &Identity) -> Result<Discovery, ApiError> {
        match self.registry.get(&identity.hash).await? {
            None => {
                let start = self.ceremony.begin_registration(&Self::user(identity)).await?;
                let session_data = issue(
                    self.challenges.as_ref(),
                    &identity.hash,
                    FlowType::Registration,
                    &start.state,
                )?;
                tracing::debug!(identity = %identity.name, "Registration challenge issued");
                Ok(Discovery::Register(RegistrationChallenge {
                    options: start.options,
                    session_data,
                }))
            }
            Some(stored) => {
                let start = self.ceremony.begin_login(&stored.record).await?;
                let session_data = issue(
                    self.challenges.as_ref(),
                    &identity.hash,
                    FlowType::Login,
                    &start.state,
                )?;
                tracing::debug!(identity = %identity.name, "Login challenge issued");
                Ok(Discovery::Login(LoginChallenge {
                    issuer_id: stored.issuer_id,
                    options: start.options,
                    session_data,
                }))
            }
        }
    }

    /// Verify an attestation and create the identity's record.
    ///
    /// Returns login options for the new credential so the client can prove
    /// possession straight away.
    pub async fn complete_registration(
        &self,
        identity: &Identity,
        ccr: &AttestationResponse,
        session_data: &SessionData,
    ) -> Result<LoginChallenge, ApiError> {
        let state = self
            .challenges
            .redeem(session_data, &identity.hash, FlowType::Registration)?;
        let record = self.ceremony.finish_registration(&state, ccr).await?;

        let issuer_id = self.registry.put(&identity.hash, &record, false).await?;
        self.registry.deploy().await?;

        tracing::info!(
            identity = %identity.name,
            issuer_id = %issuer_id,
            credential_id = %ccr.credential_id(),
            "Credential registered"
        );

        let start = self.ceremony.begin_login(&record).await?;
        let session_data = issue(
            self.challenges.as_ref(),
            &identity.hash,
            FlowType::Login,
            &start.state,
        )?;

        Ok(LoginChallenge {
            issuer_id,
            options: start.options,
            session_data,
        })
    }

    /// Verify an assertion against the identity's record. Nothing is written.
    pub async fn complete_login(
        &self,
        identity: &Identity,
        car: &AssertionResponse,
        session_data: &SessionData,
    ) -> Result<String, ApiError> {
        let state = self
            .challenges
            .redeem(session_data, &identity.hash, FlowType::Login)?;
        let stored = self
            .registry
            .get(&identity.hash)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("no credential for {:?}", identity.name)))?;

        let outcome = self
            .ceremony
            .finish_login(&state, car, &stored.record)
            .await?;

        tracing::info!(
            identity = %identity.name,
            issuer_id = %stored.issuer_id,
            counter = outcome.counter,
            user_verified = outcome.user_verified,
            "Login verified"
        );
        Ok(stored.issuer_id)
    }
}

/// GET /cred/{id}/
#[utoipa::path(
    get,
    path = "/cred/{id}/",
    tag = "Credentials",
    params(("id" = String, Path, description = "Configured identity name")),
    responses(
        (status = 200, description = "Identity has a credential; login options", body = LoginChallenge),
        (status = 404, description = "No credential yet; registration options (or unknown identity)", body = RegistrationChallenge),
        (status = 500, description = "Storage failure")
    )
)]
pub async fn discover_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let identity = state.users.resolve(&id)?;
    Ok(match state.users.discover(identity).await? {
        Discovery::Register(challenge) => (StatusCode::NOT_FOUND, Json(challenge)).into_response(),
        Discovery::Login(challenge) => (StatusCode::OK, Json(challenge)).into_response(),
    })
}

/// PUT /cred/{id}/
#[utoipa::path(
    put,
    path = "/cred/{id}/",
    tag = "Credentials",
    params(("id" = String, Path, description = "Configured identity name")),
    request_body = RegistrationRequest,
    responses(
        (status = 201, description = "Credential registered; login options", body = LoginChallenge),
        (status = 400, description = "Invalid session data or attestation"),
        (status = 404, description = "Unknown identity"),
        (status = 409, description = "Identity already has a credential")
    )
)]
pub async fn register_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<RegistrationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LoginChallenge>), ApiError> {
    let identity = state.users.resolve(&id)?;
    let request = json_body(payload)?;
    let challenge = state
        .users
        .complete_registration(identity, &request.ccr, &request.session_data)
        .await?;
    Ok((StatusCode::CREATED, Json(challenge)))
}

/// POST /cred/{id}/
#[utoipa::path(
    post,
    path = "/cred/{id}/",
    tag = "Credentials",
    params(("id" = String, Path, description = "Configured identity name")),
    request_body = LoginRequest,
    responses(
        (status = 204, description = "Assertion verified"),
        (status = 400, description = "Invalid session data or assertion"),
        (status = 403, description = "Counter did not advance, credential may be cloned"),
        (status = 404, description = "Unknown identity or no credential")
    )
)]
pub async fn login_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let identity = state.users.resolve(&id)?;
    let request = json_body(payload)?;
    state
        .users
        .complete_login(identity, &request.car, &request.session_data)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
