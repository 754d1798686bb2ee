//! Access-control delegation
//!
//! Access administrators register and log in like users (against their own
//! identity table) and keep a list of end-user registration codes. A code is
//! a credential record sealed under the credential secret key, obtained by
//! running an enrollment ceremony (`flow_type=access`). Replacing the list
//! is itself a perk exchange: the administrator signs
//! `{encrypted_credentials: [...]}` with its registered credential.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use perk_core::{FlowType, GrantEntry, GrantVault, SessionData};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::cred::{issue, CredController, Discovery, LoginChallenge, RegistrationChallenge};
use super::json_body;
use crate::authz::{Authorize, AuthzToken};
use crate::error::ApiError;
use crate::state::AppState;
use crate::webauthn::{AssertionResponse, AttestationResponse, CeremonyUser, ExpectationOverrides};

/// Challenge identity of enrollment ceremonies
pub const ENROLLMENT_IDENTITY: &str = "access";

/// An administrator's list of registration codes
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GrantList {
    #[schema(value_type = Vec<Object>)]
    pub encrypted_credentials: Vec<GrantEntry>,
}

/// Administrator registration result
#[derive(Debug, Serialize, ToSchema)]
pub struct AdminRegistered {
    #[serde(flatten)]
    pub login: LoginChallenge,
    #[schema(value_type = Vec<Object>)]
    pub encrypted_credentials: Vec<GrantEntry>,
}

/// Body of `POST /access/`; the shape selects the operation
#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum AccessRequest {
    /// Signed list update
    Update {
        issuer_id: String,
        #[schema(value_type = Object)]
        #[serde(alias = "assertion")]
        car: AssertionResponse,
    },
    /// Enrollment or administrator registration, depending on the session's flow
    Register {
        #[schema(value_type = Object)]
        ccr: AttestationResponse,
        #[schema(value_type = Object)]
        session_data: SessionData,
    },
    /// Administrator login
    Login {
        #[schema(value_type = Object)]
        #[serde(alias = "assertion")]
        car: AssertionResponse,
        #[schema(value_type = Object)]
        session_data: SessionData,
    },
}

pub struct AccessController {
    admins: CredController,
    authorizer: Arc<dyn Authorize>,
    overrides: ExpectationOverrides,
    vault: GrantVault,
}

impl AccessController {
    pub fn new(
        admins: CredController,
        authorizer: Arc<dyn Authorize>,
        overrides: ExpectationOverrides,
        vault: GrantVault,
    ) -> Self {
        Self {
            admins,
            authorizer,
            overrides,
            vault,
        }
    }

    pub fn admins(&self) -> &CredController {
        &self.admins
    }

    /// Begin an enrollment ceremony for an end user
    pub async fn begin_enrollment(&self) -> Result<RegistrationChallenge, ApiError> {
        let user = CeremonyUser {
            handle: *uuid::Uuid::new_v4().as_bytes(),
            name: ENROLLMENT_IDENTITY.to_string(),
            display_name: ENROLLMENT_IDENTITY.to_string(),
        };
        let start = self.admins.ceremony().begin_registration(&user).await?;
        let session_data = issue(
            self.admins.challenges().as_ref(),
            ENROLLMENT_IDENTITY,
            FlowType::Access,
            &start.state,
        )?;
        Ok(RegistrationChallenge {
            options: start.options,
            session_data,
        })
    }

    /// Finish enrollment, returning a one-entry list with the sealed record
    pub async fn complete_enrollment(
        &self,
        ccr: &AttestationResponse,
        session_data: &SessionData,
    ) -> Result<Vec<GrantEntry>, ApiError> {
        let state = self
            .admins
            .challenges()
            .redeem(session_data, ENROLLMENT_IDENTITY, FlowType::Access)?;
        let record = self
            .admins
            .ceremony()
            .finish_registration(&state, ccr)
            .await?;
        let encrypted_credential = self
            .vault
            .seal_credential(&record)
            .map_err(|e| ApiError::internal(e.to_string()))?;

        tracing::info!(credential_id = %ccr.credential_id(), "Enrollment completed");
        Ok(vec![GrantEntry {
            id: String::new(),
            encrypted_credential,
        }])
    }

    pub async fn register_admin(
        &self,
        ccr: &AttestationResponse,
        session_data: &SessionData,
    ) -> Result<AdminRegistered, ApiError> {
        let admin = self.admins.resolve_session(session_data)?;
        let login = self
            .admins
            .complete_registration(admin, ccr, session_data)
            .await?;
        let encrypted_credentials = self.vault.list(&admin.hash).await?;
        Ok(AdminRegistered {
            login,
            encrypted_credentials,
        })
    }

    pub async fn login_admin(
        &self,
        car: &AssertionResponse,
        session_data: &SessionData,
    ) -> Result<Vec<GrantEntry>, ApiError> {
        let admin = self.admins.resolve_session(session_data)?;
        self.admins.complete_login(admin, car, session_data).await?;
        Ok(self.vault.list(&admin.hash).await?)
    }

    /// Replace the signing administrator's list
    pub async fn update(
        &self,
        host: Option<&str>,
        issuer_id: String,
        car: AssertionResponse,
    ) -> Result<Vec<GrantEntry>, ApiError> {
        let expectations = self
            .overrides
            .resolve(host, &car)
            .map_err(|e| ApiError::bad_request(e.to_string()))?;
        let info = self
            .authorizer
            .authorize(&AuthzToken {
                issuer_id,
                assertion: car,
                expectations,
            })
            .await?;

        let list: GrantList = serde_json::from_value(info.payload)
            .map_err(|e| ApiError::PayloadInvalid(e.to_string()))?;
        self.vault.replace(&info.hash, &list.encrypted_credentials).await?;

        tracing::info!(
            admin = %info.uri,
            granted = list.encrypted_credentials.len(),
            "Access list updated"
        );
        Ok(list.encrypted_credentials)
    }

    async fn dispatch(&self, host: Option<&str>, request: AccessRequest) -> Result<Response, ApiError> {
        match request {
            AccessRequest::Update { issuer_id, car } => {
                let encrypted_credentials = self.update(host, issuer_id, car).await?;
                Ok(Json(GrantList {
                    encrypted_credentials,
                })
                .into_response())
            }
            AccessRequest::Register { ccr, session_data } => {
                match self.admins.challenges().peek(&session_data)?.flow {
                    FlowType::Access => {
                        let encrypted_credentials =
                            self.complete_enrollment(&ccr, &session_data).await?;
                        Ok(Json(GrantList {
                            encrypted_credentials,
                        })
                        .into_response())
                    }
                    _ => {
                        let registered = self.register_admin(&ccr, &session_data).await?;
                        Ok((StatusCode::CREATED, Json(registered)).into_response())
                    }
                }
            }
            AccessRequest::Login { car, session_data } => {
                let encrypted_credentials = self.login_admin(&car, &session_data).await?;
                Ok(Json(GrantList {
                    encrypted_credentials,
                })
                .into_response())
            }
        }
    }
}

fn controller(state: &AppState) -> Result<&AccessController, ApiError> {
    state
        .access
        .as_deref()
        .ok_or_else(|| ApiError::not_found("access control is not enabled"))
}

/// GET /access/
#[utoipa::path(
    get,
    path = "/access/",
    tag = "Access",
    responses(
        (status = 200, description = "Enrollment options", body = RegistrationChallenge),
        (status = 404, description = "Access control not enabled")
    )
)]
pub async fn enroll_handler(
    State(state): State<AppState>,
) -> Result<Json<RegistrationChallenge>, ApiError> {
    Ok(Json(controller(&state)?.begin_enrollment().await?))
}

/// GET /access/{id}/
#[utoipa::path(
    get,
    path = "/access/{id}/",
    tag = "Access",
    params(("id" = String, Path, description = "Configured administrator name")),
    responses(
        (status = 200, description = "Administrator has a credential; login options", body = LoginChallenge),
        (status = 404, description = "No credential yet; registration options (or unknown administrator)", body = RegistrationChallenge)
    )
)]
pub async fn admin_discover_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let admins = controller(&state)?.admins();
    let admin = admins.resolve(&id)?;
    Ok(match admins.discover(admin).await? {
        Discovery::Register(challenge) => (StatusCode::NOT_FOUND, Json(challenge)).into_response(),
        Discovery::Login(challenge) => Json(challenge).into_response(),
    })
}

/// POST /access/
#[utoipa::path(
    post,
    path = "/access/",
    tag = "Access",
    request_body = AccessRequest,
    responses(
        (status = 200, description = "Enrollment code, current list or updated list", body = GrantList),
        (status = 201, description = "Administrator registered", body = AdminRegistered),
        (status = 400, description = "Invalid session data, assertion or registration code"),
        (status = 403, description = "Counter did not advance, credential may be cloned"),
        (status = 409, description = "Administrator already has a credential")
    )
)]
pub async fn access_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<AccessRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = json_body(payload)?;
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    controller(&state)?.dispatch(host, request).await
}
