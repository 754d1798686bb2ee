//! Perk exchange
//!
//! A caller signs a payload (an unsigned token) with its registered
//! credential; the server verifies the assertion against the record the
//! issuer id names, validates the claims and hands them to the application
//! handler. GET carries the same body JSON-encoded in the `assertion` query
//! parameter.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use super::{json_body, query_param};
use crate::authz::{Authorization, Authorize, AuthzToken};
use crate::error::ApiError;
use crate::state::AppState;
use crate::webauthn::{AssertionResponse, ExpectationOverrides};

/// Validates a JSON document (perk payloads and handler responses)
pub trait PayloadSchema: Send + Sync {
    /// Error message on failure, naming the offending field where possible
    fn validate(&self, value: &Value) -> Result<(), String>;
}

impl<F> PayloadSchema for F
where
    F: Fn(&Value) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, value: &Value) -> Result<(), String> {
        self(value)
    }
}

/// Schema given by a serde type: the document must deserialize into `T`
pub struct TypedSchema<T>(PhantomData<fn() -> T>);

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> PayloadSchema for TypedSchema<T> {
    fn validate(&self, value: &Value) -> Result<(), String> {
        T::deserialize(value).map(|_| ()).map_err(|e| e.to_string())
    }
}

/// Handler response: a JSON body and the status to send it with
#[derive(Debug, Clone, PartialEq)]
pub struct PerkReply {
    pub status: StatusCode,
    pub body: Value,
}

impl PerkReply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl From<Value> for PerkReply {
    fn from(body: Value) -> Self {
        Self::ok(body)
    }
}

impl IntoResponse for PerkReply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

/// Application logic run for each authorized perk
#[async_trait]
pub trait PerkHandler: Send + Sync {
    /// Produce the reply, or an [`ApiError::Handler`] with its own status
    async fn handle(&self, info: &Authorization) -> Result<PerkReply, ApiError>;
}

/// Returns the verified claims with the identity that signed them
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoHandler;

#[async_trait]
impl PerkHandler for EchoHandler {
    async fn handle(&self, info: &Authorization) -> Result<PerkReply, ApiError> {
        Ok(PerkReply::ok(serde_json::json!({
            "uri": info.uri,
            "issuer_id": info.issuer_id,
            "payload": info.payload,
        })))
    }
}

/// Body of a perk request
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PerkRequest {
    pub issuer_id: String,
    /// Assertion over the signed token
    #[schema(value_type = Object)]
    #[serde(alias = "assertion")]
    pub car: AssertionResponse,
}

/// Query of a GET perk request
#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PerkQuery {
    /// JSON-encoded [`PerkRequest`]
    #[serde(alias = "assertion_result")]
    pub assertion: String,
}

/// Application hooks of the perk exchange
#[derive(Clone, Default)]
pub struct PerkOptions {
    pub handler: Option<Arc<dyn PerkHandler>>,
    pub payload_schema: Option<Arc<dyn PayloadSchema>>,
    pub response_schema: Option<Arc<dyn PayloadSchema>>,
}

impl PerkOptions {
    pub fn with_handler(handler: impl PerkHandler + 'static) -> Self {
        Self {
            handler: Some(Arc::new(handler)),
            ..Self::default()
        }
    }

    pub fn payload_schema(mut self, schema: impl PayloadSchema + 'static) -> Self {
        self.payload_schema = Some(Arc::new(schema));
        self
    }

    pub fn response_schema(mut self, schema: impl PayloadSchema + 'static) -> Self {
        self.response_schema = Some(Arc::new(schema));
        self
    }
}

pub struct PerkController {
    authorizer: Arc<dyn Authorize>,
    overrides: ExpectationOverrides,
    options: PerkOptions,
}

impl PerkController {
    pub fn new(
        authorizer: Arc<dyn Authorize>,
        overrides: ExpectationOverrides,
        options: PerkOptions,
    ) -> Self {
        Self {
            authorizer,
            overrides,
            options,
        }
    }

    /// Authorize, validate and run the handler
    pub async fn exchange(
        &self,
        host: Option<&str>,
        request: PerkRequest,
    ) -> Result<PerkReply, ApiError> {
        let expectations = self
            .overrides
            .resolve(host, &request.car)
            .map_err(|e| ApiError::bad_request(e.to_string()))?;

        let info = self
            .authorizer
            .authorize(&AuthzToken {
                issuer_id: request.issuer_id,
                assertion: request.car,
                expectations,
            })
            .await?;

        if let Some(schema) = &self.options.payload_schema {
            schema.validate(&info.payload).map_err(ApiError::PayloadInvalid)?;
        }

        let handler = self.options.handler.as_ref().ok_or(ApiError::MissingHandler)?;
        let reply = handler.handle(&info).await?;

        if let Some(schema) = &self.options.response_schema {
            schema
                .validate(&reply.body)
                .map_err(|e| ApiError::internal(format!("handler response invalid: {e}")))?;
        }

        Ok(reply)
    }
}

fn host(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::HOST).and_then(|value| value.to_str().ok())
}

/// POST /perk/
#[utoipa::path(
    post,
    path = "/perk/",
    tag = "Perks",
    request_body = PerkRequest,
    responses(
        (status = 200, description = "Handler response (the handler may choose another status)"),
        (status = 400, description = "Signature, token or payload rejected"),
        (status = 403, description = "Counter did not advance, credential may be cloned"),
        (status = 500, description = "Missing handler or invalid handler response")
    )
)]
pub async fn perk_post_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PerkRequest>, JsonRejection>,
) -> Result<PerkReply, ApiError> {
    let request = json_body(payload)?;
    state.perk.exchange(host(&headers), request).await
}

/// GET /perk/?assertion=...
#[utoipa::path(
    get,
    path = "/perk/",
    tag = "Perks",
    params(PerkQuery),
    responses(
        (status = 200, description = "Handler response (the handler may choose another status)"),
        (status = 400, description = "Malformed query, signature, token or payload rejected"),
        (status = 403, description = "Counter did not advance, credential may be cloned")
    )
)]
pub async fn perk_get_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<PerkQuery>, QueryRejection>,
) -> Result<PerkReply, ApiError> {
    let query = query_param(query)?;
    let request: PerkRequest = serde_json::from_str(&query.assertion)
        .map_err(|e| ApiError::bad_request(format!("invalid assertion parameter: {e}")))?;
    state.perk.exchange(host(&headers), request).await
}
