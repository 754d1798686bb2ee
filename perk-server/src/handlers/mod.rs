//! HTTP request handlers
//!
//! Controllers hold the protocol logic; the axum handlers next to them only
//! extract requests and shape responses.

pub mod access;
pub mod cred;
pub mod health;
pub mod perk;

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query,
    },
    Json,
};

use crate::error::ApiError;

pub use crate::state::AppState;
pub use access::{
    access_post_handler, admin_discover_handler, enroll_handler, AccessController, AccessRequest,
    AdminRegistered, GrantList,
};
pub use cred::{
    discover_handler, login_handler, register_handler, CredController, Discovery, LoginChallenge,
    LoginRequest, RegistrationChallenge, RegistrationRequest,
};
pub use health::{health, ready, HealthResponse, ReadyResponse};
pub use perk::{
    perk_get_handler, perk_post_handler, EchoHandler, PayloadSchema, PerkController, PerkHandler,
    PerkOptions, PerkQuery, PerkReply, PerkRequest, TypedSchema,
};

/// Unwrap a JSON body, reporting malformed input as a 400 in the API error shape
pub(crate) fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

/// Unwrap query parameters the same way
pub(crate) fn query_param<T>(query: Result<Query<T>, QueryRejection>) -> Result<T, ApiError> {
    query
        .map(|Query(params)| params)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}
