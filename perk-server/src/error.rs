//! API error handling module
//!
//! Every controller failure carries its HTTP status from the point where it
//! is detected. Responses are `{"message": ..., "code": ...}`; nothing is
//! retried.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use perk_core::{ChallengeError, GrantError, StoreError, TokenError};
use thiserror::Error;

use crate::webauthn::CeremonyError;

/// Message used for every assertion that cannot be tied to the addressed issuer
pub const SIGNATURE_VALIDATION_FAILED: &str = "signature validation failed";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request outside the protocol checks
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Session data failed to open (forged, wrong identity or flow, expired)
    #[error("Invalid session data: {0}")]
    Challenge(#[from] ChallengeError),

    /// The ceremony rejected the client's response
    #[error("{0}")]
    CeremonyRejected(String),

    /// Identity already has a credential
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Authenticator counter suggests a cloned credential
    #[error("Credential may be cloned")]
    CredentialCloned,

    /// Perk payload does not match the application schema
    #[error("{0}")]
    PayloadInvalid(String),

    /// Assertion does not belong to the record the issuer id addresses
    #[error("{0}")]
    IssuerMismatch(String),

    /// A stored record's hash maps to no configured identity
    #[error("Unknown identity hash: {0}")]
    UnknownIdentityHash(String),

    /// Perk exchange has no application handler
    #[error("missing handler")]
    MissingHandler,

    #[error("Storage error: {0}")]
    Storage(String),

    /// Error raised by the application handler with its own status
    #[error("{message}")]
    Handler { status: StatusCode, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn issuer_mismatch() -> Self {
        Self::IssuerMismatch(SIGNATURE_VALIDATION_FAILED.to_string())
    }

    pub fn handler(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Handler {
            status,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_)
            | Self::Challenge(_)
            | Self::CeremonyRejected(_)
            | Self::PayloadInvalid(_)
            | Self::IssuerMismatch(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::CredentialCloned => StatusCode::FORBIDDEN,
            Self::Handler { status, .. } => *status,
            Self::UnknownIdentityHash(_)
            | Self::MissingHandler
            | Self::Storage(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "INVALID_INPUT",
            Self::Challenge(_) => "INVALID_SESSION_DATA",
            Self::CeremonyRejected(_) => "CEREMONY_REJECTED",
            Self::Conflict(_) => "ALREADY_REGISTERED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::CredentialCloned => "CREDENTIAL_CLONED",
            Self::PayloadInvalid(_) => "PAYLOAD_INVALID",
            Self::IssuerMismatch(_) => "ISSUER_MISMATCH",
            Self::UnknownIdentityHash(_) => "UNKNOWN_IDENTITY_HASH",
            Self::MissingHandler => "MISSING_HANDLER",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Handler { .. } => "HANDLER_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get sanitized error message for client response
    pub fn client_message(&self) -> String {
        match self {
            // one message for all challenge failures, no oracle
            Self::Challenge(_) => "invalid session data".to_string(),
            Self::UnknownIdentityHash(_) => "identity lookup failed".to_string(),
            Self::Storage(_) => "storage error".to_string(),
            Self::Internal(_) => "internal error".to_string(),
            _ => self.to_string(),
        }
    }

    fn error_category(&self) -> &'static str {
        match self {
            Self::BadRequest(_) | Self::PayloadInvalid(_) => "bad_request",
            Self::Challenge(_) => "challenge",
            Self::CeremonyRejected(_) | Self::CredentialCloned | Self::IssuerMismatch(_) => {
                "authentication"
            }
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Handler { .. } => "handler",
            Self::UnknownIdentityHash(_) | Self::MissingHandler => "configuration",
            Self::Storage(_) => "storage",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(uri) => Self::Conflict(format!("already registered ({uri})")),
            other => Self::Storage(other.to_string()),
        }
    }
}

impl From<CeremonyError> for ApiError {
    fn from(err: CeremonyError) -> Self {
        match err {
            CeremonyError::Rejected(message) => Self::CeremonyRejected(message),
            CeremonyError::PossibleClone => Self::CredentialCloned,
            CeremonyError::Internal(message) => Self::Internal(message),
        }
    }
}

impl From<GrantError> for ApiError {
    fn from(err: GrantError) -> Self {
        match err {
            GrantError::InvalidCredential(_) | GrantError::DuplicateId(_) => {
                Self::BadRequest(err.to_string())
            }
            GrantError::CorruptIndex(_) => Self::Internal(err.to_string()),
            GrantError::Store(e) => e.into(),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let category = self.error_category();
        let code = self.error_code();
        let internal_message = self.to_string();
        let client_message = self.client_message();

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Server error"
            );
        } else {
            tracing::warn!(
                status = %status,
                category = category,
                code = code,
                error = %internal_message,
                "Client error"
            );
        }

        let body = serde_json::json!({
            "message": client_message,
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_failures_share_one_response() {
        let errors = [
            ApiError::from(ChallengeError::ChallengeInvalid),
            ApiError::from(ChallengeError::WrongIdentity),
            ApiError::from(ChallengeError::WrongFlowType {
                expected: "login".into(),
                actual: "registration".into(),
            }),
            ApiError::from(ChallengeError::ChallengeExpired {
                issued_at: 0,
                timeout_ms: 1,
                now: 1,
            }),
        ];
        for err in errors {
            assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
            assert_eq!(err.client_message(), "invalid session data");
            assert_eq!(err.error_code(), "INVALID_SESSION_DATA");
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::from(StoreError::Conflict("h".into())).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(StoreError::Backend("down".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(CeremonyError::PossibleClone).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::from(CeremonyError::Rejected("bad sig".into())).client_message(),
            "bad sig"
        );
        assert_eq!(ApiError::issuer_mismatch().client_message(), SIGNATURE_VALIDATION_FAILED);
        assert_eq!(ApiError::MissingHandler.client_message(), "missing handler");
        assert_eq!(
            ApiError::MissingHandler.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::handler(StatusCode::IM_A_TEAPOT, "no").status_code(),
            StatusCode::IM_A_TEAPOT
        );
    }

    #[test]
    fn test_storage_details_not_leaked() {
        let err = ApiError::from(StoreError::Backend("password=hunter2".into()));
        assert_eq!(err.client_message(), "storage error");
    }
}
