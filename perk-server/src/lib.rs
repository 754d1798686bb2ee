//! Perk Server Library - HTTP surface for WebAuthn perk exchange
//!
//! This library exposes the server components for use in integration tests
//! and embedding applications. The `perk-server` binary uses these same
//! components with [`handlers::EchoHandler`] as its perk handler.

pub mod authz;
pub mod config;
pub mod error;
pub mod handlers;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod storage;
pub mod webauthn;

pub use authz::{Authorization, Authorize, AuthzToken, RegistryAuthorizer};
pub use config::{Config, ConfigError};
pub use error::ApiError;
pub use handlers::{
    EchoHandler, PayloadSchema, PerkHandler, PerkOptions, PerkReply, TypedSchema,
};
pub use openapi::ApiDoc;
pub use routes::{create_router, create_router_with_config};
pub use state::AppState;
pub use storage::{open_store, PostgresKeyStore};
pub use webauthn::{Ceremony, PasskeyCeremony, WebAuthnConfig};
