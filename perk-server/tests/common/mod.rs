//! Shared helpers for the HTTP integration tests.
//!
//! Apps run on the in-memory key store with the software ceremony, so the
//! whole protocol can be driven without a browser.

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use perk_core::{token::encode_unsigned, ManualClock, MemoryKeyStore};
use perk_server::webauthn::{MockCeremony, SoftAuthenticator};
use perk_server::{create_router, AppState, Config, EchoHandler, PerkOptions};
use serde_json::{json, Value};
use tower::ServiceExt;

pub const HOST: &str = "localhost:3000";
pub const ORIGIN: &str = "https://localhost:3000";

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryKeyStore>,
    pub clock: Arc<ManualClock>,
}

pub fn config() -> Config {
    Config {
        valid_ids: vec!["u1".into(), "u2".into()],
        session_data_key: Some(BASE64.encode([7u8; 32])),
        ..Config::default()
    }
}

pub fn access_config() -> Config {
    Config {
        access_ids: Some(vec!["admin".into()]),
        credential_secret_key: Some(BASE64.encode([9u8; 32])),
        ..config()
    }
}

pub fn app() -> TestApp {
    app_with(config(), PerkOptions::with_handler(EchoHandler))
}

pub fn app_with(config: Config, perk: PerkOptions) -> TestApp {
    app_on(Arc::new(MemoryKeyStore::new()), config, perk)
}

pub fn app_on(store: Arc<MemoryKeyStore>, config: Config, perk: PerkOptions) -> TestApp {
    let clock = Arc::new(ManualClock::new(1_700_000_000_000));
    let state = AppState::build(
        &config,
        store.clone(),
        Arc::new(MockCeremony::new(ORIGIN)),
        clock.clone(),
        perk,
    )
    .expect("test configuration is valid");

    TestApp {
        router: create_router(state.clone()),
        state,
        store,
        clock,
    }
}

pub fn key() -> SoftAuthenticator {
    SoftAuthenticator::new(ORIGIN)
}

impl TestApp {
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, HOST);
        self.send_request(request, body).await
    }

    pub async fn send_request(
        &self,
        mut request: axum::http::request::Builder,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let body = match body {
            Some(value) => {
                request = request.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    /// Run discovery and registration at `base` (e.g. `/cred/u1/`), returning the 201 body
    pub async fn register_at(&self, base: &str, key: &SoftAuthenticator) -> Value {
        let (status, discovery) = self.send(Method::GET, base, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{discovery}");

        let body = json!({
            "ccr": key.attest(&discovery["options"]),
            "session_data": discovery["session_data"],
        });
        let (status, registered) = self.send(Method::PUT, base, Some(body)).await;
        assert_eq!(status, StatusCode::CREATED, "{registered}");
        registered
    }

    /// Register `key` for a user identity, returning the issuer id
    pub async fn register(&self, name: &str, key: &SoftAuthenticator) -> String {
        let registered = self.register_at(&format!("/cred/{name}/"), key).await;
        registered["issuer_id"].as_str().unwrap().to_string()
    }
}

/// `{issuer_id, assertion}` over an unsigned token carrying `claims`
pub fn perk_body(issuer_id: &str, key: &SoftAuthenticator, claims: Value) -> Value {
    let token = encode_unsigned(&claims);
    json!({
        "issuer_id": issuer_id,
        "assertion": key.assert(token.as_bytes()),
    })
}
