//! API integration tests for perk-server.
//!
//! Each test drives the HTTP surface the way a browser would, with a
//! software authenticator standing in for the security key.

mod common;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, Request, StatusCode};
use common::{app, app_on, app_with, config, key, perk_body, HOST};
use perk_core::{hash_identity, CredentialRegistry, KeyStore, ManualClock, MemoryKeyStore};
use perk_server::authz::{Authorization, RegistryAuthorizer};
use perk_server::handlers::{PerkController, PerkRequest};
use perk_server::webauthn::{Factor, MockCeremony};
use perk_server::{
    ApiError, AppState, Config, ConfigError, EchoHandler, PerkHandler, PerkOptions, PerkReply,
    TypedSchema,
};
use serde::Deserialize;
use serde_json::{json, Value};

// ============================================================================
// Registration & Login
// ============================================================================

#[tokio::test]
async fn test_register_login_and_exchange() {
    let app = app();
    let key = key();

    let (status, discovery) = app.send(Method::GET, "/cred/u1/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(discovery["options"]["publicKey"]["challenge"].is_string());
    assert!(discovery.get("issuer_id").is_none());

    let body = json!({
        "ccr": key.attest(&discovery["options"]),
        "session_data": discovery["session_data"],
    });
    let (status, registered) = app.send(Method::PUT, "/cred/u1/", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    let issuer_id = registered["issuer_id"].as_str().unwrap().to_string();

    // registration hands out a login challenge straight away
    let login = json!({
        "car": key.assert_options(&registered["options"]),
        "session_data": registered["session_data"],
    });
    let (status, body) = app.send(Method::POST, "/cred/u1/", Some(login)).await;
    assert_eq!(status, StatusCode::NO_CONTENT, "{body}");

    let (status, discovery) = app.send(Method::GET, "/cred/u1/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(discovery["issuer_id"], issuer_id.as_str());

    let (status, perk) = app
        .send(
            Method::POST,
            "/perk/",
            Some(perk_body(&issuer_id, &key, json!({ "foo": 90 }))),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{perk}");
    assert_eq!(perk["uri"], "u1");
    assert_eq!(perk["issuer_id"], issuer_id.as_str());
    assert_eq!(perk["payload"], json!({ "foo": 90 }));
}

#[tokio::test]
async fn test_routes_without_trailing_slash() {
    let app = app();
    let (status, _) = app.send(Method::GET, "/cred/u1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, body) = app.send(Method::GET, "/cred/u1/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["options"].is_object());
}

#[tokio::test]
async fn test_unknown_identity_is_not_found() {
    let app = app();
    let (status, body) = app.send(Method::GET, "/cred/nobody/", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
    assert!(body.get("options").is_none());
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_second_registration_conflicts() {
    let app = app();
    let first = key();
    let second = key();

    // both clients discover before either registers
    let (_, d1) = app.send(Method::GET, "/cred/u1/", None).await;
    let (_, d2) = app.send(Method::GET, "/cred/u1/", None).await;

    let (status, registered) = app
        .send(
            Method::PUT,
            "/cred/u1/",
            Some(json!({ "ccr": first.attest(&d1["options"]), "session_data": d1["session_data"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .send(
            Method::PUT,
            "/cred/u1/",
            Some(json!({ "ccr": second.attest(&d2["options"]), "session_data": d2["session_data"] })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ALREADY_REGISTERED");

    let stored = CredentialRegistry::new(app.store.clone())
        .get(&hash_identity("u1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.issuer_id, registered["issuer_id"].as_str().unwrap());
    assert_eq!(stored.record.credential_id, first.credential_id());
}

#[tokio::test]
async fn test_session_for_other_identity_rejected() {
    let app = app();
    let key = key();
    let (_, discovery) = app.send(Method::GET, "/cred/u2/", None).await;

    let (status, body) = app
        .send(
            Method::PUT,
            "/cred/u1/",
            Some(json!({ "ccr": key.attest(&discovery["options"]), "session_data": discovery["session_data"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid session data");
    assert!(app.store.is_empty());
}

#[tokio::test]
async fn test_expired_session_rejected() {
    let app = app();
    let key = key();
    let (_, discovery) = app.send(Method::GET, "/cred/u1/", None).await;

    app.clock.advance(60_000);
    let (status, body) = app
        .send(
            Method::PUT,
            "/cred/u1/",
            Some(json!({ "ccr": key.attest(&discovery["options"]), "session_data": discovery["session_data"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "invalid session data");
}

#[tokio::test]
async fn test_login_session_cannot_register() {
    let app = app();
    let key = key();
    let registered = app.register_at("/cred/u1/", &key).await;

    let other = common::key();
    let (status, body) = app
        .send(
            Method::PUT,
            "/cred/u1/",
            Some(json!({ "ccr": other.attest(&registered["options"]), "session_data": registered["session_data"] })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_SESSION_DATA");
}

#[tokio::test]
async fn test_login_does_not_write_record() {
    let app = app();
    let key = key();
    app.register("u1", &key).await;
    let registry = CredentialRegistry::new(app.store.clone());
    let before = registry.get(&hash_identity("u1")).await.unwrap().unwrap();

    for _ in 0..3 {
        let (_, discovery) = app.send(Method::GET, "/cred/u1/", None).await;
        let login = json!({
            "car": key.assert_options(&discovery["options"]),
            "session_data": discovery["session_data"],
        });
        let (status, _) = app.send(Method::POST, "/cred/u1/", Some(login)).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    let after = registry.get(&hash_identity("u1")).await.unwrap().unwrap();
    assert_eq!(before, after);
    assert_eq!(after.record.sign_count, 0);
}

#[tokio::test]
async fn test_counter_regression_is_forbidden() {
    let app = app();
    let key = key();
    key.set_counter(10);
    app.register("u1", &key).await;

    // a cloned key lags behind the registered counter
    key.set_counter(3);
    let (_, discovery) = app.send(Method::GET, "/cred/u1/", None).await;
    let login = json!({
        "car": key.assert_options(&discovery["options"]),
        "session_data": discovery["session_data"],
    });
    let (status, body) = app.send(Method::POST, "/cred/u1/", Some(login)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "CREDENTIAL_CLONED");

    let stored = CredentialRegistry::new(app.store.clone())
        .get(&hash_identity("u1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.record.sign_count, 10);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let app = app();
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/cred/u1/")
        .header("host", HOST);
    let (status, body) = app.send_request(request, Some(json!({ "ccr": 1 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

// ============================================================================
// Perk Exchange
// ============================================================================

#[tokio::test]
async fn test_cross_issuer_assertion_rejected() {
    let app = app();
    let key_a = key();
    let key_b = key();
    app.register("u1", &key_a).await;
    let issuer_b = app.register("u2", &key_b).await;

    let (status, body) = app
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_b, &key_a, json!({}))))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "signature validation failed");
}

#[tokio::test]
async fn test_unknown_issuer_rejected() {
    let app = app();
    let key = key();
    app.register("u1", &key).await;

    let (status, body) = app
        .send(Method::POST, "/perk/", Some(perk_body("not-an-issuer", &key, json!({}))))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "signature validation failed");
}

#[tokio::test]
async fn test_perk_via_query_parameter() {
    let app = app();
    let key = key();
    let issuer_id = app.register("u1", &key).await;

    let body = perk_body(&issuer_id, &key, json!({ "foo": 1 })).to_string();
    let query: String = url::form_urlencoded::byte_serialize(body.as_bytes()).collect();

    let (status, perk) = app
        .send(Method::GET, &format!("/perk/?assertion={query}"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{perk}");
    assert_eq!(perk["payload"], json!({ "foo": 1 }));

    let body = perk_body(&issuer_id, &key, json!({ "foo": 2 })).to_string();
    let query: String = url::form_urlencoded::byte_serialize(body.as_bytes()).collect();
    let (status, perk) = app
        .send(Method::GET, &format!("/perk?assertion_result={query}"), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{perk}");
    assert_eq!(perk["payload"], json!({ "foo": 2 }));
}

#[tokio::test]
async fn test_perk_query_errors_use_api_shape() {
    let app = app();

    let (status, body) = app.send(Method::GET, "/perk/", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
    assert!(body["message"].is_string());

    let (status, body) = app
        .send(Method::GET, "/perk/?assertion=not-json", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn test_presence_only_assertion_accepted_by_default() {
    let app = app();
    let key = key().without_user_verification();
    let issuer_id = app.register("u1", &key).await;

    let (status, body) = app
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_id, &key, json!({ "foo": 3 }))))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["payload"], json!({ "foo": 3 }));
}

#[tokio::test]
async fn test_first_factor_requires_user_verification() {
    let app = app_with(
        Config {
            expected_factor: Factor::First,
            ..config()
        },
        PerkOptions::with_handler(EchoHandler),
    );
    let presence_only = key().without_user_verification();
    let issuer_id = app.register("u1", &presence_only).await;

    let (status, _) = app
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_id, &presence_only, json!({}))))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let verified = key();
    let issuer_id = app.register("u2", &verified).await;
    let (status, body) = app
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_id, &verified, json!({}))))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
}

#[tokio::test]
async fn test_perk_rejects_foreign_origin() {
    let app = app();
    let key = key();
    let issuer_id = app.register("u1", &key).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/perk/")
        .header("host", "evil.example");
    let (status, body) = app
        .send_request(request, Some(perk_body(&issuer_id, &key, json!({}))))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "signature validation failed");
}

#[tokio::test]
async fn test_trusted_origin_overrides_host() {
    let app = app_with(
        Config {
            trusted_origin: Some(common::ORIGIN.into()),
            ..config()
        },
        PerkOptions::with_handler(EchoHandler),
    );
    let key = key();
    let issuer_id = app.register("u1", &key).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/perk/")
        .header("host", "internal:8080");
    let (status, _) = app
        .send_request(request, Some(perk_body(&issuer_id, &key, json!({}))))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_expired_token_rejected() {
    let app = app();
    let key = key();
    let issuer_id = app.register("u1", &key).await;

    // clock is 1_700_000_000 s
    let (status, body) = app
        .send(
            Method::POST,
            "/perk/",
            Some(perk_body(&issuer_id, &key, json!({ "exp": 1_600_000_000 }))),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_INPUT");
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct FooClaims {
    foo: u32,
}

#[tokio::test]
async fn test_payload_schema_names_missing_field() {
    let app = app_with(
        config(),
        PerkOptions::with_handler(EchoHandler).payload_schema(TypedSchema::<FooClaims>::new()),
    );
    let key = key();
    let issuer_id = app.register("u1", &key).await;

    let (status, body) = app
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_id, &key, json!({ "bar": 1 }))))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PAYLOAD_INVALID");
    assert!(body["message"].as_str().unwrap().contains("foo"));

    let (status, _) = app
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_id, &key, json!({ "foo": 1 }))))
        .await;
    assert_eq!(status, StatusCode::OK);
}

struct Teapot;

#[async_trait]
impl PerkHandler for Teapot {
    async fn handle(&self, _info: &Authorization) -> Result<PerkReply, ApiError> {
        Err(ApiError::handler(StatusCode::IM_A_TEAPOT, "short and stout"))
    }
}

#[tokio::test]
async fn test_handler_error_keeps_its_status() {
    let app = app_with(config(), PerkOptions::with_handler(Teapot));
    let key = key();
    let issuer_id = app.register("u1", &key).await;

    let (status, body) = app
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_id, &key, json!({}))))
        .await;
    assert_eq!(status, StatusCode::IM_A_TEAPOT);
    assert_eq!(body["message"], "short and stout");
}

struct Deferred;

#[async_trait]
impl PerkHandler for Deferred {
    async fn handle(&self, info: &Authorization) -> Result<PerkReply, ApiError> {
        Ok(PerkReply::ok(json!({ "queued": info.uri })).with_status(StatusCode::ACCEPTED))
    }
}

#[tokio::test]
async fn test_handler_chooses_success_status() {
    let app = app_with(config(), PerkOptions::with_handler(Deferred));
    let key = key();
    let issuer_id = app.register("u1", &key).await;

    let (status, body) = app
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_id, &key, json!({}))))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["queued"], "u1");
}

#[tokio::test]
async fn test_invalid_handler_response_is_server_error() {
    let app = app_with(
        config(),
        PerkOptions::with_handler(EchoHandler).response_schema(|value: &Value| {
            if value.get("granted").is_some() {
                Ok(())
            } else {
                Err("granted is required".to_string())
            }
        }),
    );
    let key = key();
    let issuer_id = app.register("u1", &key).await;

    let (status, body) = app
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_id, &key, json!({}))))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["message"], "internal error");
}

#[tokio::test]
async fn test_missing_handler() {
    let store = Arc::new(MemoryKeyStore::new());
    let err = AppState::build(
        &config(),
        store.clone(),
        Arc::new(MockCeremony::new(common::ORIGIN)),
        Arc::new(ManualClock::new(0)),
        PerkOptions::default(),
    )
    .err()
    .unwrap();
    assert!(matches!(err, ConfigError::MissingHandler));

    // a controller assembled by hand still refuses at request time
    let app = app_on(store.clone(), config(), PerkOptions::with_handler(EchoHandler));
    let key = key();
    let issuer_id = app.register("u1", &key).await;

    let authorizer = RegistryAuthorizer::new(
        CredentialRegistry::new(store),
        Arc::new(config().identity_table().unwrap()),
        Arc::new(MockCeremony::new(common::ORIGIN)),
        Arc::new(ManualClock::new(0)),
    );
    let controller = PerkController::new(
        Arc::new(authorizer),
        config().expectation_overrides(),
        PerkOptions::default(),
    );
    let request: PerkRequest =
        serde_json::from_value(perk_body(&issuer_id, &key, json!({}))).unwrap();
    let err = controller.exchange(Some(HOST), request).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.client_message(), "missing handler");
}

// ============================================================================
// Startup Reconciliation
// ============================================================================

#[tokio::test]
async fn test_reconcile_revokes_removed_identity() {
    let store = Arc::new(MemoryKeyStore::new());
    let app = app_on(store.clone(), config(), PerkOptions::with_handler(EchoHandler));
    let key_a = key();
    let key_b = key();
    app.register("u1", &key_a).await;
    let issuer_b = app.register("u2", &key_b).await;
    store.put("foreign:record", json!(1), false).await.unwrap();

    let restarted = app_on(
        store.clone(),
        Config {
            valid_ids: vec!["u2".into()],
            ..config()
        },
        PerkOptions::with_handler(EchoHandler),
    );
    let report = restarted.state.reconcile().await.unwrap();
    assert_eq!(report.removed, vec![hash_identity("u1")]);
    assert!(report.failed.is_empty());

    assert!(store.get(&hash_identity("u1")).await.unwrap().is_none());
    assert!(store.get("foreign:record").await.unwrap().is_some());

    let (status, _) = restarted
        .send(Method::POST, "/perk/", Some(perk_body(&issuer_b, &key_b, json!({}))))
        .await;
    assert_eq!(status, StatusCode::OK);
}

// ============================================================================
// Health & Documentation
// ============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = app();
    let (status, body) = app.send(Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
    assert_eq!(body["ceremony"], "mock");
    assert_eq!(body["service"], "perk-server");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_ready_endpoint() {
    let app = app();
    let (status, body) = app.send(Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    assert!(body.get("message").is_none());
}

#[tokio::test]
async fn test_openapi_document() {
    let app = app();
    let (status, body) = app.send(Method::GET, "/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/perk/"].is_object());
    assert!(body["paths"]["/cred/{id}/"]["put"].is_object());
}
