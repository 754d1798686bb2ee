//! OpenAPI documentation configuration
//!
//! Generates the OpenAPI 3 document served at `/openapi.json`.

use utoipa::OpenApi;

use crate::handlers::{
    AccessRequest, AdminRegistered, GrantList, HealthResponse, LoginChallenge, LoginRequest,
    PerkRequest, ReadyResponse, RegistrationChallenge, RegistrationRequest,
};

/// WebAuthn Perk API - OpenAPI Documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "WebAuthn Perk",
        version = "0.1.0",
        description = r#"
## Perks for WebAuthn credentials

Each configured identity registers exactly one WebAuthn credential. Holders
of a credential then sign small payloads (unsigned compact tokens) with it
and exchange them for perks.

### How It Works

1. `GET /cred/{id}/` returns registration options (404) or login options (200)
2. `PUT /cred/{id}/` registers the credential and returns its `issuer_id`
3. `POST /cred/{id}/` proves possession of the credential
4. `POST /perk/` exchanges `{issuer_id, assertion}` over a signed token

Session state travels inside `session_data`, sealed with AES-256-GCM and
bound to the identity, the ceremony and the time it was issued.
"#,
        license(name = "MIT OR Apache-2.0")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local development server")
    ),
    tags(
        (name = "Credentials", description = "Credential discovery, registration and login"),
        (name = "Perks", description = "Signed payload exchange"),
        (name = "Access", description = "Delegated management of end-user credentials"),
        (name = "Health", description = "Service health and readiness endpoints")
    ),
    paths(
        crate::handlers::health::health,
        crate::handlers::health::ready,
        crate::handlers::cred::discover_handler,
        crate::handlers::cred::register_handler,
        crate::handlers::cred::login_handler,
        crate::handlers::perk::perk_post_handler,
        crate::handlers::perk::perk_get_handler,
        crate::handlers::access::enroll_handler,
        crate::handlers::access::admin_discover_handler,
        crate::handlers::access::access_post_handler,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            RegistrationChallenge,
            LoginChallenge,
            RegistrationRequest,
            LoginRequest,
            PerkRequest,
            AccessRequest,
            GrantList,
            AdminRegistered,
        )
    )
)]
pub struct ApiDoc;
