//! Perk Server - WebAuthn credential registration and perk exchange
//!
//! Endpoints:
//! - GET/PUT/POST /cred/{id}/ - discovery, registration, login
//! - GET/POST /perk/ - exchange a signed payload
//! - GET/POST /access/ - delegated credential management (when enabled)
//! - GET /health, GET /ready, GET /openapi.json

use std::sync::Arc;

use perk_core::SystemClock;
use perk_server::{
    create_router_with_config, open_store, AppState, Config, EchoHandler, PasskeyCeremony,
    PerkOptions,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "perk_server=info,perk_core=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    config.validate()?;
    let addr = config.socket_addr();

    let store = open_store(&config).await?;
    let ceremony = Arc::new(PasskeyCeremony::new(config.webauthn_config()?));
    let state = AppState::build(
        &config,
        store,
        ceremony,
        Arc::new(SystemClock),
        PerkOptions::with_handler(EchoHandler),
    )?;

    // Stale records must be gone before the first request
    let report = state.reconcile().await?;
    if !report.failed.is_empty() {
        tracing::warn!(
            failed = report.failed.len(),
            "Some stale records could not be removed"
        );
    }
    tracing::info!(removed = report.removed.len(), "Key store reconciled");

    let app = create_router_with_config(&config, state);

    tracing::info!("Perk Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET/PUT/POST /cred/{{id}}/ - Credential discovery, registration, login");
    tracing::info!("  GET/POST /perk/         - Perk exchange");
    tracing::info!("  GET/POST /access/       - Access delegation (if enabled)");
    tracing::info!("  GET  /health            - Health check");
    tracing::info!("  GET  /ready             - Readiness probe");
    tracing::info!("  GET  /openapi.json      - OpenAPI document");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
