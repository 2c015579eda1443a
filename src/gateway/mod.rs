//! HTTP Gateway
//!
//! | Method | Path | Handler |
//! |---|---|---|
//! | GET | `/` | [`handlers::health_check`] |
//! | POST | `/transfers` | [`handlers::create_transfer`] |
//! | GET | `/transfers/{id}` | [`handlers::get_transfer`] |
//! | GET | `/wallets/{id}` | [`handlers::get_wallet`] |
//! | GET | `/wallets/{id}/transfers` | [`handlers::get_wallet_transfers`] |
//! | POST | `/users` | [`handlers::create_user`] |
//! | GET | `/users/{id}` | [`handlers::get_user`] |

pub mod handlers;
pub mod openapi;
pub mod state;
pub mod types;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::GatewayConfig;
use crate::ledger::LedgerStore;
use state::AppState;

/// Routes plus Swagger UI, bound to `state`.
pub fn build_router<S: LedgerStore>(state: Arc<AppState<S>>) -> Router {
    Router::new()
        .route("/", get(handlers::health_check))
        .route("/transfers", post(handlers::create_transfer::<S>))
        .route("/transfers/{id}", get(handlers::get_transfer::<S>))
        .route("/wallets/{id}", get(handlers::get_wallet::<S>))
        .route(
            "/wallets/{id}/transfers",
            get(handlers::get_wallet_transfers::<S>),
        )
        .route("/users", post(handlers::create_user::<S>))
        .route("/users/{id}", get(handlers::get_user::<S>))
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()))
        .with_state(state)
}

/// Serve until Ctrl-C, then drain in-flight requests.
pub async fn run_server<S: LedgerStore>(
    config: &GatewayConfig,
    state: Arc<AppState<S>>,
) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "Gateway listening");
    info!("Swagger UI at http://{addr}/docs");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("gateway server error")?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        // Without a signal handler, run until the process is killed
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
