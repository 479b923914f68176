//! Operator API. Axum web server for creating, joining and closing bets.
//!
//! Also exposes the price feed and the in-memory ledger so an operator can
//! fund and inspect accounts. CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{ApiState, AppState};

/// Bind the API port and serve in a background task.
///
/// Flipping `shutdown` stops accepting connections; the task finishes once
/// every in-flight request has been answered.
pub async fn spawn_api(
    state: AppState,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        let stop = async move {
            while !*shutdown.borrow_and_update() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
            error!(error = %e, "API server error");
        }
        info!("API server stopped");
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/bets", get(routes::list_bets).post(routes::create_bet))
        .route("/api/bets/:id", get(routes::get_bet))
        .route("/api/bets/:id/join", post(routes::join_bet))
        .route("/api/bets/:id/close", post(routes::close_bet))
        .route("/api/price", get(routes::get_price).post(routes::report_price))
        .route("/api/ledger/approve", post(routes::approve))
        .route("/api/ledger/:account", get(routes::get_account))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
