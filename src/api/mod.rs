//! HTTP command surface: Axum router over the ledger services.
//!
//! Every operation is a JSON request/response call. Expected failures come
//! back as 4xx with a JSON error body; CORS is open for local tooling.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{ApiState, AppState};

/// Bind the port and serve in a background task.
pub async fn spawn_server(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server stopped");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Accounts
        .route("/api/accounts", post(routes::register))
        .route("/api/accounts/:id", get(routes::get_account))
        .route("/api/accounts/:id/transactions", get(routes::get_transactions))
        .route("/api/accounts/:id/audit", get(routes::audit_account))
        .route("/api/accounts/:id/stats", post(routes::recompute_stats))
        .route("/api/accounts/:id/daily", post(routes::claim_daily))
        .route("/api/accounts/:id/bailout", post(routes::claim_bailout))
        .route("/api/accounts/:id/balance", axum::routing::put(routes::set_balance))
        .route("/api/accounts/:id/wagers", get(routes::get_open_wagers))
        .route("/api/leaderboard", get(routes::get_leaderboard))
        // Bets
        .route("/api/bets", post(routes::create_bet).get(routes::list_bets))
        .route("/api/bets/:id", get(routes::get_bet))
        .route("/api/bets/:id/wagers", post(routes::place_wager))
        .route("/api/bets/:id/lock", post(routes::lock_bet))
        .route("/api/bets/:id/resolve", post(routes::resolve_bet))
        .route("/api/bets/:id/cancel", post(routes::cancel_bet))
        // Activity
        .route("/api/activity/messages", post(routes::record_message))
        .route("/api/activity/rewards", post(routes::process_rewards))
        .route(
            "/api/activity/:community/settings",
            get(routes::get_settings).put(routes::update_settings),
        )
        .route(
            "/api/activity/:community/accounts/:id/stats",
            get(routes::get_activity_stats),
        )
        // Admin
        .route("/api/admin/refresh-stats", post(routes::refresh_stats))
        .route("/api/admin/audit", get(routes::audit_all))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
