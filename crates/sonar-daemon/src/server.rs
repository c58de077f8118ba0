//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::AppState;
use crate::ws;

/// Build the router for the REST and WebSocket API
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // API routes
        .route("/api/status", get(api::get_status))
        .route("/api/schema", get(api::get_schema))
        .route("/api/params", get(api::get_params).post(api::set_params))
        .route("/api/alive", post(api::post_alive))
        .route("/api/sonar/start", post(api::sonar_start))
        .route("/api/sonar/stop", post(api::sonar_stop))
        .route("/api/sonar/ping", post(api::sonar_ping))
        .route("/api/command", post(api::post_command))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        // State
        .with_state(state)
}

/// Run the web server
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
