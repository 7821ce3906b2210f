//! Quantum Chat Relay Server
//!
//! WebSocket relay that pairs connected clients two at a time, hands each
//! pair a fresh session key and forwards sealed messages between partners.
//! Only the WebSocket API and its status endpoints are served; there is no
//! browser chat page at `/`.

pub mod registry;
mod socket;

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use registry::*;

/// Application state
#[derive(Clone, Default)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// HTTP routes: `/ws`, `/health` and `/stats`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(socket::ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health_handler() -> &'static str {
    "OK"
}

async fn stats_handler(State(state): State<AppState>) -> Json<RegistryStats> {
    Json(state.registry.stats())
}
