//! Rift Operation Relay
//!
//! A WebSocket hub: each device connects to `/ws`, and every broadcast it
//! sends is fanned out unchanged to all other connected devices. The relay
//! keeps no game state of its own.

pub mod api;
pub mod config;

use std::sync::Arc;

use axum::{routing::get, Router};
use chrono::{DateTime, Utc};
use tower_http::trace::TraceLayer;

use api::ConnectionManager;

/// Shared state for the relay's handlers.
pub struct RelayState {
    pub connections: Arc<ConnectionManager>,
    pub started_at: DateTime<Utc>,
}

impl RelayState {
    pub fn new() -> Self {
        Self {
            connections: Arc::new(ConnectionManager::new()),
            started_at: Utc::now(),
        }
    }
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the relay router.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/health", get(api::http::health))
        .route("/ws", get(api::websocket::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
