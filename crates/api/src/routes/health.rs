//! Liveness endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Reports the dispatch backend so an operator can tell whether triggers are
/// shared through Redis or consumed inside this process.
async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "herald-api",
        "dispatchQueue": state.queue_backend,
        "version": env!("CARGO_PKG_VERSION")
    }))
}
