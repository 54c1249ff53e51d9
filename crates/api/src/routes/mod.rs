pub mod deliveries;
pub mod health;
pub mod status;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use tower_http::limit::RequestBodyLimitLayer;

use crate::state::AppState;

/// Attachments travel base64 encoded inside the JSON body.
const MAX_BODY_BYTES: usize = 25 * 1024 * 1024;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(deliveries::router())
        .merge(status::router())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}
