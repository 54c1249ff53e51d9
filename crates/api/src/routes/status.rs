//! Read-only status and history routes.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::HistoryRecord;
use herald_engine::status::{BatchStatus, DeliveryView, MessageStatus};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{municipality}/status/delivery/{id}", get(delivery_status))
        .route("/{municipality}/status/message/{id}", get(message_status))
        .route("/{municipality}/status/batch/{id}", get(batch_status))
        .route("/{municipality}/history/party/{party_id}", get(party_history))
}

/// GET /:municipality/status/delivery/:id
async fn delivery_status(
    State(state): State<AppState>,
    Path((municipality, id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<DeliveryView>>, AppError> {
    let views = state.status.by_delivery(&municipality, id).await?;
    if views.is_empty() {
        return Err(AppError::NotFound(format!("Delivery {} not found", id)));
    }
    Ok(Json(views))
}

/// GET /:municipality/status/message/:id
async fn message_status(
    State(state): State<AppState>,
    Path((municipality, id)): Path<(String, Uuid)>,
) -> Result<Json<MessageStatus>, AppError> {
    state
        .status
        .by_message(&municipality, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Message {} not found", id)))
}

/// GET /:municipality/status/batch/:id
async fn batch_status(
    State(state): State<AppState>,
    Path((municipality, id)): Path<(String, Uuid)>,
) -> Result<Json<BatchStatus>, AppError> {
    state
        .status
        .by_batch(&municipality, id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Batch {} not found", id)))
}

/// GET /:municipality/history/party/:party_id
async fn party_history(
    State(state): State<AppState>,
    Path((municipality, party_id)): Path<(String, Uuid)>,
) -> Result<Json<Vec<HistoryRecord>>, AppError> {
    let history = state.status.history_by_party(&municipality, party_id).await?;
    Ok(Json(history))
}
