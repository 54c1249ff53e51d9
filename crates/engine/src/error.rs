use thiserror::Error;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::request::RequestError;
use herald_common::types::Channel;

/// Errors raised by the orchestration engine.
///
/// Business outcomes (failed sends, missing contact settings, unresolvable
/// addresses) are never errors; they end up as history rows. Everything here
/// is either an infrastructure failure or a defect.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Delivery {0} not found in pending store")]
    DeliveryNotFound(Uuid),

    #[error("Delivery {0} is claimed by another orchestration")]
    AlreadyClaimed(Uuid),

    #[error("Delivery {0} was already archived")]
    AlreadyArchived(Uuid),

    #[error("Cannot reconstruct request: {0}")]
    Reconstruction(#[from] RequestError),

    #[error("No sender can deliver {0} deliveries")]
    UnsupportedChannel(Channel),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Queue error: {0}")]
    Queue(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::DeliveryNotFound(id) => AppError::NotFound(format!("Delivery {} not found", id)),
            EngineError::InvalidRequest(msg) => AppError::Validation(msg),
            EngineError::Database(e) => AppError::Database(e),
            EngineError::Redis(e) => AppError::Redis(e),
            EngineError::Serialization(e) => AppError::Serialization(e),
            other => AppError::Internal(other.to_string()),
        }
    }
}
