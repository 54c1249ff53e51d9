//! Archiver: retires a pending delivery into history.

use std::sync::Arc;

use herald_common::types::{Delivery, HistoryRecord};

use crate::error::EngineResult;
use crate::repository::DeliveryRepository;

pub struct Archiver {
    repository: Arc<dyn DeliveryRepository>,
}

impl Archiver {
    pub fn new(repository: Arc<dyn DeliveryRepository>) -> Self {
        Self { repository }
    }

    /// Move `delivery` to history with its current status.
    pub async fn archive(
        &self,
        delivery: &Delivery,
        status_detail: Option<String>,
    ) -> EngineResult<HistoryRecord> {
        let record = self.repository.archive(delivery, status_detail).await?;
        log_archived(&record);
        Ok(record)
    }
}

/// Log a terminal outcome once its history row exists.
pub(crate) fn log_archived(record: &HistoryRecord) {
    if record.status_detail.is_some() {
        tracing::warn!(
            delivery_id = %record.delivery_id,
            message_id = %record.message_id,
            channel = %record.channel,
            status = %record.status,
            detail = record.status_detail.as_deref().unwrap_or_default(),
            "Delivery archived"
        );
    } else {
        tracing::info!(
            delivery_id = %record.delivery_id,
            message_id = %record.message_id,
            channel = %record.channel,
            status = %record.status,
            "Delivery archived"
        );
    }
}
