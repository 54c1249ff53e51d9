//! Read-only status lookups over the pending and history stores.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use herald_common::types::{Channel, Delivery, DeliveryStatus, HistoryRecord};

use crate::error::EngineResult;
use crate::repository::DeliveryRepository;

/// One delivery as seen by a caller, pending or terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryView {
    pub delivery_id: Uuid,
    pub message_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub channel: Channel,
    pub original_channel: Channel,
    pub status: DeliveryStatus,
    pub status_detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Delivery> for DeliveryView {
    fn from(d: &Delivery) -> Self {
        Self {
            delivery_id: d.delivery_id,
            message_id: d.message_id,
            batch_id: d.batch_id,
            channel: d.channel,
            original_channel: d.original_channel,
            status: d.status,
            status_detail: None,
            created_at: d.created_at,
        }
    }
}

impl From<&HistoryRecord> for DeliveryView {
    fn from(r: &HistoryRecord) -> Self {
        Self {
            delivery_id: r.delivery_id,
            message_id: r.message_id,
            batch_id: r.batch_id,
            channel: r.channel,
            original_channel: r.original_channel,
            status: r.status,
            status_detail: r.status_detail.clone(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatus {
    pub message_id: Uuid,
    pub deliveries: Vec<DeliveryView>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatus {
    pub batch_id: Uuid,
    /// True while any delivery of the batch is pending.
    pub open: bool,
    pub messages: Vec<MessageStatus>,
}

pub struct StatusService {
    repository: Arc<dyn DeliveryRepository>,
}

impl StatusService {
    pub fn new(repository: Arc<dyn DeliveryRepository>) -> Self {
        Self { repository }
    }

    /// Pending row and/or history rows for a delivery id. Empty when unknown.
    pub async fn by_delivery(&self, municipality_id: &str, delivery_id: Uuid) -> EngineResult<Vec<DeliveryView>> {
        let history = self.repository.history_by_delivery(delivery_id).await?;
        let pending: Vec<Delivery> = self.repository.get(delivery_id).await?.into_iter().collect();
        Ok(merge(municipality_id, &history, &pending))
    }

    pub async fn by_message(&self, municipality_id: &str, message_id: Uuid) -> EngineResult<Option<MessageStatus>> {
        let history = self.repository.history_by_message(message_id).await?;
        let pending = self.repository.pending_by_message(message_id).await?;
        let deliveries = merge(municipality_id, &history, &pending);

        if deliveries.is_empty() {
            return Ok(None);
        }
        Ok(Some(MessageStatus {
            message_id,
            deliveries,
        }))
    }

    pub async fn by_batch(&self, municipality_id: &str, batch_id: Uuid) -> EngineResult<Option<BatchStatus>> {
        let history = self.repository.history_by_batch(batch_id).await?;
        let pending = self.repository.pending_by_batch(batch_id).await?;
        let open = pending.iter().any(|d| d.municipality_id == municipality_id);
        let deliveries = merge(municipality_id, &history, &pending);

        if deliveries.is_empty() {
            return Ok(None);
        }

        let mut messages: Vec<MessageStatus> = Vec::new();
        for view in deliveries {
            match messages.iter_mut().find(|m| m.message_id == view.message_id) {
                Some(message) => message.deliveries.push(view),
                None => messages.push(MessageStatus {
                    message_id: view.message_id,
                    deliveries: vec![view],
                }),
            }
        }

        Ok(Some(BatchStatus {
            batch_id,
            open,
            messages,
        }))
    }

    /// Terminal outcomes for a party, oldest first.
    pub async fn history_by_party(&self, municipality_id: &str, party_id: Uuid) -> EngineResult<Vec<HistoryRecord>> {
        self.repository.history_by_party(municipality_id, party_id).await
    }
}

fn merge(municipality_id: &str, history: &[HistoryRecord], pending: &[Delivery]) -> Vec<DeliveryView> {
    let history = history
        .iter()
        .filter(|r| r.municipality_id == municipality_id)
        .map(DeliveryView::from);
    let pending = pending
        .iter()
        .filter(|d| d.municipality_id == municipality_id)
        .map(DeliveryView::from);
    history.chain(pending).collect()
}
