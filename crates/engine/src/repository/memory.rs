//! In-process repository used by tests and local runs.
//!
//! A single mutex guards both tables, so every operation is trivially
//! atomic.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use herald_common::types::{Delivery, HistoryRecord};

use super::{Claim, DeliveryRepository, Settled};
use crate::error::{EngineError, EngineResult};

#[derive(Default)]
struct Tables {
    pending: HashMap<Uuid, Delivery>,
    claims: HashMap<Uuid, DateTime<Utc>>,
    history: Vec<HistoryRecord>,
}

impl Tables {
    fn push_history(&mut self, delivery: &Delivery, status_detail: Option<String>) -> HistoryRecord {
        let mut record = HistoryRecord::from_delivery(delivery, status_detail);
        record.id = self.history.len() as i64 + 1;
        record.created_at = Utc::now();
        self.history.push(record.clone());
        record
    }

    fn ids_where(&self, keep: impl Fn(Option<&DateTime<Utc>>) -> bool) -> Vec<Uuid> {
        let matching = self
            .pending
            .values()
            .filter(|d| keep(self.claims.get(&d.delivery_id)))
            .cloned()
            .collect();
        sorted(matching).into_iter().map(|d| d.delivery_id).collect()
    }
}

/// Whether a claim taken at `claimed_at` has outlived `lease`.
fn expired(claimed_at: &DateTime<Utc>, lease: Duration) -> bool {
    (Utc::now() - *claimed_at)
        .to_std()
        .map(|age| age >= lease)
        .unwrap_or(false)
}

#[derive(Default)]
pub struct MemoryDeliveryRepository {
    tables: Mutex<Tables>,
}

impl MemoryDeliveryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every history row, in archive order.
    pub async fn all_history(&self) -> Vec<HistoryRecord> {
        self.tables.lock().await.history.clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.tables.lock().await.pending.len()
    }
}

fn sorted(mut deliveries: Vec<Delivery>) -> Vec<Delivery> {
    deliveries.sort_by_key(|d| d.created_at);
    deliveries
}

#[async_trait]
impl DeliveryRepository for MemoryDeliveryRepository {
    async fn insert_all(&self, deliveries: &[Delivery]) -> EngineResult<()> {
        let mut tables = self.tables.lock().await;
        if let Some(dup) = deliveries
            .iter()
            .find(|d| tables.pending.contains_key(&d.delivery_id))
        {
            return Err(EngineError::InvalidRequest(format!(
                "Delivery {} already pending",
                dup.delivery_id
            )));
        }
        for delivery in deliveries {
            tables.pending.insert(delivery.delivery_id, delivery.clone());
        }
        Ok(())
    }

    async fn get(&self, delivery_id: Uuid) -> EngineResult<Option<Delivery>> {
        Ok(self.tables.lock().await.pending.get(&delivery_id).cloned())
    }

    async fn claim(&self, delivery_id: Uuid, lease: Duration) -> EngineResult<Claim> {
        let mut tables = self.tables.lock().await;
        let Some(delivery) = tables.pending.get(&delivery_id).cloned() else {
            return Ok(Claim::Missing);
        };
        if let Some(claimed_at) = tables.claims.get(&delivery_id) {
            if !expired(claimed_at, lease) {
                return Ok(Claim::Held);
            }
        }
        tables.claims.insert(delivery_id, Utc::now());
        Ok(Claim::Claimed(delivery))
    }

    async fn update(&self, delivery: &Delivery) -> EngineResult<()> {
        let mut tables = self.tables.lock().await;
        match tables.pending.get_mut(&delivery.delivery_id) {
            Some(row) => {
                *row = delivery.clone();
                Ok(())
            }
            None => Err(EngineError::DeliveryNotFound(delivery.delivery_id)),
        }
    }

    async fn replace(
        &self,
        replaced: Uuid,
        deliveries: &[Delivery],
        settled: &[Settled],
    ) -> EngineResult<Vec<HistoryRecord>> {
        let mut tables = self.tables.lock().await;
        tables.pending.remove(&replaced);
        tables.claims.remove(&replaced);

        let now = Utc::now();
        for delivery in deliveries {
            tables.pending.insert(delivery.delivery_id, delivery.clone());
            tables.claims.insert(delivery.delivery_id, now);
        }

        Ok(settled
            .iter()
            .map(|s| tables.push_history(&s.delivery, s.status_detail.clone()))
            .collect())
    }

    async fn exists_for_batch(&self, batch_id: Uuid) -> EngineResult<bool> {
        let tables = self.tables.lock().await;
        Ok(tables
            .pending
            .values()
            .any(|d| d.batch_id == Some(batch_id)))
    }

    async fn archive(
        &self,
        delivery: &Delivery,
        status_detail: Option<String>,
    ) -> EngineResult<HistoryRecord> {
        let mut tables = self.tables.lock().await;
        if tables.pending.remove(&delivery.delivery_id).is_none() {
            return Err(EngineError::AlreadyArchived(delivery.delivery_id));
        }
        tables.claims.remove(&delivery.delivery_id);

        Ok(tables.push_history(delivery, status_detail))
    }

    async fn unclaimed_ids(&self) -> EngineResult<Vec<Uuid>> {
        let tables = self.tables.lock().await;
        Ok(tables.ids_where(|claim| claim.is_none()))
    }

    async fn stale_claim_ids(&self, lease: Duration) -> EngineResult<Vec<Uuid>> {
        let tables = self.tables.lock().await;
        Ok(tables.ids_where(|claim| claim.is_some_and(|at| expired(at, lease))))
    }

    async fn pending_by_message(&self, message_id: Uuid) -> EngineResult<Vec<Delivery>> {
        let tables = self.tables.lock().await;
        Ok(sorted(
            tables
                .pending
                .values()
                .filter(|d| d.message_id == message_id)
                .cloned()
                .collect(),
        ))
    }

    async fn pending_by_batch(&self, batch_id: Uuid) -> EngineResult<Vec<Delivery>> {
        let tables = self.tables.lock().await;
        Ok(sorted(
            tables
                .pending
                .values()
                .filter(|d| d.batch_id == Some(batch_id))
                .cloned()
                .collect(),
        ))
    }

    async fn history_by_delivery(&self, delivery_id: Uuid) -> EngineResult<Vec<HistoryRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .history
            .iter()
            .filter(|r| r.delivery_id == delivery_id)
            .cloned()
            .collect())
    }

    async fn history_by_message(&self, message_id: Uuid) -> EngineResult<Vec<HistoryRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .history
            .iter()
            .filter(|r| r.message_id == message_id)
            .cloned()
            .collect())
    }

    async fn history_by_batch(&self, batch_id: Uuid) -> EngineResult<Vec<HistoryRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .history
            .iter()
            .filter(|r| r.batch_id == Some(batch_id))
            .cloned()
            .collect())
    }

    async fn history_by_party(
        &self,
        municipality_id: &str,
        party_id: Uuid,
    ) -> EngineResult<Vec<HistoryRecord>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .history
            .iter()
            .filter(|r| r.party_id == Some(party_id) && r.municipality_id == municipality_id)
            .cloned()
            .collect())
    }
}
