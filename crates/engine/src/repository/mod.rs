//! Pending and history storage.
//!
//! The pending store and the history store are reached through one trait
//! because archiving spans both and must be a single transaction.
//!
//! An orchestration claims its pending row before doing any work. A claim
//! older than the lease passed to [`DeliveryRepository::claim`] is considered
//! abandoned and can be taken over.

mod memory;
mod postgres;

pub use memory::MemoryDeliveryRepository;
pub use postgres::PgDeliveryRepository;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use herald_common::types::{Delivery, HistoryRecord};

use crate::error::EngineResult;

/// Result of trying to claim a pending row.
#[derive(Debug, Clone)]
pub enum Claim {
    /// The caller now owns the row.
    Claimed(Delivery),
    /// Another orchestration holds a live claim.
    Held,
    /// No pending row with that id.
    Missing,
}

/// A delivery whose terminal status is known without an attempt.
#[derive(Debug, Clone)]
pub struct Settled {
    pub delivery: Delivery,
    pub status_detail: Option<String>,
}

#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Insert new pending deliveries in one transaction.
    async fn insert_all(&self, deliveries: &[Delivery]) -> EngineResult<()>;

    async fn get(&self, delivery_id: Uuid) -> EngineResult<Option<Delivery>>;

    /// Claim the pending row for one orchestration.
    ///
    /// Succeeds when the row is unclaimed or its claim is older than `lease`.
    async fn claim(&self, delivery_id: Uuid, lease: Duration) -> EngineResult<Claim>;

    /// Overwrite the pending row with the same `delivery_id`.
    ///
    /// Fails with `DeliveryNotFound` when no such row exists.
    async fn update(&self, delivery: &Delivery) -> EngineResult<()>;

    /// Delete the pending row `replaced` (if still present), insert
    /// `deliveries` and write `settled` straight to history, in one
    /// transaction.
    ///
    /// Replacements may reuse the replaced id and are inserted already claimed
    /// by the caller. Returns the history rows written for `settled`.
    async fn replace(
        &self,
        replaced: Uuid,
        deliveries: &[Delivery],
        settled: &[Settled],
    ) -> EngineResult<Vec<HistoryRecord>>;

    /// Whether any pending row still references `batch_id`.
    async fn exists_for_batch(&self, batch_id: Uuid) -> EngineResult<bool>;

    /// Write one history row from the delivery's current fields and delete
    /// its pending row, atomically.
    ///
    /// Fails with `AlreadyArchived` and writes nothing when the pending row is
    /// gone.
    async fn archive(
        &self,
        delivery: &Delivery,
        status_detail: Option<String>,
    ) -> EngineResult<HistoryRecord>;

    /// Ids of pending deliveries nobody has claimed, oldest first.
    async fn unclaimed_ids(&self) -> EngineResult<Vec<Uuid>>;

    /// Ids of pending deliveries whose claim is older than `lease`, oldest
    /// first.
    async fn stale_claim_ids(&self, lease: Duration) -> EngineResult<Vec<Uuid>>;

    async fn pending_by_message(&self, message_id: Uuid) -> EngineResult<Vec<Delivery>>;

    async fn pending_by_batch(&self, batch_id: Uuid) -> EngineResult<Vec<Delivery>>;

    async fn history_by_delivery(&self, delivery_id: Uuid) -> EngineResult<Vec<HistoryRecord>>;

    async fn history_by_message(&self, message_id: Uuid) -> EngineResult<Vec<HistoryRecord>>;

    async fn history_by_batch(&self, batch_id: Uuid) -> EngineResult<Vec<HistoryRecord>>;

    async fn history_by_party(
        &self,
        municipality_id: &str,
        party_id: Uuid,
    ) -> EngineResult<Vec<HistoryRecord>>;
}
