//! PostgreSQL repository.
//!
//! Archiving writes the history row first and deletes the pending row second,
//! inside one transaction. A delete that hits nothing rolls the whole
//! transaction back, so a duplicate trigger can never add a second history row.
//!
//! Claims are a conditional `UPDATE` of `claimed_at`. Only one of two
//! concurrent claims on the same row can match the condition.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use herald_common::types::{Address, Channel, Delivery, DeliveryStatus, HistoryRecord};

use super::{Claim, DeliveryRepository, Settled};
use crate::error::{EngineError, EngineResult};

const DELIVERY_COLUMNS: &str = "delivery_id, message_id, batch_id, party_id, address, \
     organization_number, channel, original_channel, status, content, origin, issuer, \
     municipality_id, created_at";

/// Row shape of `pending_deliveries`.
#[derive(sqlx::FromRow)]
struct DeliveryRow {
    delivery_id: Uuid,
    message_id: Uuid,
    batch_id: Option<Uuid>,
    party_id: Option<Uuid>,
    address: Option<Json<Address>>,
    organization_number: Option<String>,
    channel: Channel,
    original_channel: Channel,
    status: DeliveryStatus,
    content: serde_json::Value,
    origin: Option<String>,
    issuer: Option<String>,
    municipality_id: String,
    created_at: DateTime<Utc>,
}

impl From<DeliveryRow> for Delivery {
    fn from(row: DeliveryRow) -> Self {
        Self {
            delivery_id: row.delivery_id,
            message_id: row.message_id,
            batch_id: row.batch_id,
            party_id: row.party_id,
            address: row.address.map(|Json(address)| address),
            organization_number: row.organization_number,
            channel: row.channel,
            original_channel: row.original_channel,
            status: row.status,
            content: row.content,
            origin: row.origin,
            issuer: row.issuer,
            municipality_id: row.municipality_id,
            created_at: row.created_at,
        }
    }
}

#[derive(Clone)]
pub struct PgDeliveryRepository {
    pool: PgPool,
}

impl PgDeliveryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one pending row, claimed now when `claimed` is set.
    async fn insert_in(
        tx: &mut Transaction<'_, Postgres>,
        delivery: &Delivery,
        claimed: bool,
    ) -> EngineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pending_deliveries (
                delivery_id, message_id, batch_id, party_id, address, organization_number,
                channel, original_channel, status, content, origin, issuer,
                municipality_id, created_at, claimed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    CASE WHEN $15 THEN NOW() END)
            "#,
        )
        .bind(delivery.delivery_id)
        .bind(delivery.message_id)
        .bind(delivery.batch_id)
        .bind(delivery.party_id)
        .bind(delivery.address.as_ref().map(Json))
        .bind(&delivery.organization_number)
        .bind(delivery.channel)
        .bind(delivery.original_channel)
        .bind(delivery.status)
        .bind(&delivery.content)
        .bind(&delivery.origin)
        .bind(&delivery.issuer)
        .bind(&delivery.municipality_id)
        .bind(delivery.created_at)
        .bind(claimed)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn history_in(
        tx: &mut Transaction<'_, Postgres>,
        delivery: &Delivery,
        status_detail: Option<&str>,
    ) -> EngineResult<HistoryRecord> {
        let record: HistoryRecord = sqlx::query_as(
            r#"
            INSERT INTO delivery_history (
                delivery_id, message_id, batch_id, party_id, channel, original_channel,
                status, status_detail, content, origin, issuer, municipality_id, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, NOW())
            RETURNING *
            "#,
        )
        .bind(delivery.delivery_id)
        .bind(delivery.message_id)
        .bind(delivery.batch_id)
        .bind(delivery.party_id)
        .bind(delivery.channel)
        .bind(delivery.original_channel)
        .bind(delivery.status)
        .bind(status_detail)
        .bind(&delivery.content)
        .bind(&delivery.origin)
        .bind(&delivery.issuer)
        .bind(&delivery.municipality_id)
        .fetch_one(&mut **tx)
        .await?;
        Ok(record)
    }

    async fn fetch_pending(&self, filter: &str, id: Uuid) -> EngineResult<Vec<Delivery>> {
        let rows: Vec<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pending_deliveries WHERE {} = $1 ORDER BY created_at",
            DELIVERY_COLUMNS, filter
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Delivery::from).collect())
    }

    async fn fetch_history(&self, filter: &str, id: Uuid) -> EngineResult<Vec<HistoryRecord>> {
        let records: Vec<HistoryRecord> = sqlx::query_as(&format!(
            "SELECT * FROM delivery_history WHERE {} = $1 ORDER BY id",
            filter
        ))
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}

#[async_trait]
impl DeliveryRepository for PgDeliveryRepository {
    async fn insert_all(&self, deliveries: &[Delivery]) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;
        for delivery in deliveries {
            Self::insert_in(&mut tx, delivery, false).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, delivery_id: Uuid) -> EngineResult<Option<Delivery>> {
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            "SELECT {} FROM pending_deliveries WHERE delivery_id = $1",
            DELIVERY_COLUMNS
        ))
        .bind(delivery_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Delivery::from))
    }

    async fn claim(&self, delivery_id: Uuid, lease: Duration) -> EngineResult<Claim> {
        let row: Option<DeliveryRow> = sqlx::query_as(&format!(
            r#"
            UPDATE pending_deliveries
            SET claimed_at = NOW()
            WHERE delivery_id = $1
              AND (claimed_at IS NULL OR claimed_at <= NOW() - make_interval(secs => $2))
            RETURNING {}
            "#,
            DELIVERY_COLUMNS
        ))
        .bind(delivery_id)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            return Ok(Claim::Claimed(row.into()));
        }

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM pending_deliveries WHERE delivery_id = $1)",
        )
        .bind(delivery_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(if exists { Claim::Held } else { Claim::Missing })
    }

    async fn update(&self, delivery: &Delivery) -> EngineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE pending_deliveries
            SET party_id = $2, address = $3, organization_number = $4,
                channel = $5, status = $6, content = $7
            WHERE delivery_id = $1
            "#,
        )
        .bind(delivery.delivery_id)
        .bind(delivery.party_id)
        .bind(delivery.address.as_ref().map(Json))
        .bind(&delivery.organization_number)
        .bind(delivery.channel)
        .bind(delivery.status)
        .bind(&delivery.content)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::DeliveryNotFound(delivery.delivery_id));
        }
        Ok(())
    }

    async fn replace(
        &self,
        replaced: Uuid,
        deliveries: &[Delivery],
        settled: &[Settled],
    ) -> EngineResult<Vec<HistoryRecord>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM pending_deliveries WHERE delivery_id = $1")
            .bind(replaced)
            .execute(&mut *tx)
            .await?;
        for delivery in deliveries {
            Self::insert_in(&mut tx, delivery, true).await?;
        }
        let mut records = Vec::with_capacity(settled.len());
        for s in settled {
            let record = Self::history_in(&mut tx, &s.delivery, s.status_detail.as_deref()).await?;
            records.push(record);
        }
        tx.commit().await?;
        Ok(records)
    }

    async fn exists_for_batch(&self, batch_id: Uuid) -> EngineResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM pending_deliveries WHERE batch_id = $1)",
        )
        .bind(batch_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn archive(
        &self,
        delivery: &Delivery,
        status_detail: Option<String>,
    ) -> EngineResult<HistoryRecord> {
        let mut tx = self.pool.begin().await?;
        let record = Self::history_in(&mut tx, delivery, status_detail.as_deref()).await?;

        let deleted = sqlx::query("DELETE FROM pending_deliveries WHERE delivery_id = $1")
            .bind(delivery.delivery_id)
            .execute(&mut *tx)
            .await?;

        if deleted.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(EngineError::AlreadyArchived(delivery.delivery_id));
        }

        tx.commit().await?;
        Ok(record)
    }

    async fn unclaimed_ids(&self) -> EngineResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT delivery_id FROM pending_deliveries WHERE claimed_at IS NULL ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn stale_claim_ids(&self, lease: Duration) -> EngineResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT delivery_id FROM pending_deliveries
            WHERE claimed_at <= NOW() - make_interval(secs => $1)
            ORDER BY created_at
            "#,
        )
        .bind(lease.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn pending_by_message(&self, message_id: Uuid) -> EngineResult<Vec<Delivery>> {
        self.fetch_pending("message_id", message_id).await
    }

    async fn pending_by_batch(&self, batch_id: Uuid) -> EngineResult<Vec<Delivery>> {
        self.fetch_pending("batch_id", batch_id).await
    }

    async fn history_by_delivery(&self, delivery_id: Uuid) -> EngineResult<Vec<HistoryRecord>> {
        self.fetch_history("delivery_id", delivery_id).await
    }

    async fn history_by_message(&self, message_id: Uuid) -> EngineResult<Vec<HistoryRecord>> {
        self.fetch_history("message_id", message_id).await
    }

    async fn history_by_batch(&self, batch_id: Uuid) -> EngineResult<Vec<HistoryRecord>> {
        self.fetch_history("batch_id", batch_id).await
    }

    async fn history_by_party(
        &self,
        municipality_id: &str,
        party_id: Uuid,
    ) -> EngineResult<Vec<HistoryRecord>> {
        let records: Vec<HistoryRecord> = sqlx::query_as(
            "SELECT * FROM delivery_history WHERE municipality_id = $1 AND party_id = $2 ORDER BY id",
        )
        .bind(municipality_id)
        .bind(party_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }
}
