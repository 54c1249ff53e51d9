//! Delivery orchestrator.
//!
//! Turns one pending delivery into one or more terminal history rows:
//! 1. Claim the pending row (a missing row means the trigger is stale, a held
//!    claim means another invocation is already on it)
//! 2. Rebuild the typed request from its content
//! 3. Route by channel: generic messages through contact settings, letters
//!    through digital mail with a snail-mail fallback, everything else
//!    straight to its sender
//! 4. Run the batch check once everything this invocation produced is archived

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use herald_common::config::AppConfig;
use herald_common::request::{EmailSender, Request};
use herald_common::types::{Delivery, DeliveryStatus, HistoryRecord};

use crate::archiver::Archiver;
use crate::batch::{BatchClosure, BatchMonitor};
use crate::capability::{Capabilities, SendContext};
use crate::error::{EngineError, EngineResult};
use crate::repository::{Claim, DeliveryRepository};

/// Sender identities used when a generic message names none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingDefaults {
    pub sms_sender_name: String,
    pub email_sender: EmailSender,
}

impl RoutingDefaults {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            sms_sender_name: config.default_sms_sender_name.clone(),
            email_sender: EmailSender {
                name: config.default_email_sender_name.clone(),
                address: config.default_email_sender_address.clone(),
                reply_to: None,
            },
        }
    }
}

impl Default for RoutingDefaults {
    fn default() -> Self {
        Self {
            sms_sender_name: "Herald".to_string(),
            email_sender: EmailSender {
                name: "Herald".to_string(),
                address: "noreply@example.org".to_string(),
                reply_to: None,
            },
        }
    }
}

/// Result of one orchestration.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    pub delivery_id: Uuid,
    pub message_id: Uuid,
    /// History rows written by this invocation, in archive order.
    pub archived: Vec<HistoryRecord>,
    /// Batch check result, when the delivery belonged to a batch.
    pub batch: Option<BatchClosure>,
}

/// How long a claim protects a row before another invocation may take it over.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

pub struct Orchestrator {
    pub(crate) repository: Arc<dyn DeliveryRepository>,
    pub(crate) capabilities: Capabilities,
    pub(crate) defaults: RoutingDefaults,
    archiver: Archiver,
    claim_lease: Duration,
    batches: BatchMonitor,
}

impl Orchestrator {
    pub fn new(
        repository: Arc<dyn DeliveryRepository>,
        capabilities: Capabilities,
        defaults: RoutingDefaults,
    ) -> Self {
        Self {
            archiver: Archiver::new(repository.clone()),
            batches: BatchMonitor::new(repository.clone(), capabilities.print_vendor.clone()),
            repository,
            capabilities,
            defaults,
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }

    pub fn with_claim_lease(mut self, claim_lease: Duration) -> Self {
        self.claim_lease = claim_lease;
        self
    }

    pub fn claim_lease(&self) -> Duration {
        self.claim_lease
    }

    /// Drive the pending delivery `delivery_id` to a terminal state.
    ///
    /// Returns `DeliveryNotFound` without side effects when the row is gone,
    /// which is what a repeated trigger for an archived delivery looks like.
    /// Returns `AlreadyClaimed` without side effects when another invocation
    /// is working on the row.
    pub async fn resolve_and_deliver(&self, delivery_id: Uuid) -> EngineResult<Outcome> {
        let delivery = match self.repository.claim(delivery_id, self.claim_lease).await? {
            Claim::Claimed(delivery) => delivery,
            Claim::Held => {
                tracing::debug!(
                    delivery_id = %delivery_id,
                    "Delivery already claimed by another orchestration, ignoring"
                );
                return Err(EngineError::AlreadyClaimed(delivery_id));
            }
            Claim::Missing => {
                tracing::warn!(
                    delivery_id = %delivery_id,
                    "Dispatch trigger for a delivery that is not pending, ignoring"
                );
                return Err(EngineError::DeliveryNotFound(delivery_id));
            }
        };

        tracing::debug!(
            delivery_id = %delivery_id,
            message_id = %delivery.message_id,
            channel = %delivery.channel,
            "Resolving delivery"
        );

        let mut archived = Vec::new();
        let routed = self.route(&delivery, &mut archived).await;

        let batch = match delivery.batch_id {
            Some(batch_id) if !archived.is_empty() => {
                match self.batches.on_archived(&delivery.municipality_id, batch_id).await {
                    Ok(closure) => Some(closure),
                    Err(e) if routed.is_err() => {
                        tracing::warn!(batch_id = %batch_id, error = %e, "Batch check failed");
                        None
                    }
                    Err(e) => return Err(e),
                }
            }
            _ => None,
        };

        routed?;

        Ok(Outcome {
            delivery_id,
            message_id: delivery.message_id,
            archived,
            batch,
        })
    }

    async fn route(&self, delivery: &Delivery, archived: &mut Vec<HistoryRecord>) -> EngineResult<()> {
        let request = match Request::from_content(delivery.channel, &delivery.content) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(
                    delivery_id = %delivery.delivery_id,
                    channel = %delivery.channel,
                    error = %e,
                    "Stored content cannot be reconstructed"
                );
                let detail = format!("Unable to reconstruct request: {}", e);
                self.conclude(delivery.clone(), DeliveryStatus::Failed, Some(detail), archived)
                    .await?;
                return Err(e.into());
            }
        };

        match request {
            Request::Message(message) => self.route_message(delivery, message, archived).await,
            Request::Letter(letter) => self.route_letter(delivery, letter, archived).await,
            _ => self.attempt(delivery.clone(), archived).await.map(|_| ()),
        }
    }

    /// Deliver `delivery` through the sender of its current channel and
    /// archive the result. A sender error is a FAILED outcome, not an engine
    /// error; nothing here retries.
    pub(crate) async fn attempt(
        &self,
        delivery: Delivery,
        archived: &mut Vec<HistoryRecord>,
    ) -> EngineResult<DeliveryStatus> {
        let channel = delivery.channel;

        let Some(sender) = self.capabilities.sender(channel) else {
            tracing::error!(
                delivery_id = %delivery.delivery_id,
                channel = %channel,
                "No sender registered for channel"
            );
            let failed = delivery.with_status(DeliveryStatus::Failed);
            let detail = format!("No sender available for channel {}", channel);
            archived.push(self.archiver.archive(&failed, Some(detail)).await?);
            return Err(EngineError::UnsupportedChannel(channel));
        };

        let request = match Request::from_content(channel, &delivery.content) {
            Ok(request) => request,
            Err(e) => {
                let detail = format!("Unable to reconstruct request: {}", e);
                self.conclude(delivery, DeliveryStatus::Failed, Some(detail), archived)
                    .await?;
                return Err(e.into());
            }
        };

        let ctx = SendContext::from(&delivery);
        let (status, detail) = match sender.send(&ctx, &request).await {
            Ok(status) if status.is_terminal() => (status, None),
            Ok(status) => (
                DeliveryStatus::Failed,
                Some(format!("Sender returned non-terminal status {}", status)),
            ),
            Err(e) => {
                tracing::warn!(
                    delivery_id = %delivery.delivery_id,
                    channel = %channel,
                    error = %e,
                    "Delivery attempt failed"
                );
                (DeliveryStatus::Failed, Some(e.to_string()))
            }
        };

        let record = self
            .archiver
            .archive(&delivery.with_status(status), detail)
            .await?;
        archived.push(record);
        Ok(status)
    }

    /// Archive `delivery` with `status` without attempting delivery.
    pub(crate) async fn conclude(
        &self,
        delivery: Delivery,
        status: DeliveryStatus,
        detail: Option<String>,
        archived: &mut Vec<HistoryRecord>,
    ) -> EngineResult<()> {
        let record = self
            .archiver
            .archive(&delivery.with_status(status), detail)
            .await?;
        archived.push(record);
        Ok(())
    }
}
