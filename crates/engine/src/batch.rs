//! Batch completion.
//!
//! A batch is open while any pending row references it. The check below is a
//! plain existence query, so two deliveries archived at the same moment can
//! both see the batch as closed and both submit it; the print vendor absorbs
//! the duplicate.

use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use herald_common::types::{Channel, DeliveryStatus};

use crate::capability::PrintBatchVendor;
use crate::error::EngineResult;
use crate::repository::DeliveryRepository;

/// What a batch check concluded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum BatchClosure {
    /// Other deliveries of the batch are still pending.
    Open,
    /// Closed, but no snail-mail deliveries were made under it.
    NothingToPrint,
    /// Closed, and every snail-mail delivery failed.
    AllPrintFailed,
    /// Closed and handed to the print vendor.
    Submitted,
    /// Closed, but the print vendor rejected the submission.
    SubmissionFailed(String),
}

pub struct BatchMonitor {
    repository: Arc<dyn DeliveryRepository>,
    print_vendor: Arc<dyn PrintBatchVendor>,
}

impl BatchMonitor {
    pub fn new(
        repository: Arc<dyn DeliveryRepository>,
        print_vendor: Arc<dyn PrintBatchVendor>,
    ) -> Self {
        Self {
            repository,
            print_vendor,
        }
    }

    /// Run after a delivery carrying `batch_id` has been archived.
    pub async fn on_archived(&self, municipality_id: &str, batch_id: Uuid) -> EngineResult<BatchClosure> {
        if self.repository.exists_for_batch(batch_id).await? {
            tracing::debug!(batch_id = %batch_id, "Batch still open");
            return Ok(BatchClosure::Open);
        }

        let printed: Vec<DeliveryStatus> = self
            .repository
            .history_by_batch(batch_id)
            .await?
            .into_iter()
            .filter(|r| r.channel == Channel::SnailMail)
            .map(|r| r.status)
            .collect();

        if printed.is_empty() {
            tracing::debug!(batch_id = %batch_id, "Batch closed without snail mail");
            return Ok(BatchClosure::NothingToPrint);
        }

        if printed.iter().all(|s| *s == DeliveryStatus::Failed) {
            tracing::info!(
                batch_id = %batch_id,
                failed = printed.len(),
                "Batch closed but every snail mail failed, skipping print submission"
            );
            return Ok(BatchClosure::AllPrintFailed);
        }

        match self.print_vendor.submit_batch(municipality_id, batch_id).await {
            Ok(()) => {
                tracing::info!(
                    batch_id = %batch_id,
                    letters = printed.len(),
                    "Print batch submitted"
                );
                Ok(BatchClosure::Submitted)
            }
            Err(e) => {
                tracing::error!(batch_id = %batch_id, error = %e, "Print batch submission failed");
                Ok(BatchClosure::SubmissionFailed(e.to_string()))
            }
        }
    }
}
