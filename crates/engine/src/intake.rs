//! Intake: persists new deliveries and schedules them.
//!
//! Rows are committed first and triggers pushed second, so a consumer can
//! never observe a trigger for an uncommitted row. A push that fails after the
//! commit leaves the row pending for startup recovery.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::request::{
    Attachment, DigitalMailRequest, LetterAttachment, LetterRequest, MessageRequest, Request,
    SupportInfo,
};
use herald_common::types::{Address, Attribution, Channel, Delivery};

use crate::dispatch::DispatchTrigger;
use crate::error::{EngineError, EngineResult};
use crate::repository::DeliveryRepository;

/// Identifiers handed back for one accepted message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub message_id: Uuid,
    pub delivery_id: Uuid,
    pub batch_id: Option<Uuid>,
}

/// Identifiers handed back for a request split into several messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReceipt {
    pub batch_id: Uuid,
    pub messages: Vec<Receipt>,
}

/// A letter to any number of parties and/or postal addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterBatchRequest {
    #[serde(default)]
    pub party_ids: Vec<Uuid>,
    #[serde(default)]
    pub addresses: Vec<Address>,
    pub organization_number: Option<String>,
    pub subject: Option<String>,
    pub sender: Option<SupportInfo>,
    pub content_type: String,
    pub body: String,
    pub department: Option<String>,
    pub deviation: Option<String>,
    #[serde(default)]
    pub attachments: Vec<LetterAttachment>,
}

impl LetterBatchRequest {
    fn letter(&self, party_id: Option<Uuid>, address: Option<Address>) -> LetterRequest {
        LetterRequest {
            party_id,
            address,
            organization_number: self.organization_number.clone(),
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            content_type: self.content_type.clone(),
            body: self.body.clone(),
            department: self.department.clone(),
            deviation: self.deviation.clone(),
            attachments: self.attachments.clone(),
        }
    }
}

/// Digital mail to several parties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitalMailBatchRequest {
    pub party_ids: Vec<Uuid>,
    pub organization_number: Option<String>,
    pub sender: Option<SupportInfo>,
    pub subject: Option<String>,
    pub department: Option<String>,
    pub content_type: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Clone)]
pub struct Intake {
    repository: Arc<dyn DeliveryRepository>,
    trigger: DispatchTrigger,
}

impl Intake {
    pub fn new(repository: Arc<dyn DeliveryRepository>, trigger: DispatchTrigger) -> Self {
        Self {
            repository,
            trigger,
        }
    }

    /// Accept a single-recipient request.
    ///
    /// Snail mail and letters always belong to a batch, since printing is
    /// submitted per batch; one is created when the request has none.
    pub async fn create_delivery(
        &self,
        municipality_id: &str,
        request: Request,
        batch_id: Option<Uuid>,
        attribution: &Attribution,
    ) -> EngineResult<Receipt> {
        let batch_id = match request.channel() {
            Channel::SnailMail | Channel::Letter => Some(batch_id.unwrap_or_else(Uuid::new_v4)),
            _ => batch_id,
        };

        let delivery = Delivery::new(municipality_id, Uuid::new_v4(), batch_id, &request, attribution)?;
        let receipt = Receipt {
            message_id: delivery.message_id,
            delivery_id: delivery.delivery_id,
            batch_id,
        };

        self.commit_and_schedule(vec![delivery]).await?;
        Ok(receipt)
    }

    /// Accept a list of generic messages as one batch.
    pub async fn create_messages(
        &self,
        municipality_id: &str,
        messages: Vec<MessageRequest>,
        attribution: &Attribution,
    ) -> EngineResult<BatchReceipt> {
        let requests = messages.into_iter().map(Request::Message).collect();
        self.create_batch(municipality_id, requests, attribution).await
    }

    /// Accept a letter; every party and every address becomes its own message.
    pub async fn create_letter(
        &self,
        municipality_id: &str,
        letter: LetterBatchRequest,
        attribution: &Attribution,
    ) -> EngineResult<BatchReceipt> {
        let requests: Vec<Request> = letter
            .party_ids
            .iter()
            .map(|party_id| Request::Letter(letter.letter(Some(*party_id), None)))
            .chain(
                letter
                    .addresses
                    .iter()
                    .map(|address| Request::Letter(letter.letter(None, Some(address.clone())))),
            )
            .collect();
        self.create_batch(municipality_id, requests, attribution).await
    }

    /// Accept digital mail to several parties as one batch.
    pub async fn create_digital_mail(
        &self,
        municipality_id: &str,
        mail: DigitalMailBatchRequest,
        attribution: &Attribution,
    ) -> EngineResult<BatchReceipt> {
        let requests = mail
            .party_ids
            .iter()
            .map(|party_id| {
                Request::DigitalMail(DigitalMailRequest {
                    party_id: *party_id,
                    organization_number: mail.organization_number.clone(),
                    sender: mail.sender.clone(),
                    subject: mail.subject.clone(),
                    department: mail.department.clone(),
                    content_type: mail.content_type.clone(),
                    body: mail.body.clone(),
                    attachments: mail.attachments.clone(),
                })
            })
            .collect();
        self.create_batch(municipality_id, requests, attribution).await
    }

    async fn create_batch(
        &self,
        municipality_id: &str,
        requests: Vec<Request>,
        attribution: &Attribution,
    ) -> EngineResult<BatchReceipt> {
        if requests.is_empty() {
            return Err(EngineError::InvalidRequest(
                "Request names no recipients".to_string(),
            ));
        }

        let batch_id = Uuid::new_v4();
        let deliveries = requests
            .iter()
            .map(|request| {
                Delivery::new(municipality_id, Uuid::new_v4(), Some(batch_id), request, attribution)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let messages = deliveries
            .iter()
            .map(|d| Receipt {
                message_id: d.message_id,
                delivery_id: d.delivery_id,
                batch_id: Some(batch_id),
            })
            .collect();

        self.commit_and_schedule(deliveries).await?;
        Ok(BatchReceipt { batch_id, messages })
    }

    async fn commit_and_schedule(&self, deliveries: Vec<Delivery>) -> EngineResult<()> {
        self.repository.insert_all(&deliveries).await?;

        for delivery in &deliveries {
            if let Err(e) = self.trigger.schedule(delivery.delivery_id, delivery.channel).await {
                tracing::error!(
                    delivery_id = %delivery.delivery_id,
                    error = %e,
                    "Failed to schedule committed delivery, left for recovery"
                );
            }
        }

        tracing::info!(
            count = deliveries.len(),
            channel = %deliveries.first().map(|d| d.channel.to_string()).unwrap_or_default(),
            "Deliveries accepted"
        );
        Ok(())
    }
}
