//! Letter routing: digital mail first, snail mail as fallback.
//!
//! Attachments are filtered once per target. A digital attempt only sees
//! DIGITAL_MAIL/ANY attachments, the physical fallback only SNAIL_MAIL/ANY.
//!
//! A letter with a party id always goes through the digital step, even when
//! no attachment qualifies for it, so its snail mail is a second attempt with
//! its own delivery id. Only an address-only letter prints under its own id.

use uuid::Uuid;

use herald_common::request::{
    Attachment, DigitalMailRequest, LetterRequest, Request, SnailMailRequest,
};
use herald_common::types::{Address, Delivery, DeliveryStatus, HistoryRecord};

use crate::error::EngineResult;
use crate::orchestrator::Orchestrator;

pub(crate) fn digital_mail_request(
    letter: &LetterRequest,
    party_id: Uuid,
    attachments: Vec<Attachment>,
) -> DigitalMailRequest {
    DigitalMailRequest {
        party_id,
        organization_number: letter.organization_number.clone(),
        sender: letter.sender.clone(),
        subject: letter.subject.clone(),
        department: letter.department.clone(),
        content_type: letter.content_type.clone(),
        body: letter.body.clone(),
        attachments,
    }
}

pub(crate) fn snail_mail_request(
    letter: &LetterRequest,
    address: Option<Address>,
    attachments: Vec<Attachment>,
) -> SnailMailRequest {
    SnailMailRequest {
        party_id: letter.party_id,
        address,
        department: letter.department.clone(),
        deviation: letter.deviation.clone(),
        attachments,
    }
}

impl Orchestrator {
    pub(crate) async fn route_letter(
        &self,
        delivery: &Delivery,
        letter: LetterRequest,
        archived: &mut Vec<HistoryRecord>,
    ) -> EngineResult<()> {
        let mut digital_attempted = false;

        if let Some(party_id) = letter.party_id {
            let attachments = letter.digital_attachments();
            if attachments.is_empty() {
                tracing::debug!(
                    delivery_id = %delivery.delivery_id,
                    "Letter has no digital attachments, skipping digital mail"
                );
            } else {
                let request =
                    Request::DigitalMail(digital_mail_request(&letter, party_id, attachments));
                let digital = delivery.rewrite(&request, false)?;
                self.repository.update(&digital).await?;

                if self.attempt(digital, archived).await? == DeliveryStatus::Sent {
                    return Ok(());
                }
                tracing::debug!(
                    delivery_id = %delivery.delivery_id,
                    message_id = %delivery.message_id,
                    "Digital mail not delivered, falling back to snail mail"
                );
                digital_attempted = true;
            }
        }

        self.snail_mail_fallback(delivery, &letter, digital_attempted, archived)
            .await
    }

    async fn snail_mail_fallback(
        &self,
        delivery: &Delivery,
        letter: &LetterRequest,
        digital_attempted: bool,
        archived: &mut Vec<HistoryRecord>,
    ) -> EngineResult<()> {
        let second_attempt = letter.party_id.is_some();
        let attachments = letter.physical_attachments();

        if attachments.is_empty() {
            if digital_attempted {
                // The failed digital attempt is the final word for this letter.
                tracing::debug!(
                    delivery_id = %delivery.delivery_id,
                    "No printable attachments, keeping failed digital outcome"
                );
                return Ok(());
            }
            let detail = if letter.party_id.is_some() {
                "Letter has no attachments eligible for digital or physical delivery"
            } else {
                "Letter has no attachments eligible for physical delivery"
            };
            return self
                .conclude(
                    delivery.clone(),
                    DeliveryStatus::Failed,
                    Some(detail.to_string()),
                    archived,
                )
                .await;
        }

        let address = self.resolve_address(delivery, letter).await;
        let request = Request::SnailMail(snail_mail_request(
            letter,
            address.as_ref().ok().cloned(),
            attachments,
        ));

        let snail = delivery.rewrite(&request, second_attempt)?;
        if second_attempt {
            self.repository
                .replace(delivery.delivery_id, std::slice::from_ref(&snail), &[])
                .await?;
        } else {
            self.repository.update(&snail).await?;
        }

        match address {
            Ok(_) => self.attempt(snail, archived).await.map(|_| ()),
            Err(detail) => {
                self.conclude(snail, DeliveryStatus::Failed, Some(detail), archived)
                    .await
            }
        }
    }

    /// Address given on the letter, otherwise the party's registered address.
    async fn resolve_address(
        &self,
        delivery: &Delivery,
        letter: &LetterRequest,
    ) -> Result<Address, String> {
        if let Some(address) = &letter.address {
            return Ok(address.clone());
        }

        let Some(party_id) = letter.party_id else {
            return Err("Letter has neither a party id nor an address".to_string());
        };

        self.capabilities
            .addresses
            .resolve(&delivery.municipality_id, party_id)
            .await
            .map_err(|e| {
                tracing::warn!(
                    delivery_id = %delivery.delivery_id,
                    party_id = %party_id,
                    error = %e,
                    "Address lookup failed"
                );
                format!("Address lookup failed: {}", e)
            })
    }
}
