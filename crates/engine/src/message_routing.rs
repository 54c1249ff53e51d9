//! Generic message routing.
//!
//! A generic message names a party, not a channel. The party's contact
//! settings decide where it goes, and every returned setting becomes its own
//! delivery with its own terminal outcome. Settings that need no attempt are
//! written to history in the same transaction that retires the generic row,
//! so the generic content is never left pending under another id.

use herald_common::request::{EmailRequest, MessageRequest, Request, SmsRequest};
use herald_common::types::{Delivery, DeliveryStatus, HistoryRecord};

use crate::archiver::log_archived;
use crate::capability::ContactPreference;
use crate::error::{EngineError, EngineResult};
use crate::orchestrator::{Orchestrator, RoutingDefaults};
use crate::repository::Settled;

/// Where a single contact setting sends a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ContactRoute {
    Email(String),
    Sms(String),
    NoContact,
    /// Setting that cannot be delivered to; carries the reason.
    Unusable(String),
}

pub(crate) fn classify(preference: &ContactPreference) -> ContactRoute {
    if !preference.enabled {
        return ContactRoute::NoContact;
    }

    let destination = preference
        .destination
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    match preference.channel.trim().to_ascii_uppercase().as_str() {
        "EMAIL" => match destination {
            Some(address) => ContactRoute::Email(address.to_string()),
            None => ContactRoute::Unusable("Contact method EMAIL has no destination".to_string()),
        },
        "SMS" => match destination {
            Some(number) => ContactRoute::Sms(number.to_string()),
            None => ContactRoute::Unusable("Contact method SMS has no destination".to_string()),
        },
        "NO_CONTACT" => ContactRoute::NoContact,
        "" => ContactRoute::Unusable("Contact method is missing".to_string()),
        other => ContactRoute::Unusable(format!("Unknown contact method {}", other)),
    }
}

pub(crate) fn email_request(
    message: &MessageRequest,
    email_address: String,
    defaults: &RoutingDefaults,
) -> EmailRequest {
    EmailRequest {
        party_id: Some(message.party_id),
        email_address,
        subject: message.subject.clone(),
        message: Some(message.message.clone()),
        html_message: message.html_message.clone(),
        sender: message
            .sender
            .email
            .clone()
            .unwrap_or_else(|| defaults.email_sender.clone()),
        attachments: Vec::new(),
    }
}

pub(crate) fn sms_request(
    message: &MessageRequest,
    mobile_number: String,
    defaults: &RoutingDefaults,
) -> SmsRequest {
    SmsRequest {
        party_id: Some(message.party_id),
        sender: message
            .sender
            .sms
            .as_ref()
            .map(|s| s.name.clone())
            .unwrap_or_else(|| defaults.sms_sender_name.clone()),
        mobile_number,
        message: message.message.clone(),
    }
}

impl Orchestrator {
    pub(crate) async fn route_message(
        &self,
        delivery: &Delivery,
        message: MessageRequest,
        archived: &mut Vec<HistoryRecord>,
    ) -> EngineResult<()> {
        let preferences = match self
            .capabilities
            .contacts
            .resolve(&delivery.municipality_id, message.party_id, &message.filters)
            .await
        {
            Ok(preferences) => preferences,
            Err(e) => {
                let detail = format!("Contact settings lookup failed: {}", e);
                return self
                    .conclude(delivery.clone(), DeliveryStatus::Failed, Some(detail), archived)
                    .await;
            }
        };

        if preferences.is_empty() {
            tracing::debug!(
                delivery_id = %delivery.delivery_id,
                party_id = %message.party_id,
                "No contact settings found"
            );
            return self
                .conclude(
                    delivery.clone(),
                    DeliveryStatus::NoContactSettingsFound,
                    None,
                    archived,
                )
                .await;
        }

        // The first branch substitutes the generic row; further branches are
        // additional deliveries of the same message.
        let mut attempts = Vec::new();
        let mut settled = Vec::new();
        for (index, preference) in preferences.iter().enumerate() {
            let fresh_id = index > 0;
            match classify(preference) {
                ContactRoute::Email(address) => {
                    let request = Request::Email(email_request(&message, address, &self.defaults));
                    attempts.push(delivery.rewrite(&request, fresh_id)?);
                }
                ContactRoute::Sms(number) => {
                    let request = Request::Sms(sms_request(&message, number, &self.defaults));
                    attempts.push(delivery.rewrite(&request, fresh_id)?);
                }
                ContactRoute::NoContact => settled.push(Settled {
                    delivery: fork(delivery, fresh_id).with_status(DeliveryStatus::NoContactWanted),
                    status_detail: None,
                }),
                ContactRoute::Unusable(reason) => settled.push(Settled {
                    delivery: fork(delivery, fresh_id).with_status(DeliveryStatus::Failed),
                    status_detail: Some(reason),
                }),
            }
        }

        let records = self
            .repository
            .replace(delivery.delivery_id, &attempts, &settled)
            .await?;
        records.iter().for_each(log_archived);
        archived.extend(records);

        tracing::debug!(
            delivery_id = %delivery.delivery_id,
            message_id = %delivery.message_id,
            attempts = attempts.len(),
            settled = settled.len(),
            "Generic message fanned out"
        );

        // Attempts are independent: one failing must not strand the rest.
        let mut first_error: Option<EngineError> = None;
        for attempt in attempts {
            if let Err(e) = self.attempt(attempt, archived).await {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

fn fork(delivery: &Delivery, fresh_id: bool) -> Delivery {
    if fresh_id {
        delivery.fork()
    } else {
        delivery.clone()
    }
}
