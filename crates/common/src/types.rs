use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::request::Request;

/// Delivery channels known to the engine.
///
/// `Message` and `Letter` are logical channels: they never reach a sender
/// directly but are rewritten into one of the physical channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Channel {
    Message,
    Email,
    Sms,
    WebMessage,
    DigitalMail,
    DigitalInvoice,
    SnailMail,
    Letter,
    Slack,
}

impl Channel {
    /// Channels that are always resolved into another channel before delivery.
    pub fn is_logical(&self) -> bool {
        matches!(self, Channel::Message | Channel::Letter)
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Message => write!(f, "MESSAGE"),
            Channel::Email => write!(f, "EMAIL"),
            Channel::Sms => write!(f, "SMS"),
            Channel::WebMessage => write!(f, "WEB_MESSAGE"),
            Channel::DigitalMail => write!(f, "DIGITAL_MAIL"),
            Channel::DigitalInvoice => write!(f, "DIGITAL_INVOICE"),
            Channel::SnailMail => write!(f, "SNAIL_MAIL"),
            Channel::Letter => write!(f, "LETTER"),
            Channel::Slack => write!(f, "SLACK"),
        }
    }
}

/// Delivery status. Everything except `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "text", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
    NoContactSettingsFound,
    NoContactWanted,
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "PENDING"),
            DeliveryStatus::Sent => write!(f, "SENT"),
            DeliveryStatus::Failed => write!(f, "FAILED"),
            DeliveryStatus::NoContactSettingsFound => write!(f, "NO_CONTACT_SETTINGS_FOUND"),
            DeliveryStatus::NoContactWanted => write!(f, "NO_CONTACT_WANTED"),
        }
    }
}

/// Postal address used for physical delivery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub care_of: Option<String>,
    pub street: String,
    pub apartment_number: Option<String>,
    pub zip_code: String,
    pub city: String,
    pub country: Option<String>,
}

/// Caller attribution carried from intake to history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub origin: Option<String>,
    pub issuer: Option<String>,
}

/// A pending delivery: one row of the pending store.
///
/// `content` is the serialized [`Request`] for the current `channel` and is
/// replaced whenever the delivery is rewritten to another channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub delivery_id: Uuid,
    pub message_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub party_id: Option<Uuid>,
    pub address: Option<Address>,
    pub organization_number: Option<String>,
    pub channel: Channel,
    pub original_channel: Channel,
    pub status: DeliveryStatus,
    pub content: serde_json::Value,
    pub origin: Option<String>,
    pub issuer: Option<String>,
    pub municipality_id: String,
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    /// Build a fresh pending delivery for `request`.
    pub fn new(
        municipality_id: &str,
        message_id: Uuid,
        batch_id: Option<Uuid>,
        request: &Request,
        attribution: &Attribution,
    ) -> Result<Self, serde_json::Error> {
        let channel = request.channel();
        Ok(Self {
            delivery_id: Uuid::new_v4(),
            message_id,
            batch_id,
            party_id: request.party_id(),
            address: request.address().cloned(),
            organization_number: request.organization_number().map(str::to_string),
            channel,
            original_channel: channel,
            status: DeliveryStatus::Pending,
            content: request.to_content()?,
            origin: attribution.origin.clone(),
            issuer: attribution.issuer.clone(),
            municipality_id: municipality_id.to_string(),
            created_at: Utc::now(),
        })
    }

    /// Rewrite this delivery into the channel of `request`.
    ///
    /// `message_id`, `batch_id`, `original_channel` and attribution survive.
    /// With `fresh_id` the result represents a new physical attempt and gets a
    /// new `delivery_id`; otherwise it substitutes the current row.
    pub fn rewrite(&self, request: &Request, fresh_id: bool) -> Result<Self, serde_json::Error> {
        let party_id = request.party_id().or(self.party_id);
        Ok(Self {
            delivery_id: if fresh_id {
                Uuid::new_v4()
            } else {
                self.delivery_id
            },
            party_id,
            address: request.address().cloned().or_else(|| self.address.clone()),
            organization_number: request
                .organization_number()
                .map(str::to_string)
                .or_else(|| self.organization_number.clone()),
            channel: request.channel(),
            status: DeliveryStatus::Pending,
            content: request.to_content()?,
            ..self.clone()
        })
    }

    /// Copy of this delivery under a new `delivery_id`, for fan-out branches
    /// that are archived without being rewritten.
    pub fn fork(&self) -> Self {
        Self {
            delivery_id: Uuid::new_v4(),
            ..self.clone()
        }
    }

    pub fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = status;
        self
    }
}

/// One immutable terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    #[serde(skip)]
    pub id: i64,
    pub delivery_id: Uuid,
    pub message_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub party_id: Option<Uuid>,
    pub channel: Channel,
    pub original_channel: Channel,
    pub status: DeliveryStatus,
    pub status_detail: Option<String>,
    pub content: serde_json::Value,
    pub origin: Option<String>,
    pub issuer: Option<String>,
    pub municipality_id: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// History row derived from a delivery's current fields.
    pub fn from_delivery(delivery: &Delivery, status_detail: Option<String>) -> Self {
        Self {
            id: 0,
            delivery_id: delivery.delivery_id,
            message_id: delivery.message_id,
            batch_id: delivery.batch_id,
            party_id: delivery.party_id,
            channel: delivery.channel,
            original_channel: delivery.original_channel,
            status: delivery.status,
            status_detail,
            content: delivery.content.clone(),
            origin: delivery.origin.clone(),
            issuer: delivery.issuer.clone(),
            municipality_id: delivery.municipality_id.clone(),
            created_at: Utc::now(),
        }
    }
}
