//! Typed delivery requests.
//!
//! A [`Request`] is the self-describing content stored on every pending
//! delivery. It is tagged with its channel so that reading it back can never
//! silently pair content with the wrong channel.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{Address, Channel};

/// Failure to turn stored content back into a typed request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Malformed {channel} content: {source}")]
    Malformed {
        channel: Channel,
        #[source]
        source: serde_json::Error,
    },

    #[error("Content describes a {actual} request but the delivery targets {expected}")]
    ChannelMismatch { expected: Channel, actual: Channel },
}

/// Request content, one variant per channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "messageType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    Message(MessageRequest),
    Email(EmailRequest),
    Sms(SmsRequest),
    WebMessage(WebMessageRequest),
    DigitalMail(DigitalMailRequest),
    DigitalInvoice(DigitalInvoiceRequest),
    SnailMail(SnailMailRequest),
    Letter(LetterRequest),
    Slack(SlackRequest),
}

impl Request {
    pub fn channel(&self) -> Channel {
        match self {
            Request::Message(_) => Channel::Message,
            Request::Email(_) => Channel::Email,
            Request::Sms(_) => Channel::Sms,
            Request::WebMessage(_) => Channel::WebMessage,
            Request::DigitalMail(_) => Channel::DigitalMail,
            Request::DigitalInvoice(_) => Channel::DigitalInvoice,
            Request::SnailMail(_) => Channel::SnailMail,
            Request::Letter(_) => Channel::Letter,
            Request::Slack(_) => Channel::Slack,
        }
    }

    /// Recipient party, when the channel addresses one.
    pub fn party_id(&self) -> Option<Uuid> {
        match self {
            Request::Message(r) => Some(r.party_id),
            Request::Email(r) => r.party_id,
            Request::Sms(r) => r.party_id,
            Request::WebMessage(r) => Some(r.party_id),
            Request::DigitalMail(r) => Some(r.party_id),
            Request::DigitalInvoice(r) => Some(r.party_id),
            Request::SnailMail(r) => r.party_id,
            Request::Letter(r) => r.party_id,
            Request::Slack(_) => None,
        }
    }

    pub fn address(&self) -> Option<&Address> {
        match self {
            Request::SnailMail(r) => r.address.as_ref(),
            Request::Letter(r) => r.address.as_ref(),
            _ => None,
        }
    }

    pub fn organization_number(&self) -> Option<&str> {
        match self {
            Request::DigitalMail(r) => r.organization_number.as_deref(),
            Request::DigitalInvoice(r) => r.organization_number.as_deref(),
            Request::Letter(r) => r.organization_number.as_deref(),
            _ => None,
        }
    }

    pub fn to_content(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Rebuild the typed request stored for a delivery on `channel`.
    pub fn from_content(channel: Channel, content: &serde_json::Value) -> Result<Self, RequestError> {
        let request: Request = serde_json::from_value(content.clone())
            .map_err(|source| RequestError::Malformed { channel, source })?;

        if request.channel() != channel {
            return Err(RequestError::ChannelMismatch {
                expected: channel,
                actual: request.channel(),
            });
        }
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    /// Base64 encoded file content.
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportInfo {
    pub text: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailSender {
    pub name: String,
    pub address: String,
    pub reply_to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsSender {
    pub name: String,
}

/// Sender identities a generic message may use once its channel is known.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub email: Option<EmailSender>,
    pub sms: Option<SmsSender>,
}

/// Generic message: the recipient's contact settings pick the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    pub party_id: Uuid,
    #[serde(default)]
    pub filters: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub sender: MessageSender,
    pub subject: Option<String>,
    pub message: String,
    pub html_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailRequest {
    pub party_id: Option<Uuid>,
    pub email_address: String,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub html_message: Option<String>,
    pub sender: EmailSender,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmsRequest {
    pub party_id: Option<Uuid>,
    pub sender: String,
    pub mobile_number: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalReference {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebMessageRequest {
    pub party_id: Uuid,
    #[serde(default)]
    pub external_references: Vec<ExternalReference>,
    pub message: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitalMailRequest {
    pub party_id: Uuid,
    pub organization_number: Option<String>,
    pub sender: Option<SupportInfo>,
    pub subject: Option<String>,
    pub department: Option<String>,
    pub content_type: String,
    pub body: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceDetails {
    pub amount: f64,
    pub due_date: NaiveDate,
    pub payment_reference_type: String,
    pub payment_reference: String,
    pub account_type: String,
    pub account_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitalInvoiceRequest {
    pub party_id: Uuid,
    pub organization_number: Option<String>,
    #[serde(rename = "type")]
    pub invoice_type: String,
    pub subject: Option<String>,
    pub reference: Option<String>,
    pub payable: bool,
    pub details: InvoiceDetails,
    #[serde(default)]
    pub files: Vec<Attachment>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnailMailRequest {
    pub party_id: Option<Uuid>,
    pub address: Option<Address>,
    pub department: Option<String>,
    pub deviation: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

/// Which delivery path a letter attachment may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentDeliveryMode {
    Any,
    #[serde(alias = "DIGITAL")]
    DigitalMail,
    #[serde(alias = "PHYSICAL")]
    SnailMail,
}

impl AttachmentDeliveryMode {
    pub fn allows_digital(&self) -> bool {
        matches!(self, Self::Any | Self::DigitalMail)
    }

    pub fn allows_physical(&self) -> bool {
        matches!(self, Self::Any | Self::SnailMail)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterAttachment {
    pub delivery_mode: AttachmentDeliveryMode,
    pub name: String,
    pub content_type: String,
    pub content: String,
}

impl From<&LetterAttachment> for Attachment {
    fn from(attachment: &LetterAttachment) -> Self {
        Self {
            name: attachment.name.clone(),
            content_type: attachment.content_type.clone(),
            content: attachment.content.clone(),
        }
    }
}

/// Letter to a single recipient: digital mail when possible, paper otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LetterRequest {
    pub party_id: Option<Uuid>,
    pub address: Option<Address>,
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

impl LetterRequest {
    pub fn digital_attachments(&self) -> Vec<Attachment> {
        self.attachments
            .iter()
            .filter(|a| a.delivery_mode.allows_digital())
            .map(Attachment::from)
            .collect()
    }

    pub fn physical_attachments(&self) -> Vec<Attachment> {
        self.attachments
            .iter()
            .filter(|a| a.delivery_mode.allows_physical())
            .map(Attachment::from)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlackRequest {
    pub token: String,
    pub channel: String,
    pub message: String,
}
