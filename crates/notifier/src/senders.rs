//! HTTP channel senders.
//!
//! Every physical channel is delivered by POSTing an envelope to
//! `{base}/{municipality}/{channel path}`. The envelope carries the typed
//! request plus the delivery identifiers the downstream service logs against.
//! A 2xx answer is SENT unless the body names another terminal status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use herald_common::request::Request;
use herald_common::types::{Address, Channel, DeliveryStatus};
use herald_engine::capability::{CapabilityError, ChannelSender, SendContext};

use crate::client::IntegrationClient;

/// Path segment the downstream service exposes for `channel`.
pub fn channel_path(channel: Channel) -> &'static str {
    match channel {
        Channel::Email => "email",
        Channel::Sms => "sms",
        Channel::WebMessage => "webmessage",
        Channel::DigitalMail => "digital-mail",
        Channel::DigitalInvoice => "digital-invoice",
        Channel::SnailMail => "snail-mail",
        Channel::Slack => "slack",
        Channel::Message => "message",
        Channel::Letter => "letter",
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SendEnvelope<'a> {
    delivery_id: Uuid,
    message_id: Uuid,
    batch_id: Option<Uuid>,
    party_id: Option<Uuid>,
    organization_number: Option<&'a str>,
    address: Option<&'a Address>,
    request: &'a Request,
}

impl<'a> SendEnvelope<'a> {
    fn new(ctx: &'a SendContext, request: &'a Request) -> Self {
        Self {
            delivery_id: ctx.delivery_id,
            message_id: ctx.message_id,
            batch_id: ctx.batch_id,
            party_id: ctx.party_id,
            organization_number: ctx.organization_number.as_deref(),
            address: ctx.address.as_ref(),
            request,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SendReceipt {
    status: Option<DeliveryStatus>,
}

pub struct HttpChannelSender {
    channel: Channel,
    client: IntegrationClient,
}

impl HttpChannelSender {
    pub fn new(channel: Channel, client: IntegrationClient) -> Self {
        Self { channel, client }
    }
}

#[async_trait]
impl ChannelSender for HttpChannelSender {
    fn channel(&self) -> Channel {
        self.channel
    }

    async fn send(
        &self,
        ctx: &SendContext,
        request: &Request,
    ) -> Result<DeliveryStatus, CapabilityError> {
        if request.channel() != self.channel {
            return Err(CapabilityError::Rejected(format!(
                "{} sender cannot deliver {} requests",
                self.channel,
                request.channel()
            )));
        }

        let url = self
            .client
            .url(&[ctx.municipality_id.as_str(), channel_path(self.channel)]);
        let response = self
            .client
            .post_json(&url, &SendEnvelope::new(ctx, request))
            .await?;

        // An empty or non-JSON body is a plain acknowledgement.
        let receipt: SendReceipt = response.json().await.unwrap_or_default();
        let status = receipt.status.unwrap_or(DeliveryStatus::Sent);

        tracing::debug!(
            delivery_id = %ctx.delivery_id,
            channel = %self.channel,
            status = %status,
            "Channel sender answered"
        );
        Ok(status)
    }
}
