//! Capabilities the engine consumes.
//!
//! Every external system (channel senders, contact settings, address lookup,
//! print vendor) is reached through one of these traits. Wire formats live in
//! the implementations, not here.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use herald_common::request::Request;
use herald_common::types::{Address, Channel, Delivery, DeliveryStatus};

/// Failure reported by a consumed capability.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Remote service responded {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("Rejected: {0}")]
    Rejected(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// One contact channel from a party's contact settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactPreference {
    /// Contact method as named by the settings service, e.g. `EMAIL`, `SMS`.
    pub channel: String,
    pub destination: Option<String>,
    pub enabled: bool,
}

/// Everything a sender may need besides the request itself.
#[derive(Debug, Clone, PartialEq)]
pub struct SendContext {
    pub municipality_id: String,
    pub delivery_id: Uuid,
    pub message_id: Uuid,
    pub batch_id: Option<Uuid>,
    pub party_id: Option<Uuid>,
    pub organization_number: Option<String>,
    pub address: Option<Address>,
}

impl From<&Delivery> for SendContext {
    fn from(delivery: &Delivery) -> Self {
        Self {
            municipality_id: delivery.municipality_id.clone(),
            delivery_id: delivery.delivery_id,
            message_id: delivery.message_id,
            batch_id: delivery.batch_id,
            party_id: delivery.party_id,
            organization_number: delivery.organization_number.clone(),
            address: delivery.address.clone(),
        }
    }
}

/// Delivers requests of a single physical channel.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> Channel;

    /// Attempt delivery once. `Ok` carries the sender's terminal verdict.
    async fn send(
        &self,
        ctx: &SendContext,
        request: &Request,
    ) -> Result<DeliveryStatus, CapabilityError>;
}

#[async_trait]
pub trait ContactResolver: Send + Sync {
    async fn resolve(
        &self,
        municipality_id: &str,
        party_id: Uuid,
        filters: &BTreeMap<String, Vec<String>>,
    ) -> Result<Vec<ContactPreference>, CapabilityError>;
}

#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, municipality_id: &str, party_id: Uuid)
    -> Result<Address, CapabilityError>;
}

/// Physical-mail vendor accepting a whole batch for printing.
///
/// Batch closure is not serialized by the engine, so implementations must
/// tolerate being called twice for the same batch.
#[async_trait]
pub trait PrintBatchVendor: Send + Sync {
    async fn submit_batch(&self, municipality_id: &str, batch_id: Uuid)
    -> Result<(), CapabilityError>;
}

/// The full set of capabilities an orchestrator works with.
#[derive(Clone)]
pub struct Capabilities {
    senders: HashMap<Channel, Arc<dyn ChannelSender>>,
    pub contacts: Arc<dyn ContactResolver>,
    pub addresses: Arc<dyn AddressResolver>,
    pub print_vendor: Arc<dyn PrintBatchVendor>,
}

impl Capabilities {
    pub fn new(
        contacts: Arc<dyn ContactResolver>,
        addresses: Arc<dyn AddressResolver>,
        print_vendor: Arc<dyn PrintBatchVendor>,
    ) -> Self {
        Self {
            senders: HashMap::new(),
            contacts,
            addresses,
            print_vendor,
        }
    }

    /// Register a sender. Logical channels are never delivered directly and
    /// are ignored.
    pub fn with_sender(mut self, sender: Arc<dyn ChannelSender>) -> Self {
        let channel = sender.channel();
        if channel.is_logical() {
            tracing::warn!(%channel, "Ignoring sender registered for a logical channel");
            return self;
        }
        self.senders.insert(channel, sender);
        self
    }

    pub fn sender(&self, channel: Channel) -> Option<&Arc<dyn ChannelSender>> {
        self.senders.get(&channel)
    }

    pub fn registered_channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.senders.keys().copied().collect();
        channels.sort_by_key(|c| c.to_string());
        channels
    }
}
