//! Contact settings, address lookup and the print batch vendor.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use herald_common::types::Address;
use herald_engine::capability::{
    AddressResolver, CapabilityError, ContactPreference, ContactResolver, PrintBatchVendor,
};

use crate::client::IntegrationClient;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactSettingDto {
    #[serde(default)]
    contact_channels: Vec<ContactChannelDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactChannelDto {
    contact_method: Option<String>,
    destination: Option<String>,
    #[serde(default)]
    disabled: bool,
}

/// One preference per contact channel, across every matching setting.
fn flatten(settings: Vec<ContactSettingDto>) -> Vec<ContactPreference> {
    settings
        .into_iter()
        .flat_map(|s| s.contact_channels)
        .map(|c| ContactPreference {
            channel: c.contact_method.unwrap_or_default(),
            destination: c.destination,
            enabled: !c.disabled,
        })
        .collect()
}

fn filter_query(filters: &BTreeMap<String, Vec<String>>) -> Vec<(String, String)> {
    filters
        .iter()
        .flat_map(|(key, values)| {
            values
                .iter()
                .map(move |value| (format!("filter[{}]", key), value.clone()))
        })
        .collect()
}

/// Contact settings service: `GET {base}/{municipality}/settings/{partyId}/matching`.
pub struct HttpContactResolver {
    client: IntegrationClient,
}

impl HttpContactResolver {
    pub fn new(client: IntegrationClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ContactResolver for HttpContactResolver {
    async fn resolve(
        &self,
        municipality_id: &str,
        party_id: Uuid,
        filters: &BTreeMap<String, Vec<String>>,
    ) -> Result<Vec<ContactPreference>, CapabilityError> {
        let party = party_id.to_string();
        let url = self
            .client
            .url(&[municipality_id, "settings", party.as_str(), "matching"]);

        let settings: Vec<ContactSettingDto> = self
            .client
            .get_json(&url, &filter_query(filters))
            .await?
            .unwrap_or_default();
        Ok(flatten(settings))
    }
}

/// Registered postal address: `GET {base}/{municipality}/{partyId}/address`.
pub struct HttpAddressResolver {
    client: IntegrationClient,
}

impl HttpAddressResolver {
    pub fn new(client: IntegrationClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AddressResolver for HttpAddressResolver {
    async fn resolve(&self, municipality_id: &str, party_id: Uuid) -> Result<Address, CapabilityError> {
        let party = party_id.to_string();
        let url = self.client.url(&[municipality_id, party.as_str(), "address"]);

        self.client
            .get_json::<Address>(&url, &[])
            .await?
            .ok_or_else(|| CapabilityError::NotFound(format!("No address registered for party {}", party_id)))
    }
}

/// Print vendor: `POST {base}/{municipality}/batch/{batchId}`.
pub struct HttpPrintBatchVendor {
    client: IntegrationClient,
}

impl HttpPrintBatchVendor {
    pub fn new(client: IntegrationClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PrintBatchVendor for HttpPrintBatchVendor {
    async fn submit_batch(&self, municipality_id: &str, batch_id: Uuid) -> Result<(), CapabilityError> {
        let batch = batch_id.to_string();
        let url = self.client.url(&[municipality_id, "batch", batch.as_str()]);
        self.client
            .post_json(&url, &serde_json::json!({ "batchId": batch_id }))
            .await?;
        Ok(())
    }
}

/// Stand-in for an integration without a configured URL. Every call fails,
/// which the engine records as a FAILED outcome.
pub struct Unconfigured {
    integration: &'static str,
}

impl Unconfigured {
    pub fn new(integration: &'static str) -> Self {
        Self { integration }
    }

    fn error(&self) -> CapabilityError {
        CapabilityError::Rejected(format!("{} is not configured", self.integration))
    }
}

#[async_trait]
impl ContactResolver for Unconfigured {
    async fn resolve(
        &self,
        _municipality_id: &str,
        _party_id: Uuid,
        _filters: &BTreeMap<String, Vec<String>>,
    ) -> Result<Vec<ContactPreference>, CapabilityError> {
        Err(self.error())
    }
}

#[async_trait]
impl AddressResolver for Unconfigured {
    async fn resolve(&self, _municipality_id: &str, _party_id: Uuid) -> Result<Address, CapabilityError> {
        Err(self.error())
    }
}

#[async_trait]
impl PrintBatchVendor for Unconfigured {
    async fn submit_batch(&self, _municipality_id: &str, _batch_id: Uuid) -> Result<(), CapabilityError> {
        Err(self.error())
    }
}
