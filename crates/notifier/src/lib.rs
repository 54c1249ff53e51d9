//! HTTP integrations behind the engine's capability traits, and the wiring
//! shared by the `herald-notifier` worker and the API server.

pub mod client;
pub mod lookups;
pub mod senders;

use std::sync::Arc;
use std::time::Duration;

use herald_common::config::{AppConfig, IntegrationUrls};
use herald_common::redis_pool::create_redis_pool;
use herald_common::types::Channel;
use herald_engine::capability::{AddressResolver, Capabilities, ContactResolver, PrintBatchVendor};
use herald_engine::dispatch::{DispatchQueue, MemoryQueue, RedisQueue};

use crate::client::{IntegrationClient, build_http_client};
use crate::lookups::{HttpAddressResolver, HttpContactResolver, HttpPrintBatchVendor, Unconfigured};
use crate::senders::HttpChannelSender;

/// Configured sender URL for each physical channel.
fn sender_urls(urls: &IntegrationUrls) -> [(Channel, Option<&String>); 7] {
    [
        (Channel::Sms, urls.sms_sender.as_ref()),
        (Channel::Email, urls.email_sender.as_ref()),
        (Channel::WebMessage, urls.web_message_sender.as_ref()),
        (Channel::DigitalMail, urls.digital_mail_sender.as_ref()),
        (Channel::DigitalInvoice, urls.digital_invoice_sender.as_ref()),
        (Channel::SnailMail, urls.snail_mail_sender.as_ref()),
        (Channel::Slack, urls.slack_sender.as_ref()),
    ]
}

/// Build the capability set from the configured integration URLs.
///
/// Lookups without a URL fail every call; channels without a URL get no
/// sender, so their deliveries are archived as FAILED.
pub fn build_capabilities(config: &AppConfig) -> anyhow::Result<Capabilities> {
    let http = build_http_client(Duration::from_secs(config.http_timeout_secs))?;
    let urls = &config.integrations;
    let endpoint = |url: &String| IntegrationClient::new(http.clone(), url.as_str());

    let contacts: Arc<dyn ContactResolver> = match &urls.contact_settings {
        Some(url) => Arc::new(HttpContactResolver::new(endpoint(url))),
        None => Arc::new(Unconfigured::new("contact settings")),
    };
    let addresses: Arc<dyn AddressResolver> = match &urls.address_lookup {
        Some(url) => Arc::new(HttpAddressResolver::new(endpoint(url))),
        None => Arc::new(Unconfigured::new("address lookup")),
    };
    let print_vendor: Arc<dyn PrintBatchVendor> = match &urls.print_vendor {
        Some(url) => Arc::new(HttpPrintBatchVendor::new(endpoint(url))),
        None => Arc::new(Unconfigured::new("print vendor")),
    };

    let mut capabilities = Capabilities::new(contacts, addresses, print_vendor);
    for (channel, url) in sender_urls(urls) {
        match url {
            Some(url) => {
                capabilities =
                    capabilities.with_sender(Arc::new(HttpChannelSender::new(channel, endpoint(url))));
            }
            None => tracing::warn!(channel = %channel, "No sender URL configured"),
        }
    }

    tracing::info!(
        channels = ?capabilities.registered_channels(),
        "Channel senders registered"
    );
    Ok(capabilities)
}

/// Redis queue when `REDIS_URL` is set, otherwise an in-process queue.
///
/// Each call opens its own Redis connection manager, since a consumer blocks
/// its connection in `BRPOP`.
pub async fn build_queue(config: &AppConfig) -> anyhow::Result<Arc<dyn DispatchQueue>> {
    match &config.redis_url {
        Some(url) => {
            let redis = create_redis_pool(url).await?;
            tracing::info!(key = %config.dispatch_queue_key, "Using Redis dispatch queue");
            Ok(Arc::new(RedisQueue::new(redis, config.dispatch_queue_key.clone())))
        }
        None => {
            tracing::info!("REDIS_URL not set, using in-process dispatch queue");
            Ok(Arc::new(MemoryQueue::new()))
        }
    }
}
