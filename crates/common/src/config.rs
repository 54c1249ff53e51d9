use std::str::FromStr;

use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Redis connection string. When unset the dispatch queue is in-process.
    pub redis_url: Option<String>,

    /// Redis list used as the dispatch queue (default: "herald:dispatch")
    pub dispatch_queue_key: String,

    /// Maximum number of concurrent orchestrations (default: 8)
    pub dispatch_workers: usize,

    /// Re-enqueue unclaimed and abandoned deliveries when the worker pool starts (default: true)
    pub dispatch_recover_on_start: bool,

    /// Seconds an orchestration's claim on a pending row is honored before
    /// another worker may take the row over (default: 300)
    pub dispatch_claim_lease_secs: u64,

    /// Port the API server binds to (default: 3000)
    pub api_port: u16,

    /// Timeout for outbound integration calls in seconds (default: 30)
    pub http_timeout_secs: u64,

    /// Base URLs of the integrations the engine consumes.
    pub integrations: IntegrationUrls,

    /// Sender identities used when a generic message does not name one.
    pub default_sms_sender_name: String,
    pub default_email_sender_name: String,
    pub default_email_sender_address: String,
}

/// Integration endpoints. A channel without a URL has no sender registered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IntegrationUrls {
    pub contact_settings: Option<String>,
    pub address_lookup: Option<String>,
    pub print_vendor: Option<String>,
    pub sms_sender: Option<String>,
    pub email_sender: Option<String>,
    pub digital_mail_sender: Option<String>,
    pub digital_invoice_sender: Option<String>,
    pub snail_mail_sender: Option<String>,
    pub web_message_sender: Option<String>,
    pub slack_sender: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            redis_url: std::env::var("REDIS_URL").ok(),
            dispatch_queue_key: std::env::var("DISPATCH_QUEUE_KEY")
                .unwrap_or_else(|_| "herald:dispatch".to_string()),
            dispatch_workers: parse_var("DISPATCH_WORKERS", 8)?,
            dispatch_recover_on_start: parse_var("DISPATCH_RECOVER_ON_START", true)?,
            dispatch_claim_lease_secs: parse_var("DISPATCH_CLAIM_LEASE_SECS", 300)?,
            api_port: parse_var("API_PORT", 3000)?,
            http_timeout_secs: parse_var("HTTP_TIMEOUT_SECS", 30)?,
            integrations: IntegrationUrls {
                contact_settings: std::env::var("CONTACT_SETTINGS_URL").ok(),
                address_lookup: std::env::var("ADDRESS_LOOKUP_URL").ok(),
                print_vendor: std::env::var("PRINT_VENDOR_URL").ok(),
                sms_sender: std::env::var("SMS_SENDER_URL").ok(),
                email_sender: std::env::var("EMAIL_SENDER_URL").ok(),
                digital_mail_sender: std::env::var("DIGITAL_MAIL_SENDER_URL").ok(),
                digital_invoice_sender: std::env::var("DIGITAL_INVOICE_SENDER_URL").ok(),
                snail_mail_sender: std::env::var("SNAIL_MAIL_SENDER_URL").ok(),
                web_message_sender: std::env::var("WEB_MESSAGE_SENDER_URL").ok(),
                slack_sender: std::env::var("SLACK_SENDER_URL").ok(),
            },
            default_sms_sender_name: std::env::var("DEFAULT_SMS_SENDER_NAME")
                .unwrap_or_else(|_| "Herald".to_string()),
            default_email_sender_name: std::env::var("DEFAULT_EMAIL_SENDER_NAME")
                .unwrap_or_else(|_| "Herald".to_string()),
            default_email_sender_address: std::env::var("DEFAULT_EMAIL_SENDER_ADDRESS")
                .unwrap_or_else(|_| "noreply@example.org".to_string()),
        })
    }
}

/// Read `name` from the environment, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => parse_value(name, &raw),
        Err(_) => Ok(default),
    }
}

fn parse_value<T: FromStr>(name: &str, raw: &str) -> anyhow::Result<T> {
    raw.trim().parse().map_err(|_| {
        anyhow::anyhow!(
            "{} must be a valid {}",
            name,
            std::any::type_name::<T>()
        )
    })
}
