//! Thin JSON client shared by every integration.

use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;

use herald_engine::capability::CapabilityError;

/// One integration endpoint reached over HTTP.
#[derive(Debug, Clone)]
pub struct IntegrationClient {
    client: reqwest::Client,
    base_url: String,
}

impl IntegrationClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `base_url` joined with `segments`, one path segment each.
    pub fn url(&self, segments: &[&str]) -> String {
        let mut url = self.base_url.clone();
        for segment in segments {
            url.push('/');
            url.push_str(segment.trim_matches('/'));
        }
        url
    }

    /// POST `body` as JSON. Any non-2xx answer becomes `CapabilityError::Remote`.
    pub async fn post_json<B>(&self, url: &str, body: &B) -> Result<reqwest::Response, CapabilityError>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| CapabilityError::Transport(format!("POST {} failed: {}", url, e)))?;

        tracing::debug!(url = %url, status = %response.status(), "Integration responded");
        check(response).await
    }

    /// GET and decode a JSON body. A 404 is `Ok(None)`.
    pub async fn get_json<T>(
        &self,
        url: &str,
        query: &[(String, String)],
    ) -> Result<Option<T>, CapabilityError>
    where
        T: DeserializeOwned,
    {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| CapabilityError::Transport(format!("GET {} failed: {}", url, e)))?;

        tracing::debug!(url = %url, status = %response.status(), "Integration responded");
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = check(response)
            .await?
            .json::<T>()
            .await
            .map_err(|e| CapabilityError::Transport(format!("Unreadable response from {}: {}", url, e)))?;
        Ok(Some(body))
    }
}

/// Shared HTTP client with the configured timeout.
pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, CapabilityError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| CapabilityError::Transport(format!("failed to build HTTP client: {}", e)))
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, CapabilityError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(CapabilityError::Remote {
        status: status.as_u16(),
        body,
    })
}
