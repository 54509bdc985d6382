//! HTTP utilities for provider REST API calls

use crate::error::{IngestError, Result};
use anyhow::Context;
use reqwest::Client;
use serde_json::Value;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips non-printable characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Strip the query string so tokens and filters never reach the logs
fn endpoint_of(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// HTTP client wrapper for provider API calls
#[derive(Clone)]
pub struct ProviderHttpClient {
    client: Client,
}

impl ProviderHttpClient {
    /// Create a new HTTP client
    pub fn new() -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("cloudgraph/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// The underlying client, shared with the token provider
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Make an authenticated GET request and parse the JSON body.
    ///
    /// Non-success statuses become [`IngestError::Upstream`] so callers can
    /// classify them; transport and parse failures become `Other`.
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::warn!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(IngestError::upstream(status, endpoint_of(url)));
        }

        if body.is_empty() {
            return Ok(Value::Null);
        }

        let value: Value = serde_json::from_str(&body).context("Failed to parse response JSON")?;
        Ok(value)
    }
}
