//! Provider Authentication
//!
//! OAuth2 client-credentials flow against the directory authority, with one
//! cached token per scope.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Scope for the resource management API
pub const MANAGEMENT_SCOPE: &str = "https://management.azure.com/.default";
/// Scope for the directory API
pub const DIRECTORY_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Token expiry buffer - refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Token TTL when the authority does not report one
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Client-credentials holder with per-scope token caching
#[derive(Clone)]
pub struct ClientCredentials {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    token_cache: Arc<RwLock<HashMap<String, CachedToken>>>,
}

impl ClientCredentials {
    pub fn new(
        http: reqwest::Client,
        login_url: &str,
        directory_id: &str,
        client_id: &str,
        client_secret: &str,
    ) -> Self {
        Self {
            http,
            token_url: format!(
                "{}/{}/oauth2/v2.0/token",
                login_url.trim_end_matches('/'),
                directory_id
            ),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            token_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get an access token for `scope`, reusing a cached one while valid
    pub async fn get_token(&self, scope: &str) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.get(scope) {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token for {} expired, fetching new token", scope);
            }
        }

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await
            .context("Failed to send token request")?;

        let status = response.status();
        if !status.is_success() {
            // Never log the body here; it may echo the client id and secret
            return Err(anyhow::anyhow!("Token request failed: {}", status));
        }

        let token: TokenResponse = response
            .json()
            .await
            .context("Failed to parse token response")?;

        let ttl = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);
        let expires_at = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER);

        {
            let mut cache = self.token_cache.write().await;
            cache.insert(
                scope.to_string(),
                CachedToken {
                    token: token.access_token.clone(),
                    expires_at,
                },
            );
        }

        tracing::debug!(
            "New token cached for {}, expires in ~{} minutes",
            scope,
            ttl.saturating_sub(TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token.access_token)
    }
}
