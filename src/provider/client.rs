//! Provider Client
//!
//! Main client for the provider's control-plane APIs, combining
//! authentication, HTTP and pagination.

use super::auth::{ClientCredentials, DIRECTORY_SCOPE, MANAGEMENT_SCOPE};
use super::http::ProviderHttpClient;
use crate::config::{Endpoints, IntegrationConfig};
use crate::error::{IngestError, Result};
use crate::resolve::definition::{DefinitionReference, DefinitionShape, DefinitionSource, DefinitionKind};
use async_trait::async_trait;
use serde_json::Value;
use url::Url;

/// API version used for policy definition lookups
pub const POLICY_API_VERSION: &str = "2021-06-01";

/// Which API family a request goes to; decides the token scope and the
/// pagination link field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Api {
    Management,
    Directory,
}

impl Api {
    fn scope(&self) -> &'static str {
        match self {
            Api::Management => MANAGEMENT_SCOPE,
            Api::Directory => DIRECTORY_SCOPE,
        }
    }

    fn next_link_field(&self) -> &'static str {
        match self {
            Api::Management => "nextLink",
            Api::Directory => "@odata.nextLink",
        }
    }
}

/// Main provider client
#[derive(Clone)]
pub struct ProviderClient {
    credentials: ClientCredentials,
    http: ProviderHttpClient,
    endpoints: Endpoints,
}

impl ProviderClient {
    /// Create a client from a validated config
    pub fn new(config: &IntegrationConfig) -> Result<Self> {
        config.validate_invocation()?;

        let (Some(directory_id), Some(client_id), Some(client_secret)) = (
            config.directory_id.as_deref(),
            config.client_id.as_deref(),
            config.client_secret.as_deref(),
        ) else {
            return Err(IngestError::config("missing client credentials"));
        };

        let http = ProviderHttpClient::new()?;
        let credentials = ClientCredentials::new(
            http.inner().clone(),
            &config.endpoints.login_url,
            directory_id,
            client_id,
            client_secret,
        );

        Ok(Self {
            credentials,
            http,
            endpoints: config.endpoints.clone(),
        })
    }

    /// Make a GET request to one of the provider APIs
    pub async fn get(&self, api: Api, url: &str) -> Result<Value> {
        let token = self.credentials.get_token(api.scope()).await?;
        self.http.get(url, &token).await
    }

    /// Start a sequential listing at `url`
    pub fn pager(&self, api: Api, url: String) -> Pager<'_> {
        Pager {
            client: self,
            api,
            next: Some(url),
            rejected_link: None,
        }
    }

    // =========================================================================
    // URL helpers
    // =========================================================================

    /// Build a resource management URL for `path` (a resource id or
    /// collection path starting with `/`)
    pub fn management_url(&self, path: &str, api_version: &str) -> String {
        format!(
            "{}{}?api-version={}",
            self.endpoints.management_url.trim_end_matches('/'),
            path,
            api_version
        )
    }

    /// Build a subscription-scoped management URL
    pub fn subscription_url(&self, subscription_id: &str, path: &str, api_version: &str) -> String {
        self.management_url(
            &format!("/subscriptions/{}{}", subscription_id, path),
            api_version,
        )
    }

    /// Build a directory API URL
    pub fn directory_url(&self, path: &str) -> String {
        format!(
            "{}{}",
            self.endpoints.directory_url.trim_end_matches('/'),
            path
        )
    }
}

/// Sequential pager over a provider listing.
///
/// Each call to [`Pager::next_page`] requests exactly one page, so a caller
/// that processes a page before asking for the next never has more than one
/// page in flight.
pub struct Pager<'a> {
    client: &'a ProviderClient,
    api: Api,
    next: Option<String>,
    rejected_link: Option<String>,
}

impl Pager<'_> {
    /// Fetch the next page, or `None` once the listing is exhausted
    pub async fn next_page(&mut self) -> Result<Option<Vec<Value>>> {
        let Some(url) = self.next.take() else {
            return Ok(None);
        };

        let response = self.client.get(self.api, &url).await?;
        let page = parse_page(&response, self.api);

        // the bearer token goes with every page request
        match page.next_link {
            Some(next) if !same_origin(&url, &next) => {
                tracing::warn!(
                    "Not following next page link to another origin: {}",
                    strip_query(&next)
                );
                self.rejected_link = Some(next);
            }
            next => self.next = next,
        }

        Ok(Some(page.items))
    }

    /// The next page link that was not followed because it pointed to
    /// another origin. The listing ended early when this is set.
    pub fn rejected_link(&self) -> Option<&str> {
        self.rejected_link.as_deref()
    }
}

/// `url` without its query string
pub fn strip_query(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

/// Result of one page
#[derive(Debug, Default)]
pub struct PageResult {
    pub items: Vec<Value>,
    pub next_link: Option<String>,
}

fn same_origin(current: &str, next: &str) -> bool {
    match (Url::parse(current), Url::parse(next)) {
        (Ok(a), Ok(b)) => a.origin() == b.origin(),
        _ => false,
    }
}

/// Split a list response into items and the link to the next page
pub fn parse_page(response: &Value, api: Api) -> PageResult {
    let items = response
        .get("value")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();

    let next_link = response
        .get(api.next_link_field())
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    PageResult { items, next_link }
}

#[async_trait]
impl DefinitionSource for ProviderClient {
    async fn fetch_definition(&self, reference: &DefinitionReference) -> Result<Option<Value>> {
        let collection = match reference.shape {
            DefinitionShape::Single => "policyDefinitions",
            DefinitionShape::Set => "policySetDefinitions",
        };
        let name = reference.name();

        let path = match reference.kind {
            DefinitionKind::Builtin => format!(
                "/providers/Microsoft.Authorization/{}/{}",
                collection, name
            ),
            DefinitionKind::Custom => {
                let Some(subscription) = reference.subscription() else {
                    return Err(IngestError::structural(format!(
                        "custom definition id '{}' has no subscription segment",
                        reference.id
                    )));
                };
                format!(
                    "/subscriptions/{}/providers/Microsoft.Authorization/{}/{}",
                    subscription, collection, name
                )
            }
        };

        let response = self
            .get(Api::Management, &self.management_url(&path, POLICY_API_VERSION))
            .await?;

        Ok(Some(response).filter(|v| !v.is_null()))
    }
}
