//! Configuration Management
//!
//! Handles the integration config for cloudgraph: credentials, the target
//! subscription, feature toggles and per-ingestion-source overrides.
//!
//! Resolution order is CLI flags > environment > config file > defaults.

use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default Azure Resource Manager endpoint
pub const DEFAULT_MANAGEMENT_URL: &str = "https://management.azure.com";
/// Default directory (Microsoft Graph) endpoint
pub const DEFAULT_DIRECTORY_URL: &str = "https://graph.microsoft.com/v1.0";
/// Default OAuth2 authority
pub const DEFAULT_LOGIN_URL: &str = "https://login.microsoftonline.com";

/// User override for one ingestion source
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct IngestionSourceToggle {
    #[serde(default)]
    pub disabled: bool,
}

/// Service endpoints; overridable so tests can point at a mock server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    #[serde(default = "default_management_url")]
    pub management_url: String,
    #[serde(default = "default_directory_url")]
    pub directory_url: String,
    #[serde(default = "default_login_url")]
    pub login_url: String,
}

fn default_management_url() -> String {
    DEFAULT_MANAGEMENT_URL.to_string()
}

fn default_directory_url() -> String {
    DEFAULT_DIRECTORY_URL.to_string()
}

fn default_login_url() -> String {
    DEFAULT_LOGIN_URL.to_string()
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            management_url: default_management_url(),
            directory_url: default_directory_url(),
            login_url: default_login_url(),
        }
    }
}

/// Integration configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationConfig {
    /// Directory (tenant) id
    #[serde(default)]
    pub directory_id: Option<String>,
    /// Application (client) id
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret; never written back to disk
    #[serde(default, skip_serializing)]
    pub client_secret: Option<String>,
    /// Subscription to ingest; subscription-scoped steps need it
    #[serde(default)]
    pub subscription_id: Option<String>,
    /// Ingest directory objects (users, groups, service principals)
    #[serde(default)]
    pub ingest_active_directory: bool,
    /// Per-ingestion-source overrides keyed by source id
    #[serde(default)]
    pub ingestion_sources: HashMap<String, IngestionSourceToggle>,
    #[serde(default)]
    pub endpoints: Endpoints,
}

impl IntegrationConfig {
    /// Get the default config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("cloudgraph").join("config.json"))
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing default file yields the default config; an explicitly given
    /// file that cannot be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match Self::config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if explicit {
                return Err(IngestError::config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| {
            IngestError::config(format!("failed to read {}: {}", path.display(), e))
        })?;

        Self::parse(&content, &path)
    }

    /// Parse config content; YAML for `.yaml`/`.yml`, JSON otherwise.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );

        let parsed = if is_yaml {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(content).map_err(|e| e.to_string())
        };

        parsed.map_err(|e| IngestError::config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Overlay values from the standard `AZURE_*` environment variables
    pub fn apply_env(&mut self) {
        self.apply_vars(|name| std::env::var(name).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(v) = var("AZURE_TENANT_ID") {
            self.directory_id = Some(v);
        }
        if let Some(v) = var("AZURE_CLIENT_ID") {
            self.client_id = Some(v);
        }
        if let Some(v) = var("AZURE_CLIENT_SECRET") {
            self.client_secret = Some(v);
        }
        if let Some(v) = var("AZURE_SUBSCRIPTION_ID") {
            if validate_subscription_id(&v) {
                self.subscription_id = Some(v);
            } else {
                tracing::warn!("Invalid subscription id format in AZURE_SUBSCRIPTION_ID");
            }
        }
    }

    /// Subscription id, if set and non-empty
    pub fn subscription(&self) -> Option<&str> {
        self.subscription_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// User override for an ingestion source, if any
    pub fn source_toggle(&self, source_id: &str) -> Option<IngestionSourceToggle> {
        self.ingestion_sources.get(source_id).copied()
    }

    /// Check that the config can drive a live run.
    ///
    /// Start states never depend on this; it guards `run` only.
    pub fn validate_invocation(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("directoryId", &self.directory_id),
            ("clientId", &self.client_id),
            ("clientSecret", &self.client_secret),
        ]
        .iter()
        .filter(|(_, v)| v.as_deref().map(str::trim).unwrap_or("").is_empty())
        .map(|(name, _)| *name)
        .collect();

        if !missing.is_empty() {
            return Err(IngestError::config(format!(
                "missing required config: {}",
                missing.join(", ")
            )));
        }

        if let Some(sub) = self.subscription() {
            if !validate_subscription_id(sub) {
                return Err(IngestError::config(format!(
                    "subscriptionId '{}' is not a valid id",
                    sub
                )));
            }
        }

        Ok(())
    }
}

/// Subscription ids are GUIDs
pub fn validate_subscription_id(id: &str) -> bool {
    uuid::Uuid::parse_str(id.trim()).is_ok()
}
