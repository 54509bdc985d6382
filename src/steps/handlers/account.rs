//! Directory account step

use crate::error::{IngestError, Result};
use crate::graph::Entity;
use crate::provider::{Api, ProviderClient};
use crate::steps::scheduler::{StepContext, StepHandler};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const ACCOUNT_ENTITY_TYPE: &str = "azure_account";
pub const ACCOUNT_CLASS: &[&str] = &["Account"];

/// Job-state data key holding the account entity key
pub const ACCOUNT_DATA_KEY: &str = "account";

pub fn account_key(directory_id: &str) -> String {
    format!("/tenants/{}", directory_id)
}

/// Look up the account entity stored by the account step
pub fn account_entity(ctx: &StepContext) -> Result<Entity> {
    let key = ctx
        .job_state
        .get_data(ACCOUNT_DATA_KEY)
        .and_then(|v| v.as_str().map(|s| s.to_string()))
        .ok_or_else(|| IngestError::structural("account entity has not been stored"))?;

    ctx.job_state
        .find_entity(&key)
        .ok_or_else(|| IngestError::structural(format!("account entity {} not in job state", key)))
}

pub struct AccountStep {
    client: Arc<ProviderClient>,
}

impl AccountStep {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepHandler for AccountStep {
    async fn execute(&self, ctx: &StepContext) -> Result<()> {
        let directory_id = ctx
            .config
            .directory_id
            .clone()
            .ok_or_else(|| IngestError::config("no directory id configured"))?;

        // the organization record only adds detail; without read access the
        // account is still built from config
        let organization = match self
            .client
            .get(Api::Directory, &self.client.directory_url("/organization"))
            .await
        {
            Ok(response) => response
                .get("value")
                .and_then(|v| v.as_array())
                .and_then(|orgs| orgs.first())
                .cloned(),
            Err(err) => {
                ctx.record_missing_permission(err)?;
                None
            }
        };

        let entity = build_account(&directory_id, organization.as_ref());
        let key = entity.key.clone();
        ctx.job_state.add_entity(entity);
        ctx.job_state.set_data(ACCOUNT_DATA_KEY, json!(key));

        Ok(())
    }
}

fn build_account(directory_id: &str, organization: Option<&Value>) -> Entity {
    let mut entity = Entity::new(account_key(directory_id), ACCOUNT_ENTITY_TYPE, ACCOUNT_CLASS)
        .with_property("directoryId", directory_id);

    if let Some(org) = organization {
        entity = entity
            .with_property("displayName", org.get("displayName").cloned().unwrap_or(Value::Null))
            .with_property("organizationId", org.get("id").cloned().unwrap_or(Value::Null))
            .with_property("defaultDomain", default_domain(org))
            .with_raw_data("default", org.clone());
    } else {
        entity = entity.with_property("displayName", directory_id);
    }

    entity
}

fn default_domain(org: &Value) -> Value {
    org.get("verifiedDomains")
        .and_then(|v| v.as_array())
        .and_then(|domains| {
            domains
                .iter()
                .find(|d| d.get("isDefault").and_then(|v| v.as_bool()) == Some(true))
        })
        .and_then(|d| d.get("name"))
        .cloned()
        .unwrap_or(Value::Null)
}
