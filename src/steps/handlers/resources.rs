//! Resource listing steps
//!
//! Most resource steps differ only in the collection they list and the entity
//! type they produce, so they are described by a catalog `listing` and run by
//! one generic handler. Every resource is linked to its owning scope.

use super::{entities_of, for_each_page, required_subscription};
use crate::error::{ok_if_not_found, Result};
use crate::graph::{entity_from_resource, Relationship, RelationshipClass};
use crate::provider::{Api, ProviderClient};
use crate::resolve::resolve_owning_scope_relationship;
use crate::steps::catalog::ListingDef;
use crate::steps::scheduler::{StepContext, StepHandler};
use async_trait::async_trait;
use std::sync::Arc;

pub const STORAGE_ACCOUNT_ENTITY_TYPE: &str = "azure_storage_account";
pub const STORAGE_CONTAINER_ENTITY_TYPE: &str = "azure_storage_container";

const STORAGE_API_VERSION: &str = "2023-01-01";

/// Lists one subscription-wide collection described by a [`ListingDef`]
pub struct ResourceListStep {
    client: Arc<ProviderClient>,
    listing: ListingDef,
}

impl ResourceListStep {
    pub fn new(client: Arc<ProviderClient>, listing: ListingDef) -> Self {
        Self { client, listing }
    }
}

#[async_trait]
impl StepHandler for ResourceListStep {
    async fn execute(&self, ctx: &StepContext) -> Result<()> {
        let subscription_id = required_subscription(ctx)?;
        let url = self.client.subscription_url(
            &subscription_id,
            &self.listing.provider_path,
            &self.listing.api_version,
        );
        let class: Vec<&str> = self.listing.class.iter().map(|c| c.as_str()).collect();

        let seen = for_each_page(ctx, &self.client, Api::Management, url, |resources| {
            for resource in &resources {
                let Some(entity) = entity_from_resource(resource, &self.listing.entity_type, &class)
                else {
                    continue;
                };
                let edge = resolve_owning_scope_relationship(&entity, ctx.job_state.as_ref())?;
                ctx.job_state.add_entity(entity);
                ctx.job_state.add_relationship(edge);
            }
            Ok(())
        })
        .await?;

        tracing::debug!("Listed {} {} resource(s)", seen, self.listing.entity_type);
        Ok(())
    }
}

/// Lists the blob containers of every ingested storage account
pub struct StorageContainersStep {
    client: Arc<ProviderClient>,
}

impl StorageContainersStep {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepHandler for StorageContainersStep {
    async fn execute(&self, ctx: &StepContext) -> Result<()> {
        let accounts = entities_of(ctx.job_state.as_ref(), STORAGE_ACCOUNT_ENTITY_TYPE);
        if accounts.is_empty() {
            ctx.warn("no storage accounts in job state, nothing to list");
        }

        for account in accounts {
            let url = self.client.management_url(
                &format!("{}/blobServices/default/containers", account.key),
                STORAGE_API_VERSION,
            );

            // accounts without a blob service answer 404
            let listed = for_each_page(ctx, &self.client, Api::Management, url, |containers| {
                for container in &containers {
                    let Some(entity) =
                        entity_from_resource(container, STORAGE_CONTAINER_ENTITY_TYPE, &["DataStore"])
                    else {
                        continue;
                    };
                    ctx.job_state.add_relationship(Relationship::direct(
                        RelationshipClass::Has,
                        &account.key,
                        &account.entity_type,
                        &entity.key,
                        &entity.entity_type,
                    ));
                    ctx.job_state.add_entity(entity);
                }
                Ok(())
            })
            .await;
            ok_if_not_found(listed)?;
        }

        Ok(())
    }
}
