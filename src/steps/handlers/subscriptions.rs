//! Subscription and resource group steps

use super::account::{account_entity, ACCOUNT_ENTITY_TYPE};
use super::{for_each_page, required_subscription};
use crate::error::Result;
use crate::graph::{entity_from_resource, Direction, Entity, RelationshipClass};
use crate::provider::{Api, ProviderClient};
use crate::resolve::scope::{subscription_key, RESOURCE_GROUP_ENTITY_TYPE, SUBSCRIPTION_ENTITY_TYPE};
use crate::resolve::{direct_or_mapped, normalize_scope_key, resolve_owning_scope_relationship};
use crate::steps::scheduler::{StepContext, StepHandler};
use async_trait::async_trait;
use std::sync::Arc;

const SUBSCRIPTION_API_VERSION: &str = "2022-12-01";
const RESOURCE_GROUP_API_VERSION: &str = "2021-04-01";

pub struct SubscriptionStep {
    client: Arc<ProviderClient>,
}

impl SubscriptionStep {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepHandler for SubscriptionStep {
    async fn execute(&self, ctx: &StepContext) -> Result<()> {
        let subscription_id = required_subscription(ctx)?;
        let url = self
            .client
            .subscription_url(&subscription_id, "", SUBSCRIPTION_API_VERSION);

        let fetched = match self.client.get(Api::Management, &url).await {
            Ok(response) => entity_from_resource(&response, SUBSCRIPTION_ENTITY_TYPE, &["Account"]),
            Err(err) => {
                ctx.record_missing_permission(err)?;
                None
            }
        };

        let mut subscription = fetched.unwrap_or_else(|| {
            Entity::new(subscription_key(&subscription_id), SUBSCRIPTION_ENTITY_TYPE, &["Account"])
                .with_property("subscriptionId", subscription_id.as_str())
        });
        subscription.key = normalize_scope_key(&subscription.key);

        let account = account_entity(ctx).ok();
        let account_key = account
            .as_ref()
            .map(|a| a.key.clone())
            .or_else(|| ctx.config.directory_id.as_deref().map(super::account::account_key));

        if let Some(account_key) = account_key {
            let edge = direct_or_mapped(
                ctx.job_state.as_ref(),
                RelationshipClass::Has,
                &subscription,
                &account_key,
                ACCOUNT_ENTITY_TYPE,
                Direction::Reverse,
            );
            ctx.job_state.add_relationship(edge);
        }

        ctx.job_state.add_entity(subscription);
        Ok(())
    }
}

pub struct ResourceGroupsStep {
    client: Arc<ProviderClient>,
}

impl ResourceGroupsStep {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepHandler for ResourceGroupsStep {
    async fn execute(&self, ctx: &StepContext) -> Result<()> {
        let subscription_id = required_subscription(ctx)?;
        let url = self
            .client
            .subscription_url(&subscription_id, "/resourcegroups", RESOURCE_GROUP_API_VERSION);

        for_each_page(ctx, &self.client, Api::Management, url, |groups| {
            for group in &groups {
                let Some(mut entity) =
                    entity_from_resource(group, RESOURCE_GROUP_ENTITY_TYPE, &["Group"])
                else {
                    continue;
                };
                entity.key = normalize_scope_key(&entity.key);
                let edge = resolve_owning_scope_relationship(&entity, ctx.job_state.as_ref())?;
                ctx.job_state.add_entity(entity);
                ctx.job_state.add_relationship(edge);
            }
            Ok(())
        })
        .await?;

        Ok(())
    }
}
