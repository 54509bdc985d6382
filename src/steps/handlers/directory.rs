//! Directory object steps
//!
//! Users, groups and service principals are plain directory listings linked
//! to the account. Group membership is resolved afterwards: a member that no
//! listing produced (disabled step, object type not ingested) gets a mapped
//! edge instead of a direct one.

use super::account::account_entity;
use super::{entities_of, for_each_page};
use crate::error::{ok_if_not_found, Result};
use crate::graph::{entity_from_resource, Direction, Entity, Relationship, RelationshipClass};
use crate::provider::{Api, ProviderClient};
use crate::resolve::direct_or_mapped;
use crate::steps::scheduler::{StepContext, StepHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub const USER_ENTITY_TYPE: &str = "azure_user";
pub const GROUP_ENTITY_TYPE: &str = "azure_user_group";
pub const SERVICE_PRINCIPAL_ENTITY_TYPE: &str = "azure_service_principal";

/// A directory collection linked to the account with `HAS`
pub struct DirectoryListStep {
    client: Arc<ProviderClient>,
    path: &'static str,
    entity_type: &'static str,
    class: &'static [&'static str],
}

impl DirectoryListStep {
    pub fn users(client: Arc<ProviderClient>) -> Self {
        Self {
            client,
            path: "/users",
            entity_type: USER_ENTITY_TYPE,
            class: &["User"],
        }
    }

    pub fn groups(client: Arc<ProviderClient>) -> Self {
        Self {
            client,
            path: "/groups",
            entity_type: GROUP_ENTITY_TYPE,
            class: &["UserGroup"],
        }
    }

    pub fn service_principals(client: Arc<ProviderClient>) -> Self {
        Self {
            client,
            path: "/servicePrincipals",
            entity_type: SERVICE_PRINCIPAL_ENTITY_TYPE,
            class: &["Service"],
        }
    }
}

#[async_trait]
impl StepHandler for DirectoryListStep {
    async fn execute(&self, ctx: &StepContext) -> Result<()> {
        let account = account_entity(ctx)?;
        let url = self.client.directory_url(self.path);

        let seen = for_each_page(ctx, &self.client, Api::Directory, url, |items| {
            for item in &items {
                let Some(entity) = entity_from_resource(item, self.entity_type, self.class) else {
                    tracing::debug!("Skipping {} without id", self.entity_type);
                    continue;
                };
                let edge = Relationship::direct(
                    RelationshipClass::Has,
                    &account.key,
                    &account.entity_type,
                    &entity.key,
                    &entity.entity_type,
                );
                ctx.job_state.add_entity(entity);
                ctx.job_state.add_relationship(edge);
            }
            Ok(())
        })
        .await?;

        tracing::debug!("Listed {} {} object(s)", seen, self.entity_type);
        Ok(())
    }
}

/// Links every ingested group to its members
pub struct GroupMembersStep {
    client: Arc<ProviderClient>,
}

impl GroupMembersStep {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepHandler for GroupMembersStep {
    async fn execute(&self, ctx: &StepContext) -> Result<()> {
        for group in entities_of(ctx.job_state.as_ref(), GROUP_ENTITY_TYPE) {
            let url = self
                .client
                .directory_url(&format!("/groups/{}/members", group.key));

            // a group deleted since it was listed has no members
            let listed = for_each_page(ctx, &self.client, Api::Directory, url, |members| {
                for member in &members {
                    if let Some(edge) = member_relationship(ctx, &group, member) {
                        ctx.job_state.add_relationship(edge);
                    }
                }
                Ok(())
            })
            .await;
            ok_if_not_found(listed)?;
        }
        Ok(())
    }
}

/// Entity type for a directory member, from its `@odata.type`
pub fn member_entity_type(member: &Value) -> Option<&'static str> {
    match member.get("@odata.type").and_then(|v| v.as_str())? {
        "#microsoft.graph.user" => Some(USER_ENTITY_TYPE),
        "#microsoft.graph.group" => Some(GROUP_ENTITY_TYPE),
        "#microsoft.graph.servicePrincipal" => Some(SERVICE_PRINCIPAL_ENTITY_TYPE),
        _ => None,
    }
}

fn member_relationship(ctx: &StepContext, group: &Entity, member: &Value) -> Option<Relationship> {
    let member_id = member.get("id").and_then(|v| v.as_str())?;
    let Some(member_type) = member_entity_type(member) else {
        tracing::debug!("Skipping member {} of unsupported type", member_id);
        return None;
    };

    Some(direct_or_mapped(
        ctx.job_state.as_ref(),
        RelationshipClass::Has,
        group,
        member_id,
        member_type,
        Direction::Forward,
    ))
}
