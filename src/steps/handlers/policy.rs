//! Policy steps
//!
//! Assignments are listed per subscription and linked to the scope they are
//! assigned at. Definitions are only fetched through the assignments that
//! reference them, so a definition shared by many assignments is resolved
//! once.

use super::{entities_of, for_each_page, required_subscription};
use crate::error::Result;
use crate::graph::{entity_from_resource, Entity, Relationship, RelationshipClass};
use crate::provider::{Api, ProviderClient};
use crate::resolve::{resolve_definition, resolve_owning_scope_relationship};
use crate::steps::scheduler::{StepContext, StepHandler};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

pub const POLICY_ASSIGNMENT_ENTITY_TYPE: &str = "azure_policy_assignment";

const POLICY_ASSIGNMENT_API_VERSION: &str = "2022-06-01";

pub struct PolicyAssignmentsStep {
    client: Arc<ProviderClient>,
}

impl PolicyAssignmentsStep {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepHandler for PolicyAssignmentsStep {
    async fn execute(&self, ctx: &StepContext) -> Result<()> {
        let subscription_id = required_subscription(ctx)?;
        let url = self.client.subscription_url(
            &subscription_id,
            "/providers/Microsoft.Authorization/policyAssignments",
            POLICY_ASSIGNMENT_API_VERSION,
        );

        for_each_page(ctx, &self.client, Api::Management, url, |assignments| {
            for raw in &assignments {
                let Some(assignment) = build_assignment(raw) else {
                    continue;
                };

                if is_subscription_scoped(&assignment.key) {
                    let edge =
                        resolve_owning_scope_relationship(&assignment, ctx.job_state.as_ref())?;
                    ctx.job_state.add_relationship(edge);
                } else {
                    // inherited from a management group, outside this graph
                    ctx.warn(format!(
                        "assignment {} is not scoped to a subscription, skipping scope edge",
                        assignment.key
                    ));
                }
                ctx.job_state.add_entity(assignment);
            }
            Ok(())
        })
        .await?;

        Ok(())
    }
}

pub struct PolicyDefinitionsStep {
    client: Arc<ProviderClient>,
}

impl PolicyDefinitionsStep {
    pub fn new(client: Arc<ProviderClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StepHandler for PolicyDefinitionsStep {
    async fn execute(&self, ctx: &StepContext) -> Result<()> {
        for assignment in entities_of(ctx.job_state.as_ref(), POLICY_ASSIGNMENT_ENTITY_TYPE) {
            let Some(definition_id) = assignment.property_str("policyDefinitionId") else {
                continue;
            };

            let resolved =
                resolve_definition(definition_id, ctx.job_state.as_ref(), self.client.as_ref())
                    .await?;

            match resolved {
                Some(definition) => {
                    ctx.job_state.add_relationship(Relationship::direct(
                        RelationshipClass::Uses,
                        &assignment.key,
                        &assignment.entity_type,
                        &definition.key,
                        &definition.entity_type,
                    ));
                }
                None => ctx.warn(format!(
                    "definition {} used by {} could not be resolved",
                    definition_id, assignment.key
                )),
            }
        }
        Ok(())
    }
}

fn build_assignment(raw: &Value) -> Option<Entity> {
    let properties = raw.get("properties");
    let field = |name: &str| {
        properties
            .and_then(|p| p.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    };

    let entity = entity_from_resource(raw, POLICY_ASSIGNMENT_ENTITY_TYPE, &["ControlPolicy"])?
        .with_property("policyDefinitionId", field("policyDefinitionId"))
        .with_property("scope", field("scope"))
        .with_property("enforcementMode", field("enforcementMode"))
        .with_property("description", field("description"));

    Some(entity)
}

fn is_subscription_scoped(key: &str) -> bool {
    key.trim_start_matches('/')
        .get(..14)
        .is_some_and(|head| head.eq_ignore_ascii_case("subscriptions/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_assignment() {
        let raw = json!({
            "id": "/subscriptions/s1/providers/Microsoft.Authorization/policyAssignments/a1",
            "name": "a1",
            "properties": {
                "displayName": "Require tags",
                "policyDefinitionId": "/providers/Microsoft.Authorization/policyDefinitions/d1",
                "scope": "/subscriptions/s1"
            }
        });

        let assignment = build_assignment(&raw).unwrap();
        assert_eq!(assignment.property_str("displayName"), Some("Require tags"));
        assert_eq!(
            assignment.property_str("policyDefinitionId"),
            Some("/providers/Microsoft.Authorization/policyDefinitions/d1")
        );
        assert!(assignment.properties.get("enforcementMode").is_none());
    }

    #[test]
    fn test_is_subscription_scoped() {
        assert!(is_subscription_scoped(
            "/subscriptions/s1/providers/Microsoft.Authorization/policyAssignments/a1"
        ));
        assert!(is_subscription_scoped("/Subscriptions/s1/resourceGroups/rg/providers/x/y"));
        assert!(!is_subscription_scoped(
            "/providers/Microsoft.Management/managementGroups/mg/providers/Microsoft.Authorization/policyAssignments/a1"
        ));
        assert!(!is_subscription_scoped("/subs"));
    }
}
