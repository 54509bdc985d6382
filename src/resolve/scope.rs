//! Owning-scope relationships
//!
//! Every resource lives in a scope (its resource group, or the subscription
//! for subscription-level resources), and the scope is encoded in the
//! resource's hierarchical key. A step that emits a resource links it to its
//! scope here without knowing whether the step producing the scope has run.
//!
//! If the scope entity is already in the job state the edge is direct. If it
//! is not (the scope step has not run yet, is disabled, or runs in another
//! partition) the edge is mapped: the resource is the known source and the
//! scope is described by `{_type, _key}` for the synchronizer to resolve.
//!
//! The provider does not preserve casing across APIs (a resource group listed
//! as `MyRG` is referenced as `myrg` in resource ids), so scope keys are
//! stored and looked up lowercased.

use crate::error::{IngestError, Result};
use crate::graph::{Direction, Entity, JobState, Relationship, RelationshipClass};

pub const SUBSCRIPTION_ENTITY_TYPE: &str = "azure_subscription";
pub const RESOURCE_GROUP_ENTITY_TYPE: &str = "azure_resource_group";

/// The owning scope parsed out of a resource key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwningScope {
    pub key: String,
    pub entity_type: &'static str,
}

/// Parse the owning scope out of a hierarchical resource key.
///
/// Segment names match case-insensitively; the returned key is the
/// normalized scope key (see [`normalize_scope_key`]).
pub fn parse_owning_scope(resource_key: &str) -> Result<OwningScope> {
    let segments: Vec<&str> = resource_key.split('/').filter(|s| !s.is_empty()).collect();

    let subscription = match segments.as_slice() {
        [head, sub, ..] if head.eq_ignore_ascii_case("subscriptions") => *sub,
        _ => {
            return Err(IngestError::structural(format!(
                "key '{}' has no subscription segment",
                resource_key
            )))
        }
    };

    match segments.as_slice() {
        // the subscription itself has no owning scope in this hierarchy
        [_, _] => Err(IngestError::structural(format!(
            "key '{}' is a top-level scope",
            resource_key
        ))),
        // a resource group is owned by its subscription
        [_, _, rg, _] if rg.eq_ignore_ascii_case("resourceGroups") => Ok(OwningScope {
            key: subscription_key(subscription),
            entity_type: SUBSCRIPTION_ENTITY_TYPE,
        }),
        [_, _, rg, group, _, ..] if rg.eq_ignore_ascii_case("resourceGroups") => Ok(OwningScope {
            key: resource_group_key(subscription, group),
            entity_type: RESOURCE_GROUP_ENTITY_TYPE,
        }),
        [_, _, rg] if rg.eq_ignore_ascii_case("resourceGroups") => Err(IngestError::structural(
            format!("key '{}' has an empty resource group segment", resource_key),
        )),
        _ => Ok(OwningScope {
            key: subscription_key(subscription),
            entity_type: SUBSCRIPTION_ENTITY_TYPE,
        }),
    }
}

/// Lowercased form of a scope key, used both for storing scope entities and
/// for looking them up
pub fn normalize_scope_key(key: &str) -> String {
    key.to_lowercase()
}

pub fn subscription_key(subscription_id: &str) -> String {
    normalize_scope_key(&format!("/subscriptions/{}", subscription_id))
}

pub fn resource_group_key(subscription_id: &str, resource_group: &str) -> String {
    normalize_scope_key(&format!(
        "/subscriptions/{}/resourceGroups/{}",
        subscription_id, resource_group
    ))
}

/// Link `resource` to its owning scope.
///
/// Scope present: direct `scope HAS resource`. Scope absent: mapped edge with
/// the resource as source and the scope as target filter, keyed
/// `"{scope}|has|{resource}"` so repeated calls produce the same key.
pub fn resolve_owning_scope_relationship(
    resource: &Entity,
    job_state: &dyn JobState,
) -> Result<Relationship> {
    let scope = parse_owning_scope(&resource.key)?;

    Ok(direct_or_mapped(
        job_state,
        RelationshipClass::Has,
        resource,
        &scope.key,
        scope.entity_type,
        Direction::Reverse,
    ))
}

/// Build an edge between a known entity and another entity that may not be
/// in the job state.
///
/// `Forward` means `known --class--> other`; `Reverse` means
/// `other --class--> known`. When `other` is found the edge is direct in that
/// orientation, otherwise it is mapped with `known` as the source.
pub fn direct_or_mapped(
    job_state: &dyn JobState,
    class: RelationshipClass,
    known: &Entity,
    other_key: &str,
    other_type: &str,
    direction: Direction,
) -> Relationship {
    match job_state.find_entity(other_key) {
        Some(other) => match direction {
            Direction::Forward => Relationship::direct(
                class,
                &known.key,
                &known.entity_type,
                &other.key,
                &other.entity_type,
            ),
            Direction::Reverse => Relationship::direct(
                class,
                &other.key,
                &other.entity_type,
                &known.key,
                &known.entity_type,
            ),
        },
        None => {
            tracing::warn!(
                "{} entity {} not found in job state, emitting mapped {} relationship from {}",
                other_type,
                other_key,
                class,
                known.key
            );
            Relationship::mapped(
                class,
                direction,
                &known.key,
                &known.entity_type,
                other_key,
                other_type,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryJobState;

    const VNET: &str =
        "/subscriptions/sub-1/resourceGroups/rg-1/providers/Microsoft.Network/virtualNetworks/vnet-1";

    fn vnet() -> Entity {
        Entity::new(VNET, "azure_vnet", &["Network"])
    }

    #[test]
    fn test_parse_resource_group_scope() {
        let scope = parse_owning_scope(VNET).unwrap();
        assert_eq!(scope.key, "/subscriptions/sub-1/resourcegroups/rg-1");
        assert_eq!(scope.entity_type, RESOURCE_GROUP_ENTITY_TYPE);
    }

    #[test]
    fn test_parse_normalizes_case() {
        let scope = parse_owning_scope(
            "/SUBSCRIPTIONS/Sub-1/resourcegroups/RG-1/providers/Microsoft.Web/sites/app",
        )
        .unwrap();
        assert_eq!(scope.key, "/subscriptions/sub-1/resourcegroups/rg-1");
        assert_eq!(scope.key, resource_group_key("Sub-1", "RG-1"));
        assert_eq!(subscription_key("ABC"), "/subscriptions/abc");
    }

    #[test]
    fn test_parse_subscription_scope() {
        let scope = parse_owning_scope(
            "/subscriptions/sub-1/providers/Microsoft.Authorization/policyAssignments/a1",
        )
        .unwrap();
        assert_eq!(scope.key, "/subscriptions/sub-1");
        assert_eq!(scope.entity_type, SUBSCRIPTION_ENTITY_TYPE);

        let scope = parse_owning_scope("/subscriptions/sub-1/resourceGroups/rg-1").unwrap();
        assert_eq!(scope.key, "/subscriptions/sub-1");
    }

    #[test]
    fn test_unparseable_key_is_structural() {
        for key in [
            "not-a-path",
            "",
            "/providers/Microsoft.Authorization/policyDefinitions/x",
            "/subscriptions/sub-1",
            "/subscriptions/sub-1/resourceGroups",
        ] {
            let err = parse_owning_scope(key).unwrap_err();
            assert!(
                matches!(err, IngestError::Structural { .. }),
                "expected structural error for {:?}",
                key
            );
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_scope_present_yields_direct() {
        let state = InMemoryJobState::new();
        state.add_entity(Entity::new(
            resource_group_key("sub-1", "rg-1"),
            RESOURCE_GROUP_ENTITY_TYPE,
            &["Group"],
        ));

        match resolve_owning_scope_relationship(&vnet(), &state).unwrap() {
            Relationship::Direct(rel) => {
                assert_eq!(rel.from_key, "/subscriptions/sub-1/resourcegroups/rg-1");
                assert_eq!(rel.to_key, VNET);
                assert_eq!(rel.class, RelationshipClass::Has);
                assert_eq!(rel.relationship_type, "azure_resource_group_has_azure_vnet");
            }
            other => panic!("expected direct relationship, got {:?}", other),
        }
    }

    #[test]
    fn test_scope_lookup_ignores_case() {
        let state = InMemoryJobState::new();
        let listed = Entity::new(
            "/subscriptions/s1/resourceGroups/MyRG",
            RESOURCE_GROUP_ENTITY_TYPE,
            &["Group"],
        );
        state.add_entity(Entity {
            key: normalize_scope_key(&listed.key),
            ..listed
        });

        let vnet = Entity::new(
            "/subscriptions/s1/resourcegroups/myrg/providers/Microsoft.Network/virtualNetworks/v",
            "azure_vnet",
            &["Network"],
        );
        let edge = resolve_owning_scope_relationship(&vnet, &state).unwrap();
        assert!(!edge.is_mapped(), "expected direct edge, got {:?}", edge);
        assert_eq!(
            edge.key(),
            format!("/subscriptions/s1/resourcegroups/myrg|has|{}", vnet.key)
        );
    }

    #[test]
    fn test_scope_absent_yields_reverse_mapped() {
        let state = InMemoryJobState::new();

        match resolve_owning_scope_relationship(&vnet(), &state).unwrap() {
            Relationship::Mapped(rel) => {
                assert_eq!(rel.source_key, VNET);
                assert_eq!(rel.target.entity_type, RESOURCE_GROUP_ENTITY_TYPE);
                assert_eq!(rel.target.key, "/subscriptions/sub-1/resourcegroups/rg-1");
                assert_eq!(rel.target.filter_keys, vec!["_type", "_key"]);
                assert_eq!(rel.direction, Direction::Reverse);
                assert_eq!(
                    rel.key,
                    format!("/subscriptions/sub-1/resourcegroups/rg-1|has|{}", VNET)
                );
            }
            other => panic!("expected mapped relationship, got {:?}", other),
        }
    }

    #[test]
    fn test_mapped_keys_are_deterministic() {
        let state = InMemoryJobState::new();
        let first = resolve_owning_scope_relationship(&vnet(), &state).unwrap();
        let second = resolve_owning_scope_relationship(&vnet(), &state).unwrap();
        assert_eq!(first.key().as_bytes(), second.key().as_bytes());
        assert_eq!(first, second);
    }

    #[test]
    fn test_direct_or_mapped_forward() {
        let state = InMemoryJobState::new();
        let assignment = Entity::new("a1", "azure_policy_assignment", &["ControlPolicy"]);

        let mapped = direct_or_mapped(
            &state,
            RelationshipClass::Uses,
            &assignment,
            "d1",
            "azure_policy_definition",
            Direction::Forward,
        );
        assert_eq!(mapped.key(), "a1|uses|d1");
        assert!(mapped.is_mapped());

        state.add_entity(Entity::new("d1", "azure_policy_definition", &["Rule"]));
        let direct = direct_or_mapped(
            &state,
            RelationshipClass::Uses,
            &assignment,
            "d1",
            "azure_policy_definition",
            Direction::Forward,
        );
        assert_eq!(direct.key(), "a1|uses|d1");
        assert!(!direct.is_mapped());
    }
}
