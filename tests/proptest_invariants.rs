//! Property-based tests using proptest
//!
//! These tests check the start-state and relationship invariants against
//! randomized configs and keys.

use cloudgraph::config::{IngestionSourceToggle, IntegrationConfig};
use cloudgraph::graph::{Direction, Entity, InMemoryJobState, JobState, Relationship, RelationshipClass};
use cloudgraph::resolve::resolve_owning_scope_relationship;
use cloudgraph::steps::start_state::{prerequisite_for, Prerequisite};
use cloudgraph::steps::{compute_start_states, StepCatalog};
use proptest::prelude::*;
use std::collections::HashMap;

/// Source ids the embedded catalog declares, plus a few it does not
fn arb_source_id() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("account".to_string()),
        Just("subscriptions".to_string()),
        Just("network".to_string()),
        Just("storage".to_string()),
        Just("storage-containers".to_string()),
        Just("key-vaults".to_string()),
        Just("policy".to_string()),
        "[a-z-]{1,12}",
    ]
}

fn arb_config() -> impl Strategy<Value = IntegrationConfig> {
    (
        prop::option::of(prop_oneof![
            Just("8a4d2c1e-6f5b-4a3c-9d2e-1b0a9c8d7e6f".to_string()),
            Just("   ".to_string()),
            "[a-z0-9-]{0,36}",
        ]),
        any::<bool>(),
        prop::collection::hash_map(arb_source_id(), any::<bool>(), 0..8),
    )
        .prop_map(|(subscription_id, ingest_active_directory, toggles)| {
            let ingestion_sources: HashMap<String, IngestionSourceToggle> = toggles
                .into_iter()
                .map(|(id, disabled)| (id, IngestionSourceToggle { disabled }))
                .collect();
            IntegrationConfig {
                subscription_id,
                ingest_active_directory,
                ingestion_sources,
                ..Default::default()
            }
        })
}

/// Hierarchical resource keys below a resource group or a subscription
fn arb_resource_key() -> impl Strategy<Value = String> {
    (
        "[a-z0-9-]{1,20}",
        prop::option::of("[A-Za-z0-9_.-]{1,20}"),
        "[A-Za-z]{1,10}\\.[A-Za-z]{1,10}",
        "[A-Za-z0-9-]{1,20}",
    )
        .prop_map(|(sub, rg, provider, name)| match rg {
            Some(rg) => format!(
                "/subscriptions/{}/resourceGroups/{}/providers/{}/things/{}",
                sub, rg, provider, name
            ),
            None => format!("/subscriptions/{}/providers/{}/things/{}", sub, provider, name),
        })
}

proptest! {
    /// Steps under a cannot_be_disabled source are enabled for every config
    #[test]
    fn cannot_be_disabled_steps_always_run(config in arb_config()) {
        let catalog = StepCatalog::embedded();
        let states = compute_start_states(&config, catalog);

        prop_assert_eq!(states.len(), catalog.steps().len());
        for step in catalog.steps() {
            let locked = step
                .ingestion_source_id
                .as_deref()
                .and_then(|id| catalog.ingestion_source(id))
                .is_some_and(|source| source.cannot_be_disabled);
            if locked {
                prop_assert!(!states[&step.id].disabled, "{} was disabled", step.id);
            }
        }
    }

    /// Without a usable subscription id no subscription-scoped step runs
    #[test]
    fn subscription_steps_need_subscription(config in arb_config()) {
        prop_assume!(config.subscription().is_none());
        let states = compute_start_states(&config, StepCatalog::embedded());

        for (id, state) in &states {
            if prerequisite_for(id) == Some(Prerequisite::Subscription) {
                prop_assert!(state.disabled, "{} ran without a subscription", id);
            }
        }
    }

    /// Mapped edges get the same key on every call, matching the key of the
    /// equivalent direct edge
    #[test]
    fn mapped_keys_are_deterministic(
        source in "[ -~]{1,40}",
        target in "[ -~]{1,40}",
        reverse in any::<bool>(),
    ) {
        let direction = if reverse { Direction::Reverse } else { Direction::Forward };
        let first = Relationship::mapped(RelationshipClass::Has, direction, &source, "a", &target, "b");
        let second = Relationship::mapped(RelationshipClass::Has, direction, &source, "a", &target, "b");
        prop_assert_eq!(first.key().as_bytes(), second.key().as_bytes());

        let direct = if reverse {
            Relationship::direct(RelationshipClass::Has, &target, "b", &source, "a")
        } else {
            Relationship::direct(RelationshipClass::Has, &source, "a", &target, "b")
        };
        prop_assert_eq!(first.key(), direct.key());
        prop_assert_eq!(first.relationship_type(), direct.relationship_type());
    }

    /// Adding the scope entity flips the owning-scope edge from mapped to
    /// direct without changing its key
    #[test]
    fn scope_edge_key_survives_scope_arrival(key in arb_resource_key()) {
        let state = InMemoryJobState::new();
        let resource = Entity::new(key.as_str(), "test_resource", &["Resource"]);

        let mapped = resolve_owning_scope_relationship(&resource, &state).unwrap();
        prop_assert!(mapped.is_mapped());

        let Relationship::Mapped(edge) = &mapped else { unreachable!() };
        state.add_entity(Entity::new(edge.target.key.as_str(), &edge.target.entity_type, &["Scope"]));

        let direct = resolve_owning_scope_relationship(&resource, &state).unwrap();
        prop_assert!(!direct.is_mapped());
        prop_assert_eq!(mapped.key(), direct.key());
    }

    /// Adding the same entity any number of times stores it once
    #[test]
    fn add_entity_is_idempotent(key in "[ -~]{1,40}", repeats in 1usize..10) {
        let state = InMemoryJobState::new();
        let inserted = (0..repeats)
            .filter(|_| state.add_entity(Entity::new(key.as_str(), "t", &["C"])))
            .count();
        prop_assert_eq!(inserted, 1);
        prop_assert_eq!(state.entity_count(), 1);
    }
}
