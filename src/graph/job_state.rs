//! Job State
//!
//! The single store shared by every step of a run. Steps add entities and
//! relationships by key, look up what earlier steps produced, and pass small
//! values to dependent steps through `set_data`/`get_data`.
//!
//! Adds are idempotent: the first entity (or relationship) stored under a key
//! wins and later adds with the same key are ignored. Insertion goes through
//! the map's entry API, so concurrent steps adding the same key still insert
//! at most once.

use super::entity::Entity;
use super::relationship::Relationship;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Store interface handed to every step and resolver.
pub trait JobState: Send + Sync {
    /// Add an entity. Returns `false` if the key was already present.
    fn add_entity(&self, entity: Entity) -> bool;

    fn find_entity(&self, key: &str) -> Option<Entity>;

    fn has_key(&self, key: &str) -> bool;

    /// Visit every entity of `entity_type`, in key order.
    fn iterate_entities(&self, entity_type: &str, f: &mut dyn FnMut(&Entity));

    /// Add a relationship. Returns `false` if the key was already present.
    fn add_relationship(&self, relationship: Relationship) -> bool;

    fn get_data(&self, key: &str) -> Option<Value>;

    fn set_data(&self, key: &str, value: Value);

    /// Everything collected so far, sorted by key.
    fn snapshot(&self) -> GraphSnapshot;

    fn add_entities(&self, entities: Vec<Entity>) -> usize {
        entities
            .into_iter()
            .map(|e| self.add_entity(e))
            .filter(|inserted| *inserted)
            .count()
    }

    fn add_relationships(&self, relationships: Vec<Relationship>) -> usize {
        relationships
            .into_iter()
            .map(|r| self.add_relationship(r))
            .filter(|inserted| *inserted)
            .count()
    }

    /// Collect keys of every entity of `entity_type`.
    fn entity_keys(&self, entity_type: &str) -> Vec<String> {
        let mut keys = Vec::new();
        self.iterate_entities(entity_type, &mut |e| keys.push(e.key.clone()));
        keys
    }
}

/// Serializable view of a finished (or in-progress) run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub entities: Vec<Entity>,
    pub relationships: Vec<Relationship>,
}

/// In-memory job state backed by concurrent maps.
#[derive(Debug, Default)]
pub struct InMemoryJobState {
    entities: DashMap<String, Entity>,
    relationships: DashMap<String, Relationship>,
    data: DashMap<String, Value>,
}

impl InMemoryJobState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }
}

impl JobState for InMemoryJobState {
    fn add_entity(&self, entity: Entity) -> bool {
        match self.entities.entry(entity.key.clone()) {
            Entry::Occupied(existing) => {
                tracing::debug!(
                    "Duplicate entity key {} (type {}), keeping first",
                    existing.key(),
                    entity.entity_type
                );
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(entity);
                true
            }
        }
    }

    fn find_entity(&self, key: &str) -> Option<Entity> {
        self.entities.get(key).map(|e| e.value().clone())
    }

    fn has_key(&self, key: &str) -> bool {
        self.entities.contains_key(key)
    }

    fn iterate_entities(&self, entity_type: &str, f: &mut dyn FnMut(&Entity)) {
        // Copy out first so the callback never runs while a shard lock is held.
        let mut matching: Vec<Entity> = self
            .entities
            .iter()
            .filter(|e| e.value().entity_type == entity_type)
            .map(|e| e.value().clone())
            .collect();
        matching.sort_by(|a, b| a.key.cmp(&b.key));

        for entity in &matching {
            f(entity);
        }
    }

    fn add_relationship(&self, relationship: Relationship) -> bool {
        match self.relationships.entry(relationship.key().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(relationship);
                true
            }
        }
    }

    fn get_data(&self, key: &str) -> Option<Value> {
        self.data.get(key).map(|v| v.value().clone())
    }

    fn set_data(&self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    fn snapshot(&self) -> GraphSnapshot {
        let mut entities: Vec<Entity> = self.entities.iter().map(|e| e.value().clone()).collect();
        entities.sort_by(|a, b| a.key.cmp(&b.key));

        let mut relationships: Vec<Relationship> = self
            .relationships
            .iter()
            .map(|r| r.value().clone())
            .collect();
        relationships.sort_by(|a, b| a.key().cmp(b.key()));

        GraphSnapshot {
            entities,
            relationships,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::relationship::RelationshipClass;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_add_same_key_twice_yields_one_node() {
        let state = InMemoryJobState::new();
        assert!(state.add_entity(Entity::new("k", "t", &["C"]).with_property("v", 1)));
        assert!(!state.add_entity(Entity::new("k", "t", &["C"]).with_property("v", 2)));

        let snapshot = state.snapshot();
        assert_eq!(snapshot.entities.len(), 1);
        assert_eq!(snapshot.entities[0].properties["v"], json!(1));
    }

    #[test]
    fn test_relationships_are_idempotent() {
        let state = InMemoryJobState::new();
        let rel = Relationship::direct(RelationshipClass::Has, "a", "t", "b", "t");
        assert!(state.add_relationship(rel.clone()));
        assert!(!state.add_relationship(rel));
        assert_eq!(state.relationship_count(), 1);
    }

    #[test]
    fn test_iterate_filters_by_type() {
        let state = InMemoryJobState::new();
        state.add_entities(vec![
            Entity::new("b", "user", &["User"]),
            Entity::new("a", "user", &["User"]),
            Entity::new("g", "group", &["UserGroup"]),
        ]);

        assert_eq!(state.entity_keys("user"), vec!["a", "b"]);
        assert_eq!(state.entity_keys("group"), vec!["g"]);
        assert!(state.entity_keys("missing").is_empty());
    }

    #[test]
    fn test_data_round_trip() {
        let state = InMemoryJobState::new();
        assert!(state.get_data("account").is_none());
        state.set_data("account", json!({"_key": "tenant-1"}));
        assert_eq!(state.get_data("account").unwrap()["_key"], "tenant-1");
    }

    #[test]
    fn test_concurrent_adds_insert_once() {
        let state = Arc::new(InMemoryJobState::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || {
                    (0..100)
                        .filter(|i| state.add_entity(Entity::new(format!("k{}", i), "t", &["C"])))
                        .count()
                })
            })
            .collect();

        let inserted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(inserted, 100);
        assert_eq!(state.entity_count(), 100);
    }
}
