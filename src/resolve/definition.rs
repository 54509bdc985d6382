//! Definition resolution
//!
//! Policy assignments name the definition they apply by id. A definition is
//! either a single definition or a set definition whose members are further
//! definitions, and the same definition is typically shared by many
//! assignments. Resolution fetches each definition at most once per run,
//! memoized in the job state by id, and links every set to its members with
//! `CONTAINS`. Ids are compared case-insensitively: assignments and set
//! members reference the same definition with different casing.
//!
//! The walk is an explicit work stack over the memo rather than call-stack
//! recursion: a member already in the job state is linked but never expanded
//! again, so even a cyclic reference graph terminates.

use crate::error::Result;
use crate::graph::{entity_from_resource, Entity, JobState, Relationship, RelationshipClass};
use async_trait::async_trait;
use serde_json::Value;

pub const POLICY_DEFINITION_ENTITY_TYPE: &str = "azure_policy_definition";
pub const POLICY_DEFINITION_CLASS: &[&str] = &["Rule"];
pub const POLICY_SET_DEFINITION_ENTITY_TYPE: &str = "azure_policy_set_definition";
pub const POLICY_SET_DEFINITION_CLASS: &[&str] = &["Ruleset"];

/// Prefix of the job-state data keys recording ids that could not be resolved
const UNRESOLVED_PREFIX: &str = "unresolved-definition:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionKind {
    Builtin,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionShape {
    Single,
    Set,
}

/// A definition id classified by shape and kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionReference {
    pub id: String,
    /// The set definition that referenced this one, if any
    pub parent_id: Option<String>,
    pub kind: DefinitionKind,
    pub shape: DefinitionShape,
}

impl DefinitionReference {
    /// Classify `id`; `None` when it matches no known definition path.
    pub fn classify(id: &str, parent_id: Option<&str>) -> Option<Self> {
        let lower = id.to_ascii_lowercase();

        let shape = if lower.contains("/policysetdefinitions/") {
            DefinitionShape::Set
        } else if lower.contains("/policydefinitions/") {
            DefinitionShape::Single
        } else {
            return None;
        };

        // The collection segment must be followed by a name
        let name = id.rsplit('/').next().unwrap_or("");
        if name.is_empty()
            || name.eq_ignore_ascii_case("policyDefinitions")
            || name.eq_ignore_ascii_case("policySetDefinitions")
        {
            return None;
        }

        let kind = if lower.starts_with("/subscriptions/") {
            DefinitionKind::Custom
        } else {
            DefinitionKind::Builtin
        };

        Some(Self {
            id: id.to_string(),
            parent_id: parent_id.map(str::to_string),
            kind,
            shape,
        })
    }

    /// The definition name (last path segment)
    pub fn name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }

    /// The subscription segment of a custom definition id
    pub fn subscription(&self) -> Option<&str> {
        let mut segments = self.id.split('/').filter(|s| !s.is_empty());
        match (segments.next(), segments.next()) {
            (Some(head), Some(sub)) if head.eq_ignore_ascii_case("subscriptions") => Some(sub),
            _ => None,
        }
    }

    fn entity_type(&self) -> &'static str {
        match self.shape {
            DefinitionShape::Single => POLICY_DEFINITION_ENTITY_TYPE,
            DefinitionShape::Set => POLICY_SET_DEFINITION_ENTITY_TYPE,
        }
    }

    fn entity_class(&self) -> &'static [&'static str] {
        match self.shape {
            DefinitionShape::Single => POLICY_DEFINITION_CLASS,
            DefinitionShape::Set => POLICY_SET_DEFINITION_CLASS,
        }
    }
}

/// Where definitions are fetched from
#[async_trait]
pub trait DefinitionSource: Send + Sync {
    /// Fetch one definition; `Ok(None)` when the provider returned nothing.
    async fn fetch_definition(&self, reference: &DefinitionReference) -> Result<Option<Value>>;
}

/// Member definition ids of a set definition payload
pub fn set_member_ids(raw: &Value) -> Vec<String> {
    raw.get("properties")
        .and_then(|p| p.get("policyDefinitions"))
        .and_then(|v| v.as_array())
        .map(|members| {
            members
                .iter()
                .filter_map(|m| m.get("policyDefinitionId").and_then(|v| v.as_str()))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Job-state key of the definition `id` refers to
pub fn definition_key(id: &str) -> String {
    id.to_lowercase()
}

struct Pending {
    id: String,
    parent: Option<Entity>,
}

/// Resolve `definition_id` to its entity, fetching it (and, for a set, its
/// members) on first encounter.
///
/// Returns `Ok(None)` for a dangling reference: an id of unknown shape, an
/// empty fetch, or a not-found/permission-denied answer. Only other upstream
/// failures are errors.
pub async fn resolve_definition(
    definition_id: &str,
    job_state: &dyn JobState,
    source: &dyn DefinitionSource,
) -> Result<Option<Entity>> {
    let mut root = None;
    let mut stack = vec![Pending {
        id: definition_id.to_string(),
        parent: None,
    }];

    while let Some(pending) = stack.pop() {
        let resolved = match job_state.find_entity(&definition_key(&pending.id)) {
            Some(existing) => Some(existing),
            None => {
                let parent_id = pending.parent.as_ref().map(|p| p.key.as_str());
                fetch_and_store(&pending.id, parent_id, job_state, source, &mut stack).await?
            }
        };

        match (resolved, pending.parent) {
            (Some(member), Some(set)) => {
                job_state.add_relationship(Relationship::direct(
                    RelationshipClass::Contains,
                    &set.key,
                    &set.entity_type,
                    &member.key,
                    &member.entity_type,
                ));
            }
            (None, Some(set)) => {
                tracing::warn!(
                    "Skipping CONTAINS edge from {} to unresolved member {}",
                    set.key,
                    pending.id
                );
            }
            (resolved, None) => root = resolved,
        }
    }

    Ok(root)
}

/// Fetch one definition that is not in the job state yet, store it, and
/// queue its members if it is a set.
async fn fetch_and_store(
    id: &str,
    parent_id: Option<&str>,
    job_state: &dyn JobState,
    source: &dyn DefinitionSource,
    stack: &mut Vec<Pending>,
) -> Result<Option<Entity>> {
    let miss_key = format!("{}{}", UNRESOLVED_PREFIX, definition_key(id));
    if job_state.get_data(&miss_key).is_some() {
        return Ok(None);
    }

    let Some(reference) = DefinitionReference::classify(id, parent_id) else {
        tracing::warn!("Unrecognized definition id shape: {}", id);
        job_state.set_data(&miss_key, Value::Bool(true));
        return Ok(None);
    };

    let raw = match source.fetch_definition(&reference).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            tracing::warn!("Definition {} returned no content", id);
            job_state.set_data(&miss_key, Value::Bool(true));
            return Ok(None);
        }
        Err(err) if err.is_not_found() || err.is_permission_denied() => {
            tracing::warn!("Definition {} could not be fetched: {}", id, err);
            job_state.set_data(&miss_key, Value::Bool(true));
            return Ok(None);
        }
        Err(err) => return Err(err),
    };

    let entity = build_definition_entity(&reference, &raw);
    job_state.add_entity(entity.clone());

    if reference.shape == DefinitionShape::Set {
        // reversed so members resolve in listed order
        for member_id in set_member_ids(&raw).into_iter().rev() {
            stack.push(Pending {
                id: member_id,
                parent: Some(entity.clone()),
            });
        }
    }

    Ok(Some(entity))
}

fn build_definition_entity(reference: &DefinitionReference, raw: &Value) -> Entity {
    let entity_type = reference.entity_type();
    let class = reference.entity_class();

    let mut entity = entity_from_resource(raw, entity_type, class).unwrap_or_else(|| {
        Entity::new(reference.id.as_str(), entity_type, class)
            .with_raw_data("default", raw.clone())
    });
    // keyed by the referenced id, whatever the provider echoes back
    entity.key = definition_key(&reference.id);

    let properties = raw.get("properties");
    let field = |name: &str| {
        properties
            .and_then(|p| p.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    };

    entity
        .with_property("policyType", field("policyType"))
        .with_property("description", field("description"))
        .with_property("mode", field("mode"))
        .with_property("isBuiltin", reference.kind == DefinitionKind::Builtin)
}
