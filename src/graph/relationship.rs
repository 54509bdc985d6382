//! Graph relationships
//!
//! A relationship is either [`Relationship::Direct`], when both endpoints are
//! known at creation time, or [`Relationship::Mapped`], when only the source is
//! known and the other side is described by a filter that the external
//! synchronizer resolves later against its full entity store.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Relationship class (the verb of the edge)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipClass {
    Has,
    Contains,
    Uses,
    Assigned,
}

impl RelationshipClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Has => "HAS",
            Self::Contains => "CONTAINS",
            Self::Uses => "USES",
            Self::Assigned => "ASSIGNED",
        }
    }
}

impl fmt::Display for RelationshipClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of a mapped relationship relative to its source entity.
///
/// `Reverse` means the edge semantically points from the target to the
/// source (e.g. `scope HAS resource` recorded with the resource as source).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Forward,
    Reverse,
}

/// Build the deterministic key of a relationship.
pub fn relationship_key(from_key: &str, class: RelationshipClass, to_key: &str) -> String {
    format!("{}|{}|{}", from_key, class.as_str().to_lowercase(), to_key)
}

/// Build the relationship type from the endpoint types.
pub fn relationship_type(class: RelationshipClass, from_type: &str, to_type: &str) -> String {
    format!("{}_{}_{}", from_type, class.as_str().to_lowercase(), to_type)
}

/// An edge whose endpoints are both present in the job state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectRelationship {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_class")]
    pub class: RelationshipClass,
    #[serde(rename = "_type")]
    pub relationship_type: String,
    #[serde(rename = "_fromEntityKey")]
    pub from_key: String,
    #[serde(rename = "_toEntityKey")]
    pub to_key: String,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
}

/// Filter describing the unresolved side of a mapped relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    #[serde(rename = "_type")]
    pub entity_type: String,
    #[serde(rename = "_key")]
    pub key: String,
    /// Which target properties the synchronizer matches on.
    #[serde(rename = "targetFilterKeys")]
    pub filter_keys: Vec<String>,
}

/// An edge whose target is resolved later by the synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRelationship {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_class")]
    pub class: RelationshipClass,
    #[serde(rename = "_type")]
    pub relationship_type: String,
    #[serde(rename = "sourceEntityKey")]
    pub source_key: String,
    #[serde(rename = "targetEntity")]
    pub target: TargetDescriptor,
    pub direction: Direction,
    #[serde(rename = "skipTargetCreation")]
    pub skip_target_creation: bool,
}

/// A typed edge in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Relationship {
    Direct(DirectRelationship),
    Mapped(MappedRelationship),
}

impl Relationship {
    /// Direct edge `from --class--> to`.
    pub fn direct(
        class: RelationshipClass,
        from_key: &str,
        from_type: &str,
        to_key: &str,
        to_type: &str,
    ) -> Self {
        Self::Direct(DirectRelationship {
            key: relationship_key(from_key, class, to_key),
            class,
            relationship_type: relationship_type(class, from_type, to_type),
            from_key: from_key.to_string(),
            to_key: to_key.to_string(),
            properties: Map::new(),
        })
    }

    /// Mapped edge with `source` known and the other side described by
    /// `(target_type, target_key)`.
    ///
    /// The key and type are always derived in the semantic direction, so a
    /// reverse mapped edge gets the same key the direct edge would have had.
    pub fn mapped(
        class: RelationshipClass,
        direction: Direction,
        source_key: &str,
        source_type: &str,
        target_key: &str,
        target_type: &str,
    ) -> Self {
        let (key, relationship_type) = match direction {
            Direction::Forward => (
                relationship_key(source_key, class, target_key),
                relationship_type(class, source_type, target_type),
            ),
            Direction::Reverse => (
                relationship_key(target_key, class, source_key),
                relationship_type(class, target_type, source_type),
            ),
        };

        Self::Mapped(MappedRelationship {
            key,
            class,
            relationship_type,
            source_key: source_key.to_string(),
            target: TargetDescriptor {
                entity_type: target_type.to_string(),
                key: target_key.to_string(),
                filter_keys: vec!["_type".to_string(), "_key".to_string()],
            },
            direction,
            skip_target_creation: true,
        })
    }

    pub fn key(&self) -> &str {
        match self {
            Self::Direct(r) => &r.key,
            Self::Mapped(r) => &r.key,
        }
    }

    pub fn class(&self) -> RelationshipClass {
        match self {
            Self::Direct(r) => r.class,
            Self::Mapped(r) => r.class,
        }
    }

    pub fn relationship_type(&self) -> &str {
        match self {
            Self::Direct(r) => &r.relationship_type,
            Self::Mapped(r) => &r.relationship_type,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Self::Mapped(_))
    }
}
