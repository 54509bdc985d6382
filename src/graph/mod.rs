//! Output graph model
//!
//! - [`entity`] - typed nodes addressed by a globally unique key
//! - [`relationship`] - Direct and Mapped edges
//! - [`job_state`] - the shared, idempotent store every step writes into

pub mod entity;
pub mod job_state;
pub mod relationship;

pub use entity::{entity_from_resource, Entity, RawData};
pub use job_state::{GraphSnapshot, InMemoryJobState, JobState};
pub use relationship::{
    relationship_key, relationship_type, Direction, DirectRelationship, MappedRelationship,
    Relationship, RelationshipClass, TargetDescriptor,
};
