//! Cross-step resolution
//!
//! - [`scope`] - owning-scope edges, direct or mapped
//! - [`definition`] - memoized resolution of nested definition references

pub mod definition;
pub mod scope;

pub use definition::{definition_key, resolve_definition, DefinitionReference, DefinitionSource};
pub use scope::{
    direct_or_mapped, normalize_scope_key, parse_owning_scope, resolve_owning_scope_relationship,
    OwningScope,
};
