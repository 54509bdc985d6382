//! Graph entities
//!
//! An entity is one resource in the output graph, addressed by a key that is
//! globally unique and stable across runs for the same resource.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One raw payload the entity was built from, kept for the synchronizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawData {
    pub name: String,
    #[serde(rename = "rawData")]
    pub raw_data: Value,
}

/// A typed node in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "_key")]
    pub key: String,
    #[serde(rename = "_type")]
    pub entity_type: String,
    #[serde(rename = "_class")]
    pub class: Vec<String>,
    #[serde(flatten)]
    pub properties: Map<String, Value>,
    #[serde(rename = "_rawData", default, skip_serializing_if = "Vec::is_empty")]
    pub raw_data: Vec<RawData>,
}

impl Entity {
    pub fn new(key: impl Into<String>, entity_type: &str, class: &[&str]) -> Self {
        Self {
            key: key.into(),
            entity_type: entity_type.to_string(),
            class: class.iter().map(|c| c.to_string()).collect(),
            properties: Map::new(),
            raw_data: Vec::new(),
        }
    }

    /// Set a property, skipping nulls so absent provider fields stay absent.
    pub fn with_property(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.properties.insert(name.to_string(), value);
        }
        self
    }

    pub fn with_raw_data(mut self, name: &str, raw: Value) -> Self {
        self.raw_data.push(RawData {
            name: name.to_string(),
            raw_data: raw,
        });
        self
    }

    pub fn property_str(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(|v| v.as_str())
    }

    /// The `default` raw payload, if one was recorded.
    pub fn raw(&self) -> Option<&Value> {
        self.raw_data
            .iter()
            .find(|r| r.name == "default")
            .map(|r| &r.raw_data)
    }
}

/// Build an entity from a provider resource payload without any
/// resource-specific field mapping: id, name, type, location and tags.
///
/// Returns `None` when the payload carries no `id`.
pub fn entity_from_resource(resource: &Value, entity_type: &str, class: &[&str]) -> Option<Entity> {
    let id = resource.get("id").and_then(|v| v.as_str())?;

    let mut entity = Entity::new(id, entity_type, class)
        .with_property("id", id)
        .with_property("name", str_field(resource, "name"))
        .with_property("displayName", display_name(resource))
        .with_property("resourceType", str_field(resource, "type"))
        .with_property("region", str_field(resource, "location"))
        .with_raw_data("default", resource.clone());

    if let Some(tags) = resource.get("tags").and_then(|v| v.as_object()) {
        for (tag, value) in tags {
            if let Some(value) = value.as_str() {
                entity = entity.with_property(&format!("tag.{}", tag), value);
            }
        }
    }

    Some(entity)
}

fn str_field(resource: &Value, name: &str) -> Value {
    resource
        .get(name)
        .and_then(|v| v.as_str())
        .map(|s| Value::String(s.to_string()))
        .unwrap_or(Value::Null)
}

fn display_name(resource: &Value) -> Value {
    let name = resource
        .get("displayName")
        .or_else(|| resource.get("properties").and_then(|p| p.get("displayName")))
        .or_else(|| resource.get("name"))
        .and_then(|v| v.as_str());

    match name {
        Some(name) => Value::String(name.to_string()),
        None => Value::Null,
    }
}
