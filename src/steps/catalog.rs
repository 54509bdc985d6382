//! Step Catalog - Load step declarations from JSON
//!
//! Every extraction step is declared in an embedded JSON file: what it
//! produces, which steps must finish before it starts, which ingestion source
//! toggles it and which provider permissions it needs. The catalog is parsed
//! and validated once, on first access.

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

/// Embedded catalog files (compiled into the binary)
const CATALOG_FILES: &[&str] = &[
    include_str!("../catalog/core.json"),
    include_str!("../catalog/directory.json"),
    include_str!("../catalog/resources.json"),
    include_str!("../catalog/policy.json"),
];

/// A user-toggleable capability controlling one or more steps
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct IngestionSourceConfig {
    pub id: String,
    pub title: String,
    /// Off unless the user turns it on
    #[serde(default)]
    pub defaults_to_disabled: bool,
    /// Always on; user overrides are ignored
    #[serde(default)]
    pub cannot_be_disabled: bool,
}

/// Data-driven listing for steps that convert a subscription-wide resource
/// collection generically
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ListingDef {
    /// Collection path below `/subscriptions/{id}`
    pub provider_path: String,
    pub api_version: String,
    pub entity_type: String,
    pub class: Vec<String>,
}

/// Step declaration from JSON
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StepDef {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub ingestion_source_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub listing: Option<ListingDef>,
}

impl StepDef {
    /// Minimal step, mostly for building catalogs in tests
    pub fn new(id: &str, depends_on: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            entities: Vec::new(),
            relationships: Vec::new(),
            depends_on: depends_on.iter().map(|d| d.to_string()).collect(),
            ingestion_source_id: None,
            permissions: Vec::new(),
            listing: None,
        }
    }

    pub fn with_source(mut self, source_id: &str) -> Self {
        self.ingestion_source_id = Some(source_id.to_string());
        self
    }
}

/// Root structure of catalog/*.json
#[derive(Debug, Clone, Deserialize, Default)]
struct CatalogFile {
    #[serde(default)]
    ingestion_sources: Vec<IngestionSourceConfig>,
    #[serde(default)]
    steps: Vec<StepDef>,
}

/// Catalog validation failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate step id '{0}'")]
    DuplicateStep(String),

    #[error("duplicate ingestion source id '{0}'")]
    DuplicateSource(String),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{step}' references unknown ingestion source '{source_id}'")]
    UnknownIngestionSource { step: String, source_id: String },

    #[error("dependency cycle among steps: {}", .0.join(", "))]
    Cycle(Vec<String>),
}

/// The static registry of steps and ingestion sources
#[derive(Debug, Clone, Default)]
pub struct StepCatalog {
    sources: Vec<IngestionSourceConfig>,
    steps: Vec<StepDef>,
}

/// Global catalog loaded from JSON
static CATALOG: OnceLock<StepCatalog> = OnceLock::new();

impl StepCatalog {
    /// Build and validate a catalog
    pub fn new(
        sources: Vec<IngestionSourceConfig>,
        steps: Vec<StepDef>,
    ) -> Result<Self, CatalogError> {
        let catalog = Self { sources, steps };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Get the embedded catalog (parsed and validated on first access)
    pub fn embedded() -> &'static StepCatalog {
        CATALOG.get_or_init(|| {
            let mut sources = Vec::new();
            let mut steps = Vec::new();

            for content in CATALOG_FILES {
                let partial: CatalogFile = serde_json::from_str(content)
                    .unwrap_or_else(|e| panic!("Failed to parse embedded catalog JSON: {}", e));
                sources.extend(partial.ingestion_sources);
                steps.extend(partial.steps);
            }

            Self::new(sources, steps)
                .unwrap_or_else(|e| panic!("Embedded step catalog is invalid: {}", e))
        })
    }

    pub fn steps(&self) -> &[StepDef] {
        &self.steps
    }

    pub fn step(&self, id: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn ingestion_sources(&self) -> &[IngestionSourceConfig] {
        &self.sources
    }

    pub fn ingestion_source(&self, id: &str) -> Option<&IngestionSourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }

    /// Steps that name `id` in their `depends_on`
    pub fn dependents(&self, id: &str) -> Vec<&StepDef> {
        self.steps
            .iter()
            .filter(|s| s.depends_on.iter().any(|d| d == id))
            .collect()
    }

    /// Check ids are unique, references resolve and dependencies are acyclic
    pub fn validate(&self) -> Result<(), CatalogError> {
        let mut source_ids = HashSet::new();
        for source in &self.sources {
            if !source_ids.insert(source.id.as_str()) {
                return Err(CatalogError::DuplicateSource(source.id.clone()));
            }
        }

        let mut step_ids = HashSet::new();
        for step in &self.steps {
            if !step_ids.insert(step.id.as_str()) {
                return Err(CatalogError::DuplicateStep(step.id.clone()));
            }
        }

        for step in &self.steps {
            if let Some(dependency) = step.depends_on.iter().find(|d| !step_ids.contains(d.as_str())) {
                return Err(CatalogError::UnknownDependency {
                    step: step.id.clone(),
                    dependency: dependency.clone(),
                });
            }
            if let Some(source_id) = &step.ingestion_source_id {
                if !source_ids.contains(source_id.as_str()) {
                    return Err(CatalogError::UnknownIngestionSource {
                        step: step.id.clone(),
                        source_id: source_id.clone(),
                    });
                }
            }
        }

        self.execution_order().map(|_| ())
    }

    /// Topological order of all steps (Kahn's algorithm). Ties keep catalog
    /// order so the result is deterministic.
    ///
    /// Dependencies on unknown steps are ignored here; `validate` reports them.
    pub fn execution_order(&self) -> Result<Vec<&StepDef>, CatalogError> {
        let known: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        let mut in_degree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| {
                let degree = s
                    .depends_on
                    .iter()
                    .filter(|d| known.contains(d.as_str()))
                    .count();
                (s.id.as_str(), degree)
            })
            .collect();

        let mut order: Vec<&StepDef> = Vec::with_capacity(self.steps.len());
        let mut placed: HashSet<&str> = HashSet::new();

        while order.len() < self.steps.len() {
            let Some(next) = self
                .steps
                .iter()
                .find(|s| !placed.contains(s.id.as_str()) && in_degree[s.id.as_str()] == 0)
            else {
                let mut cycle: Vec<String> = self
                    .steps
                    .iter()
                    .filter(|s| !placed.contains(s.id.as_str()))
                    .map(|s| s.id.clone())
                    .collect();
                cycle.sort();
                return Err(CatalogError::Cycle(cycle));
            };

            placed.insert(next.id.as_str());
            order.push(next);

            for dependent in self.dependents(&next.id) {
                if let Some(degree) = in_degree.get_mut(dependent.id.as_str()) {
                    *degree = degree.saturating_sub(1);
                }
            }
        }

        Ok(order)
    }
}
