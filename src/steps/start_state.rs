//! Start states
//!
//! Decides, before a run, which steps are enabled. A step runs only if its
//! ingestion source is enabled and its own config prerequisite holds:
//!
//! ```text
//! disabled = !ingestion_source_enabled(step) || required_config_missing(step)
//! ```
//!
//! Prerequisites are small pure predicates in a table keyed by step id. They
//! are independent: disabling a step does not disable the steps
//! that depend on it, each step checks its own prerequisite. Anything this
//! module does not recognize (a step without a rule, an undeclared ingestion
//! source) resolves to disabled. Steps under a `cannot_be_disabled` source
//! are the one exception to the formula: they are always enabled.

use super::catalog::{StepCatalog, StepDef};
use crate::config::IntegrationConfig;
use serde::Serialize;
use std::collections::BTreeMap;

/// Whether one step runs this time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepStartState {
    pub disabled: bool,
}

/// Start state per step id
pub type StartStates = BTreeMap<String, StepStartState>;

/// A step's config prerequisite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Prerequisite {
    /// No config needed
    None,
    /// A subscription id must be configured
    Subscription,
    /// Directory ingestion must be turned on
    Directory,
}

impl Prerequisite {
    pub fn is_met(self, config: &IntegrationConfig) -> bool {
        match self {
            Prerequisite::None => true,
            Prerequisite::Subscription => config.subscription().is_some(),
            Prerequisite::Directory => config.ingest_active_directory,
        }
    }
}

/// Prerequisite per step id
pub const STEP_PREREQUISITES: &[(&str, Prerequisite)] = &[
    ("fetch-account", Prerequisite::None),
    // directory
    ("fetch-users", Prerequisite::Directory),
    ("fetch-groups", Prerequisite::Directory),
    ("fetch-group-members", Prerequisite::Directory),
    ("fetch-service-principals", Prerequisite::Directory),
    // subscription
    ("fetch-subscriptions", Prerequisite::Subscription),
    ("fetch-resource-groups", Prerequisite::Subscription),
    ("fetch-virtual-networks", Prerequisite::Subscription),
    ("fetch-network-security-groups", Prerequisite::Subscription),
    ("fetch-storage-accounts", Prerequisite::Subscription),
    ("fetch-storage-containers", Prerequisite::Subscription),
    ("fetch-key-vaults", Prerequisite::Subscription),
    ("fetch-policy-assignments", Prerequisite::Subscription),
    ("fetch-policy-definitions", Prerequisite::Subscription),
];

/// Prerequisite registered for `step_id`, if any
pub fn prerequisite_for(step_id: &str) -> Option<Prerequisite> {
    STEP_PREREQUISITES
        .iter()
        .find(|(id, _)| *id == step_id)
        .map(|(_, p)| *p)
}

/// Compute start states for every step in `catalog`
pub fn compute_start_states(config: &IntegrationConfig, catalog: &StepCatalog) -> StartStates {
    compute_start_states_with(config, catalog, STEP_PREREQUISITES)
}

/// Compute start states against an explicit prerequisite table
pub fn compute_start_states_with(
    config: &IntegrationConfig,
    catalog: &StepCatalog,
    prerequisites: &[(&str, Prerequisite)],
) -> StartStates {
    catalog
        .steps()
        .iter()
        .map(|step| {
            let disabled = if cannot_be_disabled(step, catalog) {
                false
            } else {
                !ingestion_source_enabled(step, config, catalog)
                    || required_config_missing(step, config, prerequisites)
            };
            (step.id.clone(), StepStartState { disabled })
        })
        .collect()
}

/// Whether the step's ingestion source is on for this config
pub fn ingestion_source_enabled(
    step: &StepDef,
    config: &IntegrationConfig,
    catalog: &StepCatalog,
) -> bool {
    let Some(source_id) = step.ingestion_source_id.as_deref() else {
        return true;
    };

    let Some(source) = catalog.ingestion_source(source_id) else {
        tracing::warn!(
            "Step {} names undeclared ingestion source {}, disabling",
            step.id,
            source_id
        );
        return false;
    };

    if source.cannot_be_disabled {
        return true;
    }

    match config.source_toggle(source_id) {
        Some(toggle) => !toggle.disabled,
        None => !source.defaults_to_disabled,
    }
}

/// Steps under a `cannot_be_disabled` source run for every config
fn cannot_be_disabled(step: &StepDef, catalog: &StepCatalog) -> bool {
    step.ingestion_source_id
        .as_deref()
        .and_then(|id| catalog.ingestion_source(id))
        .is_some_and(|source| source.cannot_be_disabled)
}

fn required_config_missing(
    step: &StepDef,
    config: &IntegrationConfig,
    prerequisites: &[(&str, Prerequisite)],
) -> bool {
    match prerequisites.iter().find(|(id, _)| *id == step.id) {
        Some((_, prerequisite)) => !prerequisite.is_met(config),
        None => {
            tracing::warn!("No prerequisite rule for step {}, disabling", step.id);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IngestionSourceToggle;
    use crate::steps::catalog::IngestionSourceConfig;

    const SUB: &str = "8a4d2c1e-6f5b-4a3c-9d2e-1b0a9c8d7e6f";

    fn disabled(states: &StartStates, id: &str) -> bool {
        states.get(id).unwrap_or_else(|| panic!("no state for {}", id)).disabled
    }

    fn steps_with(prerequisite: Prerequisite) -> Vec<&'static str> {
        STEP_PREREQUISITES
            .iter()
            .filter(|(_, p)| *p == prerequisite)
            .map(|(id, _)| *id)
            .collect()
    }

    #[test]
    fn test_every_catalog_step_has_a_rule() {
        for step in StepCatalog::embedded().steps() {
            assert!(
                prerequisite_for(&step.id).is_some(),
                "missing prerequisite for {}",
                step.id
            );
        }
    }

    #[test]
    fn test_no_subscription_disables_subscription_steps() {
        let config = IntegrationConfig {
            subscription_id: None,
            ..Default::default()
        };
        let states = compute_start_states(&config, StepCatalog::embedded());

        let subscription_steps = steps_with(Prerequisite::Subscription);
        assert!(!subscription_steps.is_empty());
        for id in subscription_steps {
            assert!(disabled(&states, id), "{} should be disabled", id);
        }
        assert!(!disabled(&states, "fetch-account"));
    }

    #[test]
    fn test_directory_alone_does_not_enable_subscription_steps() {
        let config = IntegrationConfig {
            ingest_active_directory: true,
            ..Default::default()
        };
        let states = compute_start_states(&config, StepCatalog::embedded());

        for id in steps_with(Prerequisite::Directory) {
            assert!(!disabled(&states, id), "{} should be enabled", id);
        }
        for id in steps_with(Prerequisite::Subscription) {
            assert!(disabled(&states, id), "{} should stay disabled", id);
        }
    }

    #[test]
    fn test_subscription_does_not_enable_directory_steps() {
        let config = IntegrationConfig {
            subscription_id: Some(SUB.to_string()),
            ..Default::default()
        };
        let states = compute_start_states(&config, StepCatalog::embedded());

        assert!(!disabled(&states, "fetch-resource-groups"));
        assert!(!disabled(&states, "fetch-virtual-networks"));
        assert!(disabled(&states, "fetch-users"));
        // off by default
        assert!(disabled(&states, "fetch-storage-containers"));
    }

    #[test]
    fn test_user_toggles() {
        let mut config = IntegrationConfig {
            subscription_id: Some(SUB.to_string()),
            ..Default::default()
        };
        config
            .ingestion_sources
            .insert("network".to_string(), IngestionSourceToggle { disabled: true });
        config.ingestion_sources.insert(
            "storage-containers".to_string(),
            IngestionSourceToggle { disabled: false },
        );
        config
            .ingestion_sources
            .insert("account".to_string(), IngestionSourceToggle { disabled: true });

        let states = compute_start_states(&config, StepCatalog::embedded());
        assert!(disabled(&states, "fetch-virtual-networks"));
        assert!(!disabled(&states, "fetch-storage-containers"));
        // cannot be disabled: override ignored
        assert!(!disabled(&states, "fetch-account"));
    }

    #[test]
    fn test_disabling_is_not_transitive() {
        // storage accounts off, containers explicitly on: containers still run
        let mut config = IntegrationConfig {
            subscription_id: Some(SUB.to_string()),
            ..Default::default()
        };
        config
            .ingestion_sources
            .insert("storage".to_string(), IngestionSourceToggle { disabled: true });
        config.ingestion_sources.insert(
            "storage-containers".to_string(),
            IngestionSourceToggle { disabled: false },
        );

        let states = compute_start_states(&config, StepCatalog::embedded());
        assert!(disabled(&states, "fetch-storage-accounts"));
        assert!(!disabled(&states, "fetch-storage-containers"));
    }

    #[test]
    fn test_cannot_be_disabled_ignores_prerequisite() {
        let catalog = StepCatalog::new(
            vec![IngestionSourceConfig {
                id: "core".to_string(),
                title: "core".to_string(),
                defaults_to_disabled: true,
                cannot_be_disabled: true,
            }],
            vec![StepDef::new("core-step", &[]).with_source("core")],
        )
        .unwrap();

        let states = compute_start_states_with(
            &IntegrationConfig::default(),
            &catalog,
            &[("core-step", Prerequisite::Subscription)],
        );
        assert!(!disabled(&states, "core-step"));
    }

    #[test]
    fn test_unknown_step_and_source_fail_safe() {
        let catalog = StepCatalog::new(
            vec![IngestionSourceConfig {
                id: "known".to_string(),
                title: "known".to_string(),
                defaults_to_disabled: false,
                cannot_be_disabled: false,
            }],
            vec![
                StepDef::new("unruled", &[]),
                StepDef::new("ruled", &[]).with_source("known"),
            ],
        )
        .unwrap();

        let states = compute_start_states_with(
            &IntegrationConfig::default(),
            &catalog,
            &[("ruled", Prerequisite::None)],
        );
        assert!(disabled(&states, "unruled"));
        assert!(!disabled(&states, "ruled"));

        // a step naming a source the catalog does not declare
        let step = StepDef::new("ruled", &[]).with_source("ghost");
        assert!(!ingestion_source_enabled(&step, &IntegrationConfig::default(), &catalog));
    }
}
