//! Ingestion steps
//!
//! - [`catalog`] - embedded step and ingestion-source declarations
//! - [`start_state`] - which steps run for a given config
//! - [`scheduler`] - dependency-ordered execution and the run report
//! - [`handlers`] - the provider-backed implementation of each step

pub mod catalog;
pub mod handlers;
pub mod scheduler;
pub mod start_state;

pub use catalog::{CatalogError, IngestionSourceConfig, StepCatalog, StepDef};
pub use handlers::default_handlers;
pub use scheduler::{ExecutionReport, HandlerMap, Scheduler, StepContext, StepHandler, StepStatus};
pub use start_state::{compute_start_states, StartStates, StepStartState};
