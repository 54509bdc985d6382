//! Scheduler
//!
//! Runs the enabled steps of a catalog in dependency order. Each wave starts
//! every step whose dependencies have all finished and waits for the whole
//! wave before computing the next one. Disabled steps count as finished as
//! soon as the run starts.
//!
//! A failing step never stops the run. It is recorded as `Failure` and the
//! steps depending on it still execute; when they succeed they are recorded
//! as `PartialSuccessDueToDependencyFailure` since their input was
//! incomplete.

use super::catalog::{CatalogError, StepCatalog, StepDef};
use super::start_state::StartStates;
use crate::config::IntegrationConfig;
use crate::error::{IngestError, Result};
use crate::graph::JobState;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use uuid::Uuid;

/// The routine implementing one catalog step
#[async_trait]
pub trait StepHandler: Send + Sync {
    async fn execute(&self, ctx: &StepContext) -> Result<()>;
}

/// Handlers keyed by step id
pub type HandlerMap = HashMap<String, Arc<dyn StepHandler>>;

/// Everything a running step can reach
pub struct StepContext {
    pub step_id: String,
    pub config: Arc<IntegrationConfig>,
    pub job_state: Arc<dyn JobState>,
    warnings: Mutex<Vec<String>>,
}

impl StepContext {
    pub fn new(
        step_id: &str,
        config: Arc<IntegrationConfig>,
        job_state: Arc<dyn JobState>,
    ) -> Self {
        Self {
            step_id: step_id.to_string(),
            config,
            job_state,
            warnings: Mutex::new(Vec::new()),
        }
    }

    /// Record a warning in the step report
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("[{}] {}", self.step_id, message);
        if let Ok(mut warnings) = self.warnings.lock() {
            warnings.push(message);
        }
    }

    /// Turn a permission-denied error into a warning so the step can continue
    /// with partial results. Any other error is handed back.
    pub fn record_missing_permission(&self, err: IngestError) -> Result<()> {
        if err.is_permission_denied() {
            self.warn(format!("missing permission: {}", err));
            Ok(())
        } else {
            Err(err)
        }
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings
            .lock()
            .map(|w| w.clone())
            .unwrap_or_default()
    }
}

/// Outcome of one step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failure,
    PartialSuccessDueToDependencyFailure,
    Disabled,
}

impl StepStatus {
    fn is_failed(self) -> bool {
        matches!(
            self,
            StepStatus::Failure | StepStatus::PartialSuccessDueToDependencyFailure
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub id: String,
    pub status: StepStatus,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Per-step outcome of one run, in catalog order
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepResult>,
}

impl ExecutionReport {
    pub fn step(&self, id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failure)
            .map(|s| s.id.as_str())
            .collect()
    }
}

pub struct Scheduler;

impl Scheduler {
    /// Execute every enabled step of `catalog`.
    ///
    /// Steps missing from `start_states` are treated as disabled.
    pub async fn run(
        catalog: &StepCatalog,
        start_states: &StartStates,
        handlers: &HandlerMap,
        config: Arc<IntegrationConfig>,
        job_state: Arc<dyn JobState>,
    ) -> std::result::Result<ExecutionReport, CatalogError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        tracing::info!("Run {} started", run_id);

        let mut pending: Vec<&StepDef> = Vec::new();
        let mut results: HashMap<String, StepResult> = HashMap::new();

        for step in catalog.execution_order()? {
            let disabled = start_states.get(&step.id).map_or(true, |s| s.disabled);
            if disabled {
                tracing::debug!("Step {} disabled", step.id);
                results.insert(step.id.clone(), disabled_result(&step.id));
            } else {
                pending.push(step);
            }
        }

        while !pending.is_empty() {
            let (ready, waiting): (Vec<&StepDef>, Vec<&StepDef>) = pending
                .into_iter()
                .partition(|s| s.depends_on.iter().all(|d| results.contains_key(d)));
            pending = waiting;

            if ready.is_empty() {
                let mut stuck: Vec<String> = pending.iter().map(|s| s.id.clone()).collect();
                stuck.sort();
                return Err(CatalogError::Cycle(stuck));
            }

            let wave = ready.iter().map(|step| {
                let upstream_failed = step
                    .depends_on
                    .iter()
                    .any(|d| results.get(d).is_some_and(|r| r.status.is_failed()));
                run_step(
                    step,
                    handlers.get(&step.id).cloned(),
                    upstream_failed,
                    config.clone(),
                    job_state.clone(),
                )
            });

            for result in futures::future::join_all(wave).await {
                results.insert(result.id.clone(), result);
            }
        }

        let steps: Vec<StepResult> = catalog
            .steps()
            .iter()
            .filter_map(|s| results.remove(&s.id))
            .collect();

        let finished_at = Utc::now();
        tracing::info!(
            "Run {} finished in {}ms, {} step(s) failed",
            run_id,
            (finished_at - started_at).num_milliseconds(),
            steps.iter().filter(|s| s.status == StepStatus::Failure).count()
        );

        Ok(ExecutionReport {
            run_id,
            started_at,
            finished_at,
            steps,
        })
    }
}

fn disabled_result(id: &str) -> StepResult {
    StepResult {
        id: id.to_string(),
        status: StepStatus::Disabled,
        warnings: Vec::new(),
        error: None,
        duration_ms: 0,
    }
}

async fn run_step(
    step: &StepDef,
    handler: Option<Arc<dyn StepHandler>>,
    upstream_failed: bool,
    config: Arc<IntegrationConfig>,
    job_state: Arc<dyn JobState>,
) -> StepResult {
    let ctx = Arc::new(StepContext::new(&step.id, config, job_state));
    let started = Instant::now();
    tracing::info!("Step {} started", step.id);

    let outcome: std::result::Result<(), String> = match handler {
        None => Err(IngestError::structural(format!("no handler registered for step '{}'", step.id))
            .to_string()),
        Some(handler) => {
            let task_ctx = ctx.clone();
            // spawned so a panicking handler fails only its own step
            match tokio::spawn(async move { handler.execute(&task_ctx).await }).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(err.to_string()),
                Err(join_err) => Err(format!("step task aborted: {}", join_err)),
            }
        }
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    let (status, error) = match outcome {
        Ok(()) if upstream_failed => (StepStatus::PartialSuccessDueToDependencyFailure, None),
        Ok(()) => (StepStatus::Success, None),
        Err(message) => {
            tracing::error!("Step {} failed: {}", step.id, message);
            (StepStatus::Failure, Some(message))
        }
    };
    tracing::info!("Step {} finished: {:?} in {}ms", step.id, status, duration_ms);

    StepResult {
        id: step.id.clone(),
        status,
        warnings: ctx.warnings(),
        error,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Entity, InMemoryJobState};
    use crate::steps::start_state::StepStartState;
    use reqwest::StatusCode;

    /// Records its id in a shared log, optionally failing
    struct Recorder {
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    #[async_trait]
    impl StepHandler for Recorder {
        async fn execute(&self, ctx: &StepContext) -> Result<()> {
            self.log.lock().unwrap().push(ctx.step_id.clone());
            ctx.job_state
                .add_entity(Entity::new(ctx.step_id.as_str(), "test_entity", &["Test"]));
            if self.fail {
                return Err(IngestError::structural("boom"));
            }
            Ok(())
        }
    }

    struct Forbidden;

    #[async_trait]
    impl StepHandler for Forbidden {
        async fn execute(&self, ctx: &StepContext) -> Result<()> {
            ctx.record_missing_permission(IngestError::upstream(StatusCode::FORBIDDEN, "/users"))?;
            ctx.record_missing_permission(IngestError::upstream(StatusCode::NOT_FOUND, "/groups"))
        }
    }

    struct Panics;

    #[async_trait]
    impl StepHandler for Panics {
        async fn execute(&self, _ctx: &StepContext) -> Result<()> {
            panic!("handler bug");
        }
    }

    fn catalog() -> StepCatalog {
        StepCatalog::new(
            vec![],
            vec![
                StepDef::new("c", &["b"]),
                StepDef::new("a", &[]),
                StepDef::new("b", &["a"]),
                StepDef::new("d", &[]),
            ],
        )
        .unwrap()
    }

    fn enabled(ids: &[&str]) -> StartStates {
        ids.iter()
            .map(|id| (id.to_string(), StepStartState { disabled: false }))
            .collect()
    }

    fn recorders(ids: &[&str], failing: &[&str], log: &Arc<Mutex<Vec<String>>>) -> HandlerMap {
        ids.iter()
            .map(|id| {
                let handler: Arc<dyn StepHandler> = Arc::new(Recorder {
                    log: log.clone(),
                    fail: failing.contains(id),
                });
                (id.to_string(), handler)
            })
            .collect()
    }

    async fn run(states: &StartStates, handlers: &HandlerMap) -> (ExecutionReport, Arc<InMemoryJobState>) {
        let state = Arc::new(InMemoryJobState::new());
        let report = Scheduler::run(
            &catalog(),
            states,
            handlers,
            Arc::new(IntegrationConfig::default()),
            state.clone(),
        )
        .await
        .unwrap();
        (report, state)
    }

    #[tokio::test]
    async fn test_runs_in_dependency_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ids = ["a", "b", "c", "d"];
        let (report, state) = run(&enabled(&ids), &recorders(&ids, &[], &log)).await;

        let log = log.lock().unwrap().clone();
        let position = |id: &str| log.iter().position(|s| s == id).unwrap();
        assert!(position("a") < position("b"));
        assert!(position("b") < position("c"));

        // report follows catalog order
        let order: Vec<&str> = report.steps.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(order, vec!["c", "a", "b", "d"]);
        assert!(report.steps.iter().all(|s| s.status == StepStatus::Success));
        assert_eq!(state.entity_count(), 4);
        assert!(report.finished_at >= report.started_at);
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ids = ["a", "b", "c", "d"];
        let (report, _) = run(&enabled(&ids), &recorders(&ids, &["a"], &log)).await;

        assert_eq!(report.step("a").unwrap().status, StepStatus::Failure);
        assert!(report.step("a").unwrap().error.as_deref().unwrap().contains("boom"));
        assert_eq!(
            report.step("b").unwrap().status,
            StepStatus::PartialSuccessDueToDependencyFailure
        );
        assert_eq!(
            report.step("c").unwrap().status,
            StepStatus::PartialSuccessDueToDependencyFailure
        );
        assert_eq!(report.step("d").unwrap().status, StepStatus::Success);
        assert_eq!(report.failed_steps(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_disabled_steps_count_as_finished() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ids = ["a", "b", "c", "d"];
        let mut states = enabled(&ids);
        states.insert("b".to_string(), StepStartState { disabled: true });
        // "d" has no start state at all
        states.remove("d");

        let (report, _) = run(&states, &recorders(&ids, &[], &log)).await;

        assert_eq!(report.step("b").unwrap().status, StepStatus::Disabled);
        assert_eq!(report.step("d").unwrap().status, StepStatus::Disabled);
        assert_eq!(report.step("c").unwrap().status, StepStatus::Success);
        assert!(!log.lock().unwrap().contains(&"b".to_string()));
    }

    #[tokio::test]
    async fn test_missing_handler_fails_step() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let ids = ["a", "b", "c", "d"];
        let (report, _) = run(&enabled(&ids), &recorders(&["a", "c", "d"], &[], &log)).await;

        let b = report.step("b").unwrap();
        assert_eq!(b.status, StepStatus::Failure);
        assert!(b.error.as_deref().unwrap().contains("no handler"));
        assert_eq!(
            report.step("c").unwrap().status,
            StepStatus::PartialSuccessDueToDependencyFailure
        );
    }

    #[tokio::test]
    async fn test_permission_denied_becomes_warning() {
        let mut handlers: HandlerMap = HashMap::new();
        handlers.insert("d".to_string(), Arc::new(Forbidden));
        let (report, _) = run(&enabled(&["d"]), &handlers).await;

        let d = report.step("d").unwrap();
        // the 403 is tolerated, the 404 is not
        assert_eq!(d.status, StepStatus::Failure);
        assert_eq!(d.warnings.len(), 1);
        assert!(d.warnings[0].contains("missing permission"));
    }

    #[tokio::test]
    async fn test_panicking_handler_fails_only_its_step() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut handlers = recorders(&["a", "b", "c"], &[], &log);
        handlers.insert("d".to_string(), Arc::new(Panics));

        let (report, _) = run(&enabled(&["a", "b", "c", "d"]), &handlers).await;
        assert_eq!(report.step("d").unwrap().status, StepStatus::Failure);
        assert_eq!(report.step("c").unwrap().status, StepStatus::Success);
    }
}
