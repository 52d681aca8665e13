//! Phase executors.
//!
//! Each lifecycle phase has an executor satisfying the same contract:
//! `{phase, can_execute, execute, progress, cancel}`. The coordinator
//! owns transitions; executors do the work of their phase and nothing
//! else.

pub mod consolidation;
pub mod context_refresh;
pub mod execution;
pub mod plan_selection;
pub mod planning;
pub mod revision;
pub mod synthesis;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::sleep;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{InstanceStatus, Session, TaskCompletion, UltraPlanPhase};
use crate::domain::ports::{AgentBackend, InstanceSpec, ReviewService, Vcs};
use crate::services::events::{Callbacks, EventRecord, UltraPlanEvent};
use crate::services::instance_registry::InstanceRegistry;
use crate::services::session_store::SessionStore;

pub use consolidation::ConsolidationExecutor;
pub use context_refresh::ContextRefreshExecutor;
pub use execution::ExecutionExecutor;
pub use plan_selection::PlanSelectionExecutor;
pub use planning::PlanningExecutor;
pub use revision::RevisionExecutor;
pub use synthesis::SynthesisExecutor;

/// Timing budgets applied to every instance an executor runs.
#[derive(Debug, Clone)]
pub struct PhaseTiming {
    /// How often instances are polled.
    pub poll_interval: Duration,
    /// Total runtime budget per instance.
    pub instance_timeout: Duration,
    /// No change in the output tail within this window marks an
    /// instance stuck.
    pub stall_timeout: Duration,
}

impl Default for PhaseTiming {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            instance_timeout: Duration::from_secs(3600),
            stall_timeout: Duration::from_secs(600),
        }
    }
}

/// Everything an executor needs to run its phase.
#[derive(Clone)]
pub struct PhaseContext {
    pub session: Arc<RwLock<Session>>,
    pub agent: Arc<dyn AgentBackend>,
    pub vcs: Arc<dyn Vcs>,
    pub review: Arc<dyn ReviewService>,
    pub store: SessionStore,
    pub callbacks: Arc<std::sync::RwLock<Callbacks>>,
    /// Session-wide cancellation flag set by the coordinator.
    pub canceled: Arc<AtomicBool>,
    pub timing: PhaseTiming,
}

impl PhaseContext {
    /// Sanity check before an executor runs: the session must carry an
    /// UltraPlan run and the timing budgets must be non-zero.
    pub async fn validate(&self) -> OrchestratorResult<()> {
        if self.timing.poll_interval.is_zero() {
            return Err(OrchestratorError::PlanValidation(
                "poll interval must be non-zero".to_string(),
            ));
        }
        let session = self.session.read().await;
        session.ultra_plan()?;
        Ok(())
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// Emit an event through the installed callbacks, without holding
    /// the session lock.
    pub fn emit(&self, event: UltraPlanEvent) {
        let callbacks = self
            .callbacks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        callbacks.emit(&EventRecord::now(event));
    }

    /// Persist the current session document.
    pub async fn persist(&self) -> OrchestratorResult<()> {
        let session = self.session.read().await;
        self.store.save(&session).await
    }

    /// Spec for spawning an instance in this session.
    pub async fn instance_spec(&self, prompt: String, display_name: &str) -> InstanceSpec {
        let session = self.session.read().await;
        let branch_prefix = session
            .ultra_plan
            .as_ref()
            .map(|up| up.config.effective_branch_prefix().to_string())
            .unwrap_or_else(|| "claudio".to_string());
        InstanceSpec {
            base_repo: session.base_repo.clone(),
            session_id: session.id,
            prompt,
            branch_prefix,
            display_name: Some(display_name.to_string()),
        }
    }

    /// Create, register, bucket, start, and persist a new instance.
    /// Returns its ID.
    pub async fn spawn_instance(
        &self,
        prompt: String,
        bucket: &str,
        base_branch: Option<&str>,
    ) -> OrchestratorResult<Uuid> {
        let registry = InstanceRegistry::new();
        let spec = self.instance_spec(prompt, bucket).await;

        let mut instance = match base_branch {
            Some(branch) => self.agent.add_instance_from_branch(&spec, branch).await?,
            None => self.agent.add_instance(&spec).await?,
        };
        self.agent.start_instance(&mut instance).await?;

        let id = {
            let mut session = self.session.write().await;
            let objective = session
                .ultra_plan
                .as_ref()
                .map(|up| up.objective.clone())
                .unwrap_or_default();
            let id = registry.register(&mut session, instance)?;
            session.place_instance(bucket, &objective, id);
            id
        };
        self.persist().await?;
        Ok(id)
    }

    /// Poll an instance until it reaches a terminal status, enforcing
    /// the runtime and stall budgets. Status changes are applied to the
    /// session and persisted. Returns the final status, the bounded
    /// output tail, and the completion artifact (if any).
    pub async fn await_instance(
        &self,
        instance_id: Uuid,
    ) -> OrchestratorResult<(InstanceStatus, String, Option<TaskCompletion>)> {
        let registry = InstanceRegistry::new();
        let started = tokio::time::Instant::now();
        let mut last_tail = String::new();
        let mut last_change = tokio::time::Instant::now();

        loop {
            if self.is_canceled() {
                return Err(OrchestratorError::Canceled);
            }

            let snapshot = {
                let session = self.session.read().await;
                session
                    .instance(instance_id)
                    .cloned()
                    .ok_or(OrchestratorError::InstanceNotFound(instance_id))?
            };

            let polled = self.agent.poll_status(&snapshot).await?;
            if polled != snapshot.status {
                let mut session = self.session.write().await;
                registry.transition(&mut session, instance_id, polled)?;
                drop(session);
                self.persist().await?;
            }

            if polled.is_terminal() {
                let output = self
                    .agent
                    .read_output_tail(&snapshot)
                    .await
                    .unwrap_or_default();
                let artifact = self.agent.read_completion_artifact(&snapshot).await?;
                return Ok((polled, output, artifact));
            }

            // Budget enforcement: total runtime, then output stall. The
            // tail is bounded, so comparing it per tick is O(1) in the
            // transcript size; an unchanged tail means no new output.
            let overdue = started.elapsed() >= self.timing.instance_timeout;
            let tail = self
                .agent
                .read_output_tail(&snapshot)
                .await
                .unwrap_or_else(|_| last_tail.clone());
            if tail != last_tail {
                last_tail = tail;
                last_change = tokio::time::Instant::now();
            }
            let stalled = last_change.elapsed() >= self.timing.stall_timeout;

            if overdue || stalled {
                let verdict = if overdue {
                    InstanceStatus::Timeout
                } else {
                    InstanceStatus::Stuck
                };
                debug!(instance_id = %instance_id, status = %verdict, "Instance exceeded budget");
                self.agent.stop_instance(&snapshot).await?;
                let mut session = self.session.write().await;
                registry.transition(&mut session, instance_id, verdict)?;
                drop(session);
                self.persist().await?;
                let output = self
                    .agent
                    .read_output_tail(&snapshot)
                    .await
                    .unwrap_or_default();
                let artifact = self.agent.read_completion_artifact(&snapshot).await?;
                return Ok((verdict, output, artifact));
            }

            sleep(self.timing.poll_interval).await;
        }
    }
}

/// Contract every phase executor satisfies.
#[async_trait]
pub trait PhaseExecutor: Send + Sync {
    fn phase(&self) -> UltraPlanPhase;

    /// Whether this executor may run against the session as it stands.
    fn can_execute(&self, session: &Session) -> bool;

    /// Run the phase to completion (or to a pause point). An error
    /// transitions the run to `failed`.
    async fn execute(&self, ctx: &PhaseContext) -> OrchestratorResult<()>;

    /// (done, total) work units for display.
    fn progress(&self) -> (usize, usize);

    /// Idempotent; makes `execute` return promptly.
    fn cancel(&self);
}

/// All executors, one per phase that does work.
pub fn build_executors() -> Vec<Arc<dyn PhaseExecutor>> {
    vec![
        Arc::new(PlanningExecutor::new()),
        Arc::new(PlanSelectionExecutor::new()),
        Arc::new(ContextRefreshExecutor::new()),
        Arc::new(ExecutionExecutor::new()),
        Arc::new(SynthesisExecutor::new()),
        Arc::new(RevisionExecutor::new()),
        Arc::new(ConsolidationExecutor::new()),
    ]
}

/// Find the executor responsible for a phase.
pub fn executor_for(
    executors: &[Arc<dyn PhaseExecutor>],
    phase: UltraPlanPhase,
) -> Option<Arc<dyn PhaseExecutor>> {
    executors.iter().find(|e| e.phase() == phase).cloned()
}
