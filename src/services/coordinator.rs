//! UltraPlan coordinator.
//!
//! Owns the session and its UltraPlan run, drives the phase state
//! machine, routes events to callbacks (outside the session lock),
//! resolves instances to semantic steps, restarts steps, and persists
//! the session document on every significant transition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    ConsolidationPhase, GroupDecisionChoice, Plan, Session, UltraPlanPhase,
};
use crate::domain::ports::{AgentBackend, ReviewService, Vcs};
use crate::services::consolidator::Consolidator;
use crate::services::events::{Callbacks, EventRecord, UltraPlanEvent};
use crate::services::group_tracker::GroupTracker;
use crate::services::instance_registry::InstanceRegistry;
use crate::services::phases::{
    build_executors, executor_for, ConsolidationExecutor, PhaseContext, PhaseExecutor, PhaseTiming,
};
use crate::services::retry_manager::RetryManager;
use crate::services::scheduler::TaskScheduler;
use crate::services::session_store::SessionStore;

/// Semantic kind of an orchestration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    Planning,
    PlanManager,
    Task,
    Synthesis,
    Revision,
    Consolidation,
    GroupConsolidator,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::PlanManager => "plan_manager",
            Self::Task => "task",
            Self::Synthesis => "synthesis",
            Self::Revision => "revision",
            Self::Consolidation => "consolidation",
            Self::GroupConsolidator => "group_consolidator",
        }
    }

    /// Parse a user-supplied step type name.
    pub fn parse(s: &str) -> OrchestratorResult<Self> {
        match s {
            "planning" => Ok(Self::Planning),
            "plan_manager" => Ok(Self::PlanManager),
            "task" => Ok(Self::Task),
            "synthesis" => Ok(Self::Synthesis),
            "revision" => Ok(Self::Revision),
            "consolidation" => Ok(Self::Consolidation),
            "group_consolidator" => Ok(Self::GroupConsolidator),
            other => Err(OrchestratorError::UnknownStepType(other.to_string())),
        }
    }
}

/// An instance resolved to its role in the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInfo {
    pub step_type: StepType,
    pub task_id: Option<String>,
    pub group_index: Option<usize>,
    pub label: String,
}

/// The coordinator. Single writer to the session under its lock;
/// read paths hand out value snapshots.
pub struct UltraPlanCoordinator {
    ctx: PhaseContext,
    executors: Vec<Arc<dyn PhaseExecutor>>,
    retry: RetryManager,
    scheduler: TaskScheduler,
    tracker: GroupTracker,
    registry: InstanceRegistry,
}

impl UltraPlanCoordinator {
    pub fn new(
        session: Session,
        agent: Arc<dyn AgentBackend>,
        vcs: Arc<dyn Vcs>,
        review: Arc<dyn ReviewService>,
        timing: PhaseTiming,
    ) -> Self {
        let store = SessionStore::for_repo(&session.base_repo);
        let ctx = PhaseContext {
            session: Arc::new(RwLock::new(session)),
            agent,
            vcs,
            review,
            store,
            callbacks: Arc::new(std::sync::RwLock::new(Callbacks::default())),
            canceled: Arc::new(AtomicBool::new(false)),
            timing,
        };
        Self {
            ctx,
            executors: build_executors(),
            retry: RetryManager::default(),
            scheduler: TaskScheduler::new(),
            tracker: GroupTracker::new(),
            registry: InstanceRegistry::new(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Value snapshot of the session for UI reads.
    pub async fn session(&self) -> Session {
        self.ctx.session.read().await.clone()
    }

    pub async fn plan(&self) -> Option<Plan> {
        self.ctx
            .session
            .read()
            .await
            .ultra_plan
            .as_ref()
            .and_then(|up| up.plan.clone())
    }

    pub fn registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    pub fn group_tracker(&self) -> &GroupTracker {
        &self.tracker
    }

    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    pub fn retry_manager(&self) -> &RetryManager {
        &self.retry
    }

    /// Install callback hooks. Hooks must be non-blocking; they are
    /// invoked outside the session lock.
    pub fn set_callbacks(&self, callbacks: Callbacks) {
        *self
            .ctx
            .callbacks
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = callbacks;
    }

    /// (completed tasks, total tasks, phase).
    pub async fn get_progress(&self) -> (usize, usize, UltraPlanPhase) {
        let session = self.ctx.session.read().await;
        match session.ultra_plan.as_ref() {
            Some(up) => (
                up.completed_tasks.len(),
                up.plan.as_ref().map_or(0, |p| p.tasks.len()),
                up.phase,
            ),
            None => (0, 0, UltraPlanPhase::Planning),
        }
    }

    /// Tasks whose instances are currently in flight.
    pub async fn get_running_tasks(&self) -> Vec<String> {
        let session = self.ctx.session.read().await;
        let Some(up) = session.ultra_plan.as_ref() else {
            return Vec::new();
        };
        up.task_to_instance
            .iter()
            .filter(|(_, id)| {
                session
                    .instance(**id)
                    .is_some_and(|i| i.status.is_in_flight())
            })
            .map(|(task_id, _)| task_id.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Phase loop
    // ------------------------------------------------------------------

    /// Drive the run until it completes, fails, or pauses (conflict or
    /// group decision). Safe to call again after a pause is resolved.
    pub async fn run(&self) -> OrchestratorResult<()> {
        loop {
            if self.ctx.is_canceled() {
                return self.shutdown().await;
            }

            let phase = {
                let session = self.ctx.session.read().await;
                session.ultra_plan()?.phase
            };
            if phase.is_terminal() {
                return Ok(());
            }

            let executor = executor_for(&self.executors, phase).ok_or_else(|| {
                OrchestratorError::InvalidPhaseTransition {
                    from: phase.as_str().to_string(),
                    to: "<no executor>".to_string(),
                }
            })?;

            {
                let session = self.ctx.session.read().await;
                if !executor.can_execute(&session) {
                    drop(session);
                    return self
                        .fail(format!("phase {phase} cannot execute in current state"))
                        .await;
                }
            }

            match executor.execute(&self.ctx).await {
                Ok(()) => {}
                Err(OrchestratorError::Canceled) => return self.shutdown().await,
                Err(e) => {
                    error!(phase = %phase, error = %e, "Phase executor failed");
                    return self.fail(e.to_string()).await;
                }
            }

            if self.is_paused().await? {
                self.ctx.persist().await?;
                return Ok(());
            }

            let next = self.next_phase(phase).await?;
            if next != phase {
                self.set_phase(phase, next).await?;
            }
            if next.is_terminal() {
                let success = next == UltraPlanPhase::Complete;
                let hook = self
                    .ctx
                    .callbacks
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .on_complete
                    .clone();
                if let Some(hook) = hook {
                    hook(success);
                }
                return Ok(());
            }
        }
    }

    /// Paused states: a pending group decision, or a consolidation
    /// conflict.
    async fn is_paused(&self) -> OrchestratorResult<bool> {
        let session = self.ctx.session.read().await;
        let up = session.ultra_plan()?;
        Ok(up.awaiting_decision()
            || up
                .consolidation
                .as_ref()
                .is_some_and(|c| c.phase == ConsolidationPhase::Paused))
    }

    async fn next_phase(&self, current: UltraPlanPhase) -> OrchestratorResult<UltraPlanPhase> {
        let session = self.ctx.session.read().await;
        let up = session.ultra_plan()?;
        let next = match current {
            UltraPlanPhase::Planning => {
                if up.config.multi_pass {
                    UltraPlanPhase::PlanSelection
                } else {
                    UltraPlanPhase::ContextRefresh
                }
            }
            UltraPlanPhase::PlanSelection => UltraPlanPhase::ContextRefresh,
            UltraPlanPhase::ContextRefresh => UltraPlanPhase::Executing,
            UltraPlanPhase::Executing => UltraPlanPhase::Synthesis,
            UltraPlanPhase::Synthesis => {
                if up
                    .synthesis
                    .as_ref()
                    .is_some_and(|s| !s.recommendations.is_empty())
                {
                    UltraPlanPhase::Revision
                } else {
                    UltraPlanPhase::Consolidating
                }
            }
            UltraPlanPhase::Revision => UltraPlanPhase::Consolidating,
            UltraPlanPhase::Consolidating => UltraPlanPhase::Complete,
            terminal => terminal,
        };
        Ok(next)
    }

    /// Transition phases: mutate, persist, then announce outside the lock.
    async fn set_phase(
        &self,
        from: UltraPlanPhase,
        to: UltraPlanPhase,
    ) -> OrchestratorResult<()> {
        {
            let mut session = self.ctx.session.write().await;
            session.ultra_plan_mut()?.phase = to;
        }
        self.ctx.persist().await?;
        info!(from = %from, to = %to, "Phase change");
        self.emit(UltraPlanEvent::PhaseChange { from, to });
        let hook = self
            .ctx
            .callbacks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .on_phase_change
            .clone();
        if let Some(hook) = hook {
            hook(from, to);
        }
        Ok(())
    }

    async fn fail(&self, message: String) -> OrchestratorResult<()> {
        let from = {
            let mut session = self.ctx.session.write().await;
            let up = session.ultra_plan_mut()?;
            let from = up.phase;
            up.phase = UltraPlanPhase::Failed;
            up.error = Some(message.clone());
            from
        };
        self.ctx.persist().await?;
        self.emit(UltraPlanEvent::PhaseChange {
            from,
            to: UltraPlanPhase::Failed,
        });
        let hook = self
            .ctx
            .callbacks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .on_complete
            .clone();
        if let Some(hook) = hook {
            hook(false);
        }
        Err(OrchestratorError::ConsolidationFailed(message))
    }

    /// Cancel path: stop executors and instances, persist, return Ok.
    /// Cancellation is not an error.
    async fn shutdown(&self) -> OrchestratorResult<()> {
        for executor in &self.executors {
            executor.cancel();
        }
        let non_terminal = {
            let session = self.ctx.session.read().await;
            session
                .non_terminal_instances()
                .into_iter()
                .cloned()
                .collect::<Vec<_>>()
        };
        for instance in non_terminal {
            if let Err(e) = self.ctx.agent.stop_instance(&instance).await {
                warn!(instance_id = %instance.id, error = %e, "Failed to stop instance");
            }
        }
        {
            let mut session = self.ctx.session.write().await;
            session.clean_shutdown = true;
        }
        self.ctx.persist().await?;
        info!("Coordinator stopped");
        Ok(())
    }

    /// Request cancellation and wait for cleanup.
    pub async fn stop(&self) -> OrchestratorResult<()> {
        self.ctx.canceled.store(true, Ordering::SeqCst);
        self.shutdown().await
    }

    fn emit(&self, event: UltraPlanEvent) {
        let callbacks = self
            .ctx
            .callbacks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        callbacks.emit(&EventRecord::now(event));
    }

    // ------------------------------------------------------------------
    // Step resolution and restart
    // ------------------------------------------------------------------

    /// Resolve an instance to its semantic step. Session-state fields
    /// are checked before the task map; slice order gives groupIndex
    /// for multi-pass planners and group consolidators.
    pub async fn get_step_info(&self, instance_id: Uuid) -> Option<StepInfo> {
        let session = self.ctx.session.read().await;
        let up = session.ultra_plan.as_ref()?;

        if up.coordinator_id == Some(instance_id) {
            return Some(StepInfo {
                step_type: StepType::Planning,
                task_id: None,
                group_index: None,
                label: "Planning".to_string(),
            });
        }
        if up.plan_manager_id == Some(instance_id) {
            return Some(StepInfo {
                step_type: StepType::PlanManager,
                task_id: None,
                group_index: None,
                label: "Plan Manager".to_string(),
            });
        }
        if up.synthesis_id == Some(instance_id) {
            return Some(StepInfo {
                step_type: StepType::Synthesis,
                task_id: None,
                group_index: None,
                label: "Synthesis".to_string(),
            });
        }
        if up.revision_id == Some(instance_id) {
            return Some(StepInfo {
                step_type: StepType::Revision,
                task_id: None,
                group_index: None,
                label: "Revision".to_string(),
            });
        }
        if up.consolidation_id == Some(instance_id) {
            return Some(StepInfo {
                step_type: StepType::Consolidation,
                task_id: None,
                group_index: None,
                label: "Consolidation".to_string(),
            });
        }
        if let Some(index) = up
            .group_consolidator_ids
            .iter()
            .position(|id| *id == instance_id)
        {
            return Some(StepInfo {
                step_type: StepType::GroupConsolidator,
                task_id: None,
                group_index: Some(index),
                label: format!("Group {} Consolidator", index + 1),
            });
        }
        if let Some(index) = up
            .plan_coordinator_ids
            .iter()
            .position(|id| *id == instance_id)
        {
            return Some(StepInfo {
                step_type: StepType::Planning,
                task_id: None,
                group_index: Some(index),
                label: format!("Planning {}", index + 1),
            });
        }
        if let Some((task_id, _)) = up
            .task_to_instance
            .iter()
            .find(|(_, id)| **id == instance_id)
        {
            let group_index = up.plan.as_ref().and_then(|p| p.layer_of(task_id));
            return Some(StepInfo {
                step_type: StepType::Task,
                task_id: Some(task_id.clone()),
                group_index,
                label: format!("Task {task_id}"),
            });
        }
        None
    }

    /// Rewind session state so the given step runs again on the next
    /// `run()`.
    pub async fn restart_step(&self, step: &StepInfo) -> OrchestratorResult<()> {
        {
            let mut session = self.ctx.session.write().await;
            let up = session.ultra_plan_mut()?;

            match step.step_type {
                StepType::Planning => {
                    up.plan = None;
                    up.coordinator_id = None;
                    up.candidate_plans.clear();
                    up.plan_coordinator_ids.clear();
                    up.plan_manager_id = None;
                    up.phase = UltraPlanPhase::Planning;
                }
                StepType::PlanManager => {
                    up.plan = None;
                    up.plan_manager_id = None;
                    up.phase = UltraPlanPhase::PlanSelection;
                }
                StepType::Task => {
                    let task_id = step.task_id.clone().ok_or_else(|| {
                        OrchestratorError::TaskNotFound("restart step has no task id".to_string())
                    })?;
                    if !up.plan.as_ref().is_some_and(|p| p.contains_task(&task_id)) {
                        return Err(OrchestratorError::TaskNotFound(task_id));
                    }
                    up.completed_tasks.remove(&task_id);
                    up.failed_tasks.remove(&task_id);
                    up.task_to_instance.remove(&task_id);
                    up.group_decision = None;
                    if let Some(group) = up.plan.as_ref().and_then(|p| p.layer_of(&task_id)) {
                        up.current_group = up.current_group.min(group);
                    }
                    up.phase = UltraPlanPhase::Executing;
                }
                StepType::Synthesis => {
                    up.synthesis = None;
                    up.synthesis_id = None;
                    up.phase = UltraPlanPhase::Synthesis;
                }
                StepType::Revision => {
                    up.revision = None;
                    up.revision_id = None;
                    up.phase = UltraPlanPhase::Revision;
                }
                StepType::Consolidation => {
                    up.consolidation = None;
                    up.consolidation_id = None;
                    up.phase = UltraPlanPhase::Consolidating;
                }
                StepType::GroupConsolidator => {
                    let index = step.group_index.ok_or_else(|| {
                        OrchestratorError::UnknownStepType(
                            "group_consolidator restart requires a group index".to_string(),
                        )
                    })?;
                    if index >= up.group_consolidator_ids.len() {
                        return Err(OrchestratorError::UnknownStepType(format!(
                            "no group consolidator at index {index}"
                        )));
                    }
                    up.group_consolidator_ids.remove(index);
                    if index < up.group_consolidated_branches.len() {
                        up.group_consolidated_branches.remove(index);
                    }
                    if index < up.group_consolidation_contexts.len() {
                        up.group_consolidation_contexts.remove(index);
                    }
                    up.phase = UltraPlanPhase::Consolidating;
                }
            }
        }
        self.ctx.persist().await?;
        info!(step = step.step_type.as_str(), "Step reset for restart");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Pause resolution
    // ------------------------------------------------------------------

    /// Clear a pending group decision with the operator's choice.
    pub async fn resolve_group_decision(
        &self,
        choice: GroupDecisionChoice,
    ) -> OrchestratorResult<()> {
        let aborted = {
            let mut session = self.ctx.session.write().await;
            let up = session.ultra_plan_mut()?;
            let decision = up.group_decision.clone().ok_or_else(|| {
                OrchestratorError::ConsolidationFailed(
                    "no group decision is pending".to_string(),
                )
            })?;
            if !decision.awaiting {
                return Err(OrchestratorError::ConsolidationFailed(
                    "group decision is not awaiting resolution".to_string(),
                ));
            }

            match choice {
                GroupDecisionChoice::Continue => {
                    if let Some(d) = up.group_decision.as_mut() {
                        d.awaiting = false;
                    }
                    false
                }
                GroupDecisionChoice::Abort => {
                    up.phase = UltraPlanPhase::Failed;
                    up.error = Some(format!(
                        "aborted after partial failure in group {}",
                        decision.group_index
                    ));
                    true
                }
                GroupDecisionChoice::Revise => {
                    for task_id in &decision.failed_tasks {
                        up.failed_tasks.remove(task_id);
                        up.task_to_instance.remove(task_id);
                    }
                    up.current_group = decision.group_index;
                    up.group_decision = None;
                    false
                }
            }
        };
        self.ctx.persist().await?;
        info!(choice = ?choice, aborted, "Group decision resolved");
        Ok(())
    }

    /// Resume a paused consolidation: requires a paused state with a
    /// recorded conflict worktree attached to the session.
    pub async fn resume_consolidation(&self) -> OrchestratorResult<()> {
        let state = {
            let session = self.ctx.session.read().await;
            let up = session.ultra_plan()?;
            let state = up.consolidation.clone().ok_or_else(|| {
                OrchestratorError::ConsolidationFailed(
                    "no consolidation attached to the session".to_string(),
                )
            })?;
            if state.phase != ConsolidationPhase::Paused {
                return Err(OrchestratorError::ConsolidationFailed(format!(
                    "consolidation is {}, not paused",
                    state.phase
                )));
            }
            if state.conflict.is_none() {
                return Err(OrchestratorError::ConsolidationFailed(
                    "paused consolidation has no recorded conflict worktree".to_string(),
                ));
            }
            state
        };

        let input = ConsolidationExecutor::build_input(&self.ctx).await?;
        let callbacks = self.ctx.callbacks.clone();
        let sink: Arc<dyn Fn(EventRecord) + Send + Sync> = Arc::new(move |record| {
            let callbacks = callbacks
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            callbacks.emit(&record);
        });
        let consolidator = Consolidator::new(
            self.ctx.vcs.clone(),
            self.ctx.review.clone(),
            input,
            sink,
        )
        .with_state(state);

        let result = consolidator.resume().await;
        let final_state = consolidator.state().await;
        let completed = final_state.phase == ConsolidationPhase::Complete;
        {
            let mut session = self.ctx.session.write().await;
            session.ultra_plan_mut()?.consolidation = Some(final_state);
        }
        self.ctx.persist().await?;
        result?;

        if completed {
            self.set_phase(UltraPlanPhase::Consolidating, UltraPlanPhase::Complete)
                .await?;
            let hook = self
                .ctx
                .callbacks
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .on_complete
                .clone();
            if let Some(hook) = hook {
                hook(true);
            }
        }
        Ok(())
    }

    /// Borrow the phase context (tests and embedders).
    pub fn context(&self) -> &PhaseContext {
        &self.ctx
    }
}
