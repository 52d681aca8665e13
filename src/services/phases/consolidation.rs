//! Consolidation phase executor.
//!
//! Builds the consolidation input from the session (task branches,
//! completion artifacts, synthesis/revision records, pre-consolidated
//! branches) and delegates to the [`Consolidator`]. A conflict leaves
//! the phase in place with a paused state attached to the session.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{ConsolidationPhase, ConsolidationState, Session, UltraPlanPhase};
use crate::services::consolidator::{ConsolidationInput, Consolidator};
use crate::services::events::EventRecord;

use super::execution::read_completion;
use super::{PhaseContext, PhaseExecutor};

pub struct ConsolidationExecutor {
    canceled: AtomicBool,
    /// The live consolidator, kept so `cancel` can stop it.
    active: Mutex<Option<Arc<Consolidator>>>,
}

impl Default for ConsolidationExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsolidationExecutor {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            active: Mutex::new(None),
        }
    }

    /// Assemble the consolidation input from session state.
    pub async fn build_input(ctx: &PhaseContext) -> OrchestratorResult<ConsolidationInput> {
        let (
            objective,
            session_id,
            base_repo,
            config,
            tasks,
            execution_order,
            completed,
            task_to_instance,
            synthesis,
            revision,
            pre_branches,
            pre_contexts,
        ) = {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            let plan = up.plan.as_ref().ok_or_else(|| {
                OrchestratorError::ConsolidationFailed("no plan to consolidate".to_string())
            })?;
            (
                up.objective.clone(),
                session.id,
                session.base_repo.clone(),
                up.config.clone(),
                plan.tasks.clone(),
                plan.execution_order.clone(),
                up.completed_tasks.clone(),
                up.task_to_instance.clone(),
                up.synthesis.clone(),
                up.revision.clone(),
                up.group_consolidated_branches.clone(),
                up.group_consolidation_contexts.clone(),
            )
        };

        // Branch per completed task, via its instance.
        let mut task_branches = BTreeMap::new();
        {
            let session = ctx.session.read().await;
            for task_id in &completed {
                if let Some(instance) = task_to_instance
                    .get(task_id)
                    .and_then(|id| session.instance(*id))
                {
                    if !instance.branch.is_empty() {
                        task_branches.insert(task_id.clone(), instance.branch.clone());
                    }
                }
            }
        }

        let mut task_completions = BTreeMap::new();
        for task_id in &completed {
            if let Some(completion) = read_completion(ctx, task_id).await? {
                task_completions.insert(task_id.clone(), completion);
            }
        }

        Ok(ConsolidationInput {
            objective,
            session_id,
            base_repo,
            config,
            tasks,
            execution_order,
            task_branches,
            task_completions,
            synthesis,
            revision,
            pre_consolidated_branches: pre_branches,
            pre_consolidated_contexts: pre_contexts,
        })
    }

    /// Event sink forwarding consolidation events to the callbacks.
    fn event_sink(ctx: &PhaseContext) -> Arc<dyn Fn(EventRecord) + Send + Sync> {
        let callbacks = ctx.callbacks.clone();
        Arc::new(move |record: EventRecord| {
            let callbacks = callbacks
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .clone();
            callbacks.emit(&record);
        })
    }

    async fn attach_state(
        ctx: &PhaseContext,
        state: ConsolidationState,
    ) -> OrchestratorResult<()> {
        {
            let mut session = ctx.session.write().await;
            session.ultra_plan_mut()?.consolidation = Some(state);
        }
        ctx.persist().await
    }
}

#[async_trait]
impl PhaseExecutor for ConsolidationExecutor {
    fn phase(&self) -> UltraPlanPhase {
        UltraPlanPhase::Consolidating
    }

    fn can_execute(&self, session: &Session) -> bool {
        session.ultra_plan.as_ref().is_some_and(|up| {
            up.phase == UltraPlanPhase::Consolidating
                && up.execution_complete()
                && !up.completed_tasks.is_empty()
                && up
                    .consolidation
                    .as_ref()
                    .is_none_or(|c| c.phase != ConsolidationPhase::Complete)
        })
    }

    async fn execute(&self, ctx: &PhaseContext) -> OrchestratorResult<()> {
        ctx.validate().await?;
        if self.canceled.load(Ordering::SeqCst) || ctx.is_canceled() {
            return Err(OrchestratorError::Canceled);
        }

        let input = Self::build_input(ctx).await?;
        let consolidator = Arc::new(Consolidator::new(
            ctx.vcs.clone(),
            ctx.review.clone(),
            input,
            Self::event_sink(ctx),
        ));
        *self.active.lock().await = Some(consolidator.clone());

        // Attach the fresh state to the session at entry.
        Self::attach_state(ctx, consolidator.state().await).await?;

        let result = consolidator.run().await;
        let state = consolidator.state().await;
        Self::attach_state(ctx, state.clone()).await?;
        *self.active.lock().await = None;

        match result {
            Ok(final_state) if final_state.phase == ConsolidationPhase::Paused => {
                warn!("Consolidation paused on conflict; awaiting resolution");
                Ok(())
            }
            Ok(_) => {
                info!(prs = state.pr_urls.len(), "Consolidation finished");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn progress(&self) -> (usize, usize) {
        // Work units are groups; detailed progress comes from events.
        (0, 0)
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        if let Ok(active) = self.active.try_lock() {
            if let Some(consolidator) = active.as_ref() {
                consolidator.stop();
            }
        }
    }
}
