//! Plan-selection phase executor (multi-pass only).
//!
//! A plan-manager instance scores the candidate plans and either
//! selects one or asks for a merge. Its `<plan_decision>` block is
//! validated strictly; an invalid decision fails the phase.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::info;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{DecisionAction, InstanceStatus, Plan, Session, UltraPlanPhase};
use crate::services::events::UltraPlanEvent;
use crate::services::plan_parser;
use crate::services::prompts;

use super::planning::apply_plan;
use super::{PhaseContext, PhaseExecutor};

pub struct PlanSelectionExecutor {
    canceled: AtomicBool,
    done: AtomicUsize,
}

impl Default for PlanSelectionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanSelectionExecutor {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            done: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PhaseExecutor for PlanSelectionExecutor {
    fn phase(&self) -> UltraPlanPhase {
        UltraPlanPhase::PlanSelection
    }

    fn can_execute(&self, session: &Session) -> bool {
        session.ultra_plan.as_ref().is_some_and(|up| {
            up.phase == UltraPlanPhase::PlanSelection
                && up.config.multi_pass
                && up.plan.is_none()
                && up.candidate_plans.iter().any(Option::is_some)
        })
    }

    async fn execute(&self, ctx: &PhaseContext) -> OrchestratorResult<()> {
        ctx.validate().await?;
        if self.canceled.load(Ordering::SeqCst) || ctx.is_canceled() {
            return Err(OrchestratorError::Canceled);
        }

        let (objective, candidates) = {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            let candidates: Vec<Plan> = up.candidate_plans.iter().flatten().cloned().collect();
            (up.objective.clone(), candidates)
        };
        if candidates.is_empty() {
            return Err(OrchestratorError::InvalidPlanDecision(
                "no candidate plans to select from".to_string(),
            ));
        }

        ctx.emit(UltraPlanEvent::PlanSelectionStarted);

        let prompt = prompts::plan_manager_prompt(&objective, &candidates);
        let manager_id = ctx.spawn_instance(prompt, "Planning", None).await?;
        {
            let mut session = ctx.session.write().await;
            session.ultra_plan_mut()?.plan_manager_id = Some(manager_id);
        }
        ctx.persist().await?;

        let (status, output, _) = ctx.await_instance(manager_id).await?;
        if status != InstanceStatus::Completed {
            return Err(OrchestratorError::Agent(format!(
                "plan manager instance {manager_id} ended {status}"
            )));
        }

        let decision = plan_parser::parse_plan_decision(&output, candidates.len())?;
        ctx.emit(UltraPlanEvent::PlanSelected {
            action: match decision.action {
                DecisionAction::Select => "select".to_string(),
                DecisionAction::Merge => "merge".to_string(),
            },
            selected_index: decision.selected_index,
        });

        let chosen = match decision.action {
            DecisionAction::Select => {
                #[allow(clippy::cast_sign_loss)]
                let index = decision.selected_index as usize;
                info!(index, reasoning = %decision.reasoning, "Plan selected");
                candidates[index].clone()
            }
            DecisionAction::Merge => {
                info!(reasoning = %decision.reasoning, "Merging candidate plans");
                self.run_merge_planner(ctx, &objective, &candidates).await?
            }
        };

        apply_plan(ctx, chosen).await?;
        self.done.store(1, Ordering::SeqCst);
        Ok(())
    }

    fn progress(&self) -> (usize, usize) {
        (self.done.load(Ordering::SeqCst), 1)
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

impl PlanSelectionExecutor {
    /// One more planning coordinator, seeded with every candidate.
    async fn run_merge_planner(
        &self,
        ctx: &PhaseContext,
        objective: &str,
        candidates: &[Plan],
    ) -> OrchestratorResult<Plan> {
        let prompt = prompts::plan_merge_prompt(objective, candidates);
        let merge_id = ctx.spawn_instance(prompt, "Planning", None).await?;

        let (status, output, _) = ctx.await_instance(merge_id).await?;
        if status != InstanceStatus::Completed {
            return Err(OrchestratorError::Agent(format!(
                "merge planner instance {merge_id} ended {status}"
            )));
        }
        plan_parser::parse_plan(&output)
    }
}
