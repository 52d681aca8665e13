//! Planning phase executor.
//!
//! Single-pass: one planning coordinator produces a `<plan>` artifact.
//! Multi-pass: three strategy-seeded coordinators produce candidates
//! for the plan-selection phase; candidates are indexed by completion
//! order.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{Plan, Session, UltraPlanPhase};
use crate::services::dependency_resolver::DependencyResolver;
use crate::services::events::UltraPlanEvent;
use crate::services::plan_parser;
use crate::services::prompts::{self, PlanStrategy};

use super::{PhaseContext, PhaseExecutor};

pub struct PlanningExecutor {
    canceled: AtomicBool,
    done: AtomicUsize,
    total: AtomicUsize,
}

impl Default for PlanningExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanningExecutor {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            done: AtomicUsize::new(0),
            total: AtomicUsize::new(1),
        }
    }

    async fn execute_single_pass(&self, ctx: &PhaseContext) -> OrchestratorResult<()> {
        let objective = {
            let session = ctx.session.read().await;
            session.ultra_plan()?.objective.clone()
        };

        let prompt = prompts::planning_prompt(&objective);
        let instance_id = ctx.spawn_instance(prompt, "Planning", None).await?;
        {
            let mut session = ctx.session.write().await;
            session.ultra_plan_mut()?.coordinator_id = Some(instance_id);
        }
        ctx.persist().await?;

        let (status, output, _artifact) = ctx.await_instance(instance_id).await?;
        if !matches!(status, crate::domain::models::InstanceStatus::Completed) {
            return Err(OrchestratorError::Agent(format!(
                "planning instance {instance_id} ended {status}"
            )));
        }

        let plan = plan_parser::parse_plan(&output)?;
        apply_plan(ctx, plan).await?;
        self.done.store(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_multi_pass(&self, ctx: &PhaseContext) -> OrchestratorResult<()> {
        let objective = {
            let session = ctx.session.read().await;
            session.ultra_plan()?.objective.clone()
        };
        self.total.store(PlanStrategy::ALL.len(), Ordering::SeqCst);

        // Spawn all three strategy planners up front, in strategy order.
        let mut planner_ids: Vec<Uuid> = Vec::with_capacity(PlanStrategy::ALL.len());
        for strategy in PlanStrategy::ALL {
            let prompt = prompts::planning_prompt_with_strategy(&objective, strategy);
            let id = ctx.spawn_instance(prompt, "Planning", None).await?;
            planner_ids.push(id);
        }
        {
            let mut session = ctx.session.write().await;
            let up = session.ultra_plan_mut()?;
            up.plan_coordinator_ids = planner_ids.clone();
            up.candidate_plans = Vec::new();
        }
        ctx.persist().await?;

        // Collect plans as the planners finish; candidate order is
        // completion order.
        let mut pending: FuturesUnordered<_> = planner_ids
            .iter()
            .map(|&id| async move { (id, ctx.await_instance(id).await) })
            .collect();

        while let Some((instance_id, result)) = pending.next().await {
            let candidate = match result {
                Ok((status, output, _))
                    if status == crate::domain::models::InstanceStatus::Completed =>
                {
                    match plan_parser::parse_plan(&output) {
                        Ok(plan) => Some(plan),
                        Err(e) => {
                            warn!(instance_id = %instance_id, error = %e, "Candidate plan unparseable");
                            None
                        }
                    }
                }
                Ok((status, _, _)) => {
                    warn!(instance_id = %instance_id, status = %status, "Planner did not complete");
                    None
                }
                Err(e) => return Err(e),
            };

            let index = {
                let mut session = ctx.session.write().await;
                let up = session.ultra_plan_mut()?;
                up.candidate_plans.push(candidate.clone());
                up.candidate_plans.len() - 1
            };
            ctx.persist().await?;
            self.done.fetch_add(1, Ordering::SeqCst);

            if let Some(plan) = candidate {
                ctx.emit(UltraPlanEvent::MultipassPlanGenerated {
                    index,
                    task_count: plan.tasks.len(),
                });
            }
        }

        let produced = {
            let session = ctx.session.read().await;
            session
                .ultra_plan()?
                .candidate_plans
                .iter()
                .filter(|c| c.is_some())
                .count()
        };
        if produced == 0 {
            return Err(OrchestratorError::PlanParse(
                "no planner produced a usable candidate plan".to_string(),
            ));
        }

        ctx.emit(UltraPlanEvent::AllPlansGenerated { count: produced });
        info!(candidates = produced, "Multi-pass planning finished");
        Ok(())
    }
}

#[async_trait]
impl PhaseExecutor for PlanningExecutor {
    fn phase(&self) -> UltraPlanPhase {
        UltraPlanPhase::Planning
    }

    fn can_execute(&self, session: &Session) -> bool {
        session
            .ultra_plan
            .as_ref()
            .is_some_and(|up| up.phase == UltraPlanPhase::Planning && up.plan.is_none())
    }

    async fn execute(&self, ctx: &PhaseContext) -> OrchestratorResult<()> {
        ctx.validate().await?;
        if self.canceled.load(Ordering::SeqCst) || ctx.is_canceled() {
            return Err(OrchestratorError::Canceled);
        }

        let multi_pass = {
            let session = ctx.session.read().await;
            session.ultra_plan()?.config.multi_pass
        };

        if multi_pass {
            self.execute_multi_pass(ctx).await
        } else {
            self.execute_single_pass(ctx).await
        }
    }

    fn progress(&self) -> (usize, usize) {
        (
            self.done.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

/// Validate a freshly parsed plan, derive its execution order, apply
/// the max-parallel width cap, install it on the session, and announce
/// it. Shared with the plan-selection executor.
pub(crate) async fn apply_plan(ctx: &PhaseContext, mut plan: Plan) -> OrchestratorResult<()> {
    let resolver = DependencyResolver::new();
    resolver.validate(&plan)?;
    plan.execution_order = resolver.compute_execution_order(&plan.tasks)?;

    let max_parallel = {
        let session = ctx.session.read().await;
        session.ultra_plan()?.config.max_parallel
    };
    plan.execution_order = resolver.cap_layer_width(plan.execution_order, max_parallel);

    let (task_count, group_count) = (plan.tasks.len(), plan.execution_order.len());
    {
        let mut session = ctx.session.write().await;
        session.ultra_plan_mut()?.plan = Some(plan.clone());
    }
    ctx.persist().await?;

    ctx.emit(UltraPlanEvent::PlanReady {
        task_count,
        group_count,
    });
    let hook = ctx
        .callbacks
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
        .on_plan_ready
        .clone();
    if let Some(hook) = hook {
        hook(&plan);
    }
    info!(tasks = task_count, groups = group_count, "Plan ready");
    Ok(())
}
