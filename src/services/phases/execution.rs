//! Execution phase executor.
//!
//! The scheduling loop: release ready tasks up to the fan-out cap,
//! poll running instances, classify finished tasks by their completion
//! artifact, advance groups, and gate on partial group failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    GroupDecision, InstanceStatus, Session, TaskCompletion, UltraPlanPhase,
};
use crate::services::events::UltraPlanEvent;
use crate::services::group_tracker::GroupTracker;
use crate::services::instance_registry::InstanceRegistry;
use crate::services::prompts;
use crate::services::scheduler::TaskScheduler;

use super::{PhaseContext, PhaseExecutor};

/// Per-instance budget bookkeeping for the poll loop. The tail is
/// bounded by the agent port, so keeping the previous one is O(1).
struct InstanceTrack {
    started: Instant,
    last_tail: String,
    last_change: Instant,
}

pub struct ExecutionExecutor {
    canceled: AtomicBool,
    completed: AtomicUsize,
    total: AtomicUsize,
}

impl Default for ExecutionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionExecutor {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PhaseExecutor for ExecutionExecutor {
    fn phase(&self) -> UltraPlanPhase {
        UltraPlanPhase::Executing
    }

    fn can_execute(&self, session: &Session) -> bool {
        session
            .ultra_plan
            .as_ref()
            .is_some_and(|up| up.phase == UltraPlanPhase::Executing && up.plan.is_some())
    }

    async fn execute(&self, ctx: &PhaseContext) -> OrchestratorResult<()> {
        ctx.validate().await?;
        let scheduler = TaskScheduler::new();
        let tracker = GroupTracker::new();
        let registry = InstanceRegistry::new();
        let mut tracks: HashMap<Uuid, InstanceTrack> = HashMap::new();

        {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            self.total.store(
                up.plan.as_ref().map_or(0, |p| p.tasks.len()),
                Ordering::SeqCst,
            );
            self.completed
                .store(up.completed_tasks.len() + up.failed_tasks.len(), Ordering::SeqCst);
        }

        loop {
            if self.canceled.load(Ordering::SeqCst) || ctx.is_canceled() {
                return Err(OrchestratorError::Canceled);
            }

            let (awaiting, complete) = {
                let session = ctx.session.read().await;
                let up = session.ultra_plan()?;
                (up.awaiting_decision(), up.execution_complete())
            };
            if awaiting {
                // Gated on an operator decision; the coordinator resumes
                // this executor after the decision is cleared.
                return Ok(());
            }
            if complete {
                info!("Execution phase complete");
                return Ok(());
            }

            self.release_ready_tasks(ctx, &scheduler, &mut tracks).await?;
            let finished = self.poll_running(ctx, &registry, &mut tracks).await?;
            let blocked = self.fail_blocked_tasks(ctx).await?;

            if finished > 0 || blocked > 0 {
                self.after_task_outcomes(ctx, &tracker).await?;
            }

            sleep(ctx.timing.poll_interval).await;
        }
    }

    fn progress(&self) -> (usize, usize) {
        (
            self.completed.load(Ordering::SeqCst),
            self.total.load(Ordering::SeqCst),
        )
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

impl ExecutionExecutor {
    /// Start instances for ready tasks, up to the remaining fan-out.
    async fn release_ready_tasks(
        &self,
        ctx: &PhaseContext,
        scheduler: &TaskScheduler,
        tracks: &mut HashMap<Uuid, InstanceTrack>,
    ) -> OrchestratorResult<()> {
        let (ready, capacity, group) = {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            let ready = scheduler.ready_tasks(&session, up);

            let in_flight = up
                .task_to_instance
                .values()
                .filter_map(|id| session.instance(*id))
                .filter(|i| i.status.is_in_flight())
                .count();
            let capacity = if up.config.max_parallel == 0 {
                usize::MAX
            } else {
                up.config.max_parallel.saturating_sub(in_flight)
            };
            (ready, capacity, up.current_group)
        };

        for task_id in ready.into_iter().take(capacity) {
            let prompt = self.build_task_prompt(ctx, &task_id).await?;
            let bucket = GroupTracker::group_label(group);
            let instance_id = ctx.spawn_instance(prompt, &bucket, None).await?;

            {
                let mut session = ctx.session.write().await;
                session
                    .ultra_plan_mut()?
                    .task_to_instance
                    .insert(task_id.clone(), instance_id);
            }
            ctx.persist().await?;

            tracks.insert(
                instance_id,
                InstanceTrack {
                    started: Instant::now(),
                    last_tail: String::new(),
                    last_change: Instant::now(),
                },
            );
            debug!(task_id = %task_id, instance_id = %instance_id, "Task started");
            ctx.emit(UltraPlanEvent::TaskStarted {
                task_id,
                instance_id,
            });
        }
        Ok(())
    }

    /// Task prompt with aggregated context from completed dependencies.
    async fn build_task_prompt(
        &self,
        ctx: &PhaseContext,
        task_id: &str,
    ) -> OrchestratorResult<String> {
        let (objective, task, dep_tasks) = {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            let plan = up
                .plan
                .as_ref()
                .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
            let task = plan
                .task(task_id)
                .cloned()
                .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
            let dep_tasks: Vec<_> = task
                .depends_on
                .iter()
                .filter_map(|dep| plan.task(dep).cloned())
                .collect();
            (up.objective.clone(), task, dep_tasks)
        };

        let mut completions = Vec::new();
        for dep in &dep_tasks {
            if let Some(completion) = read_completion(ctx, &dep.id).await? {
                completions.push((dep, completion));
            }
        }
        let pairs: Vec<(&_, &_)> = completions.iter().map(|(t, c)| (*t, c)).collect();
        let context = prompts::dependency_context(&pairs);
        Ok(prompts::task_prompt(&objective, &task, &context))
    }

    /// Poll every tracked instance once; apply transitions and classify
    /// terminal outcomes. Returns how many tasks finished this round.
    async fn poll_running(
        &self,
        ctx: &PhaseContext,
        registry: &InstanceRegistry,
        tracks: &mut HashMap<Uuid, InstanceTrack>,
    ) -> OrchestratorResult<usize> {
        let running: Vec<(String, Uuid)> = {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            up.task_to_instance
                .iter()
                .filter(|(task_id, _)| !up.is_task_done(task_id))
                .map(|(task_id, id)| (task_id.clone(), *id))
                .filter(|(_, id)| {
                    session
                        .instance(*id)
                        .is_some_and(|i| i.status.is_in_flight())
                })
                .collect()
        };

        let mut finished = 0usize;
        for (task_id, instance_id) in running {
            let snapshot = {
                let session = ctx.session.read().await;
                session
                    .instance(instance_id)
                    .cloned()
                    .ok_or(OrchestratorError::InstanceNotFound(instance_id))?
            };

            let mut status = ctx.agent.poll_status(&snapshot).await?;

            // Budget enforcement for non-terminal instances. An
            // unchanged output tail means the agent produced nothing
            // new since the last tick.
            if !status.is_terminal() {
                let track = tracks.entry(instance_id).or_insert_with(|| InstanceTrack {
                    started: Instant::now(),
                    last_tail: String::new(),
                    last_change: Instant::now(),
                });
                let tail = ctx
                    .agent
                    .read_output_tail(&snapshot)
                    .await
                    .unwrap_or_else(|_| track.last_tail.clone());
                if tail != track.last_tail {
                    track.last_tail = tail;
                    track.last_change = Instant::now();
                }

                if track.started.elapsed() >= ctx.timing.instance_timeout {
                    warn!(task_id = %task_id, instance_id = %instance_id, "Instance exceeded runtime budget");
                    ctx.agent.stop_instance(&snapshot).await?;
                    status = InstanceStatus::Timeout;
                } else if track.last_change.elapsed() >= ctx.timing.stall_timeout {
                    warn!(task_id = %task_id, instance_id = %instance_id, "Instance output stalled");
                    ctx.agent.stop_instance(&snapshot).await?;
                    status = InstanceStatus::Stuck;
                }
            }

            if status != snapshot.status {
                let mut session = ctx.session.write().await;
                registry.transition(&mut session, instance_id, status)?;
                drop(session);
                ctx.persist().await?;
            }

            if status.is_terminal() {
                tracks.remove(&instance_id);
                let artifact = ctx.agent.read_completion_artifact(&snapshot).await?;
                self.record_outcome(ctx, &task_id, status, artifact).await?;
                finished += 1;
            }
        }
        Ok(finished)
    }

    /// Fail tasks that can never run because a dependency failed.
    /// Without this, a group with an operator-accepted failure would
    /// never finish. Returns how many tasks were failed as blocked.
    async fn fail_blocked_tasks(&self, ctx: &PhaseContext) -> OrchestratorResult<usize> {
        let blocked: Vec<(String, Vec<String>)> = {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            if up.awaiting_decision() {
                return Ok(0);
            }
            let Some(plan) = up.plan.as_ref() else {
                return Ok(0);
            };
            let Some(layer) = plan.execution_order.get(up.current_group) else {
                return Ok(0);
            };

            let any_in_flight = layer.iter().any(|task_id| {
                up.task_to_instance
                    .get(task_id)
                    .and_then(|id| session.instance(*id))
                    .is_some_and(|i| i.status.is_in_flight())
            });
            if any_in_flight {
                return Ok(0);
            }

            layer
                .iter()
                .filter(|task_id| !up.is_task_done(task_id))
                .filter_map(|task_id| {
                    let failed_deps: Vec<String> = plan
                        .task(task_id)?
                        .depends_on
                        .iter()
                        .filter(|dep| up.failed_tasks.contains(*dep))
                        .cloned()
                        .collect();
                    if failed_deps.is_empty() {
                        None
                    } else {
                        Some((task_id.clone(), failed_deps))
                    }
                })
                .collect()
        };

        for (task_id, failed_deps) in &blocked {
            warn!(task_id = %task_id, deps = ?failed_deps, "Task blocked by failed dependencies");
            ctx.emit(UltraPlanEvent::TaskBlocked {
                task_id: task_id.clone(),
                missing_dependencies: failed_deps.clone(),
            });
            {
                let mut session = ctx.session.write().await;
                session.ultra_plan_mut()?.mark_task_failed(task_id)?;
            }
        }
        if !blocked.is_empty() {
            ctx.persist().await?;
        }
        Ok(blocked.len())
    }

    /// Classify a finished task by its completion artifact: the artifact
    /// is the source of truth, not the exit status.
    async fn record_outcome(
        &self,
        ctx: &PhaseContext,
        task_id: &str,
        status: InstanceStatus,
        artifact: Option<TaskCompletion>,
    ) -> OrchestratorResult<()> {
        let succeeded = artifact.as_ref().is_some_and(TaskCompletion::succeeded);

        {
            let mut session = ctx.session.write().await;
            let up = session.ultra_plan_mut()?;
            if succeeded {
                up.mark_task_completed(task_id)?;
            } else {
                up.mark_task_failed(task_id)?;
            }
        }
        ctx.persist().await?;

        if succeeded {
            info!(task_id = %task_id, "Task completed");
            ctx.emit(UltraPlanEvent::TaskComplete {
                task_id: task_id.to_string(),
            });
            let hook = ctx
                .callbacks
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .on_task_complete
                .clone();
            if let Some(hook) = hook {
                hook(task_id);
            }
        } else {
            let error = artifact
                .as_ref()
                .map(|a| a.summary.clone())
                .or_else(|| Some(format!("instance ended {status}")));
            warn!(task_id = %task_id, status = %status, "Task failed");
            ctx.emit(UltraPlanEvent::TaskFailed {
                task_id: task_id.to_string(),
                error,
            });
        }

        let (done, total) = {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            (
                up.completed_tasks.len() + up.failed_tasks.len(),
                up.plan.as_ref().map_or(0, |p| p.tasks.len()),
            )
        };
        self.completed.store(done, Ordering::SeqCst);
        let hook = ctx
            .callbacks
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .on_progress
            .clone();
        if let Some(hook) = hook {
            hook(done, total);
        }
        Ok(())
    }

    /// Group bookkeeping after one or more tasks finished: advance the
    /// group if done, and raise the decision gate on partial failure.
    async fn after_task_outcomes(
        &self,
        ctx: &PhaseContext,
        tracker: &GroupTracker,
    ) -> OrchestratorResult<()> {
        let decision = {
            let mut session = ctx.session.write().await;
            let up = session.ultra_plan_mut()?;

            if !tracker.is_current_group_done(up) {
                return Ok(());
            }

            let layer: Vec<String> = up
                .plan
                .as_ref()
                .and_then(|p| p.execution_order.get(up.current_group))
                .cloned()
                .unwrap_or_default();
            let succeeded: Vec<String> = layer
                .iter()
                .filter(|t| up.completed_tasks.contains(*t))
                .cloned()
                .collect();
            let failed: Vec<String> = layer
                .iter()
                .filter(|t| up.failed_tasks.contains(*t))
                .cloned()
                .collect();

            let (advanced, previous) = tracker.advance_if_done(up);
            if !advanced {
                return Ok(());
            }

            let partial = !succeeded.is_empty() && !failed.is_empty();
            if partial {
                up.group_decision = Some(GroupDecision {
                    group_index: previous,
                    succeeded_tasks: succeeded.clone(),
                    failed_tasks: failed.clone(),
                    awaiting: true,
                });
            }
            Some((previous, succeeded, failed, partial))
        };

        if let Some((group_index, succeeded, failed, partial)) = decision {
            ctx.persist().await?;
            ctx.emit(UltraPlanEvent::GroupComplete {
                group_index,
                succeeded: succeeded.len(),
                failed: failed.len(),
            });

            if partial {
                warn!(
                    group_index,
                    succeeded = succeeded.len(),
                    failed = failed.len(),
                    "Partial group failure, awaiting operator decision"
                );
                ctx.emit(UltraPlanEvent::GroupDecisionRequired {
                    group_index,
                    succeeded_tasks: succeeded.clone(),
                    failed_tasks: failed.clone(),
                });
                let hook = ctx
                    .callbacks
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .on_decision_required
                    .clone();
                if let Some(hook) = hook {
                    let session = ctx.session.read().await;
                    if let Some(d) = session.ultra_plan()?.group_decision.as_ref() {
                        hook(d);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Read the completion artifact for a task via its instance.
pub(crate) async fn read_completion(
    ctx: &PhaseContext,
    task_id: &str,
) -> OrchestratorResult<Option<TaskCompletion>> {
    let snapshot = {
        let session = ctx.session.read().await;
        let up = session.ultra_plan()?;
        up.task_to_instance
            .get(task_id)
            .and_then(|id| session.instance(*id))
            .cloned()
    };
    match snapshot {
        Some(instance) => ctx.agent.read_completion_artifact(&instance).await,
        None => Ok(None),
    }
}
