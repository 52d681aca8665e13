//! Synthesis phase executor.
//!
//! One instance reviews the aggregate of all completed task artifacts
//! and produces an integration-note record.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{InstanceStatus, Session, SynthesisRecord, UltraPlanPhase};
use crate::services::prompts;

use super::execution::read_completion;
use super::{PhaseContext, PhaseExecutor};

pub struct SynthesisExecutor {
    canceled: AtomicBool,
    done: AtomicUsize,
}

impl Default for SynthesisExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SynthesisExecutor {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            done: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PhaseExecutor for SynthesisExecutor {
    fn phase(&self) -> UltraPlanPhase {
        UltraPlanPhase::Synthesis
    }

    fn can_execute(&self, session: &Session) -> bool {
        session.ultra_plan.as_ref().is_some_and(|up| {
            up.phase == UltraPlanPhase::Synthesis
                && up.execution_complete()
                && up.synthesis.is_none()
        })
    }

    async fn execute(&self, ctx: &PhaseContext) -> OrchestratorResult<()> {
        ctx.validate().await?;
        if self.canceled.load(Ordering::SeqCst) || ctx.is_canceled() {
            return Err(OrchestratorError::Canceled);
        }

        let (objective, completed_ids) = {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            (
                up.objective.clone(),
                up.completed_tasks.iter().cloned().collect::<Vec<_>>(),
            )
        };

        let mut completions = Vec::new();
        for task_id in &completed_ids {
            let task = {
                let session = ctx.session.read().await;
                session
                    .ultra_plan()?
                    .plan
                    .as_ref()
                    .and_then(|p| p.task(task_id))
                    .cloned()
            };
            let (Some(task), Some(completion)) = (task, read_completion(ctx, task_id).await?)
            else {
                continue;
            };
            completions.push((task, completion));
        }
        let pairs: Vec<(&_, &_)> = completions.iter().map(|(t, c)| (t, c)).collect();
        let prompt = prompts::synthesis_prompt(&objective, &pairs);

        let instance_id = ctx.spawn_instance(prompt, "Synthesis", None).await?;
        {
            let mut session = ctx.session.write().await;
            session.ultra_plan_mut()?.synthesis_id = Some(instance_id);
        }
        ctx.persist().await?;

        let (status, _, artifact) = ctx.await_instance(instance_id).await?;
        if status != InstanceStatus::Completed {
            return Err(OrchestratorError::Agent(format!(
                "synthesis instance {instance_id} ended {status}"
            )));
        }
        let artifact = artifact.ok_or_else(|| {
            OrchestratorError::Agent(format!(
                "synthesis instance {instance_id} wrote no completion artifact"
            ))
        })?;

        let mut integration_notes = artifact.summary.clone();
        if !artifact.notes.is_empty() {
            integration_notes.push('\n');
            integration_notes.push_str(&artifact.notes.joined());
        }
        let record = SynthesisRecord {
            integration_notes,
            recommendations: artifact.suggestions.clone(),
            completed_at: Utc::now(),
        };

        info!(
            recommendations = record.recommendations.len(),
            "Synthesis complete"
        );
        {
            let mut session = ctx.session.write().await;
            session.ultra_plan_mut()?.synthesis = Some(record);
        }
        ctx.persist().await?;
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
