//! Revision phase executor.
//!
//! Runs only when synthesis produced recommendations. A single
//! instance applies them; its notes feed the consolidator as
//! additional aggregated context.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{InstanceStatus, RevisionRecord, Session, UltraPlanPhase};
use crate::services::prompts;

use super::{PhaseContext, PhaseExecutor};

pub struct RevisionExecutor {
    canceled: AtomicBool,
    done: AtomicUsize,
}

impl Default for RevisionExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl RevisionExecutor {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            done: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PhaseExecutor for RevisionExecutor {
    fn phase(&self) -> UltraPlanPhase {
        UltraPlanPhase::Revision
    }

    fn can_execute(&self, session: &Session) -> bool {
        session.ultra_plan.as_ref().is_some_and(|up| {
            up.phase == UltraPlanPhase::Revision
                && up
                    .synthesis
                    .as_ref()
                    .is_some_and(|s| !s.recommendations.is_empty())
                && up.revision.is_none()
        })
    }

    async fn execute(&self, ctx: &PhaseContext) -> OrchestratorResult<()> {
        ctx.validate().await?;
        if self.canceled.load(Ordering::SeqCst) || ctx.is_canceled() {
            return Err(OrchestratorError::Canceled);
        }

        let (objective, synthesis) = {
            let session = ctx.session.read().await;
            let up = session.ultra_plan()?;
            let synthesis = up.synthesis.clone().ok_or_else(|| {
                OrchestratorError::Agent("revision requires a synthesis record".to_string())
            })?;
            (up.objective.clone(), synthesis)
        };

        let prompt = prompts::revision_prompt(&objective, &synthesis);
        let instance_id = ctx.spawn_instance(prompt, "Revision", None).await?;
        {
            let mut session = ctx.session.write().await;
            session.ultra_plan_mut()?.revision_id = Some(instance_id);
        }
        ctx.persist().await?;

        let (status, _, artifact) = ctx.await_instance(instance_id).await?;
        if status != InstanceStatus::Completed {
            return Err(OrchestratorError::Agent(format!(
                "revision instance {instance_id} ended {status}"
            )));
        }

        let notes = artifact.map_or_else(String::new, |a| {
            let mut notes = a.summary;
            if !a.notes.is_empty() {
                notes.push('\n');
                notes.push_str(&a.notes.joined());
            }
            notes
        });

        info!("Revision complete");
        {
            let mut session = ctx.session.write().await;
            session.ultra_plan_mut()?.revision = Some(RevisionRecord {
                notes,
                completed_at: Utc::now(),
            });
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
