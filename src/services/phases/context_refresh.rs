//! Context-refresh phase executor.
//!
//! Pass-through for fresh sessions. For resumed sessions it reconciles
//! persisted instances with the agent backend: any instance whose
//! process is gone is marked interrupted, and the session is stamped
//! recovered.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{InstanceStatus, RecoveryState, Session, UltraPlanPhase};

use super::{PhaseContext, PhaseExecutor};

pub struct ContextRefreshExecutor {
    canceled: AtomicBool,
    reconciled: AtomicUsize,
}

impl Default for ContextRefreshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextRefreshExecutor {
    pub fn new() -> Self {
        Self {
            canceled: AtomicBool::new(false),
            reconciled: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PhaseExecutor for ContextRefreshExecutor {
    fn phase(&self) -> UltraPlanPhase {
        UltraPlanPhase::ContextRefresh
    }

    fn can_execute(&self, session: &Session) -> bool {
        session
            .ultra_plan
            .as_ref()
            .is_some_and(|up| up.phase == UltraPlanPhase::ContextRefresh && up.plan.is_some())
    }

    async fn execute(&self, ctx: &PhaseContext) -> OrchestratorResult<()> {
        ctx.validate().await?;
        if self.canceled.load(Ordering::SeqCst) || ctx.is_canceled() {
            return Err(OrchestratorError::Canceled);
        }

        let needs_recovery = {
            let session = ctx.session.read().await;
            session.needs_recovery() || session.recovery_state == RecoveryState::Interrupted
        };
        if !needs_recovery {
            return Ok(());
        }

        // Reconcile in-flight instances against the backend. Poll each
        // one; an unreachable or dead process means the instance was
        // interrupted by the previous shutdown.
        let in_flight: Vec<_> = {
            let session = ctx.session.read().await;
            session
                .instances
                .iter()
                .filter(|i| {
                    matches!(
                        i.status,
                        InstanceStatus::Working | InstanceStatus::WaitingInput
                    )
                })
                .cloned()
                .collect()
        };

        let mut interrupted = 0usize;
        for instance in in_flight {
            let alive = match self.poll_alive(ctx, &instance).await {
                Ok(alive) => alive,
                Err(e) => {
                    warn!(instance_id = %instance.id, error = %e, "Poll failed during refresh, treating as gone");
                    false
                }
            };
            if !alive {
                let mut session = ctx.session.write().await;
                if let Some(found) = session.instance_mut(instance.id) {
                    found.status = InstanceStatus::Interrupted;
                    found.interrupted_at = Some(chrono::Utc::now());
                    interrupted += 1;
                }
            }
        }

        {
            let mut session = ctx.session.write().await;
            if interrupted > 0 && session.recovery_state == RecoveryState::None {
                session.recovery_state = RecoveryState::Interrupted;
                session.interrupted_at = Some(chrono::Utc::now());
            }
            session.mark_recovered();
        }
        ctx.persist().await?;

        self.reconciled.store(interrupted, Ordering::SeqCst);
        info!(interrupted, "Context refresh reconciled session");
        Ok(())
    }

    fn progress(&self) -> (usize, usize) {
        let n = self.reconciled.load(Ordering::SeqCst);
        (n, n)
    }

    fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

impl ContextRefreshExecutor {
    async fn poll_alive(
        &self,
        ctx: &PhaseContext,
        instance: &crate::domain::models::Instance,
    ) -> OrchestratorResult<bool> {
        let status = ctx.agent.poll_status(instance).await?;
        Ok(status.is_in_flight())
    }
}
