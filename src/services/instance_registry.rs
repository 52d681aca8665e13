//! Instance registry: guarded mutation of the session's instance list.
//!
//! The session document owns the instances; this service enforces the
//! monotonic status transitions and keeps metrics bookkeeping in one
//! place.

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{Instance, InstanceStatus, Session};

#[derive(Debug, Clone, Default)]
pub struct InstanceRegistry;

impl InstanceRegistry {
    pub fn new() -> Self {
        Self
    }

    /// Register a new instance in the session.
    pub fn register(&self, session: &mut Session, instance: Instance) -> OrchestratorResult<Uuid> {
        debug!(instance_id = %instance.id, branch = %instance.branch, "Registering instance");
        session.add_instance(instance)
    }

    /// Apply a status transition, enforcing monotonicity. A transition
    /// to the current status is a no-op. Terminal transitions stamp
    /// `metrics.ended_at`.
    pub fn transition(
        &self,
        session: &mut Session,
        instance_id: Uuid,
        new_status: InstanceStatus,
    ) -> OrchestratorResult<()> {
        let instance = session
            .instance_mut(instance_id)
            .ok_or(OrchestratorError::InstanceNotFound(instance_id))?;

        if instance.status == new_status {
            return Ok(());
        }

        if !instance.status.can_transition_to(new_status) {
            warn!(
                instance_id = %instance_id,
                from = %instance.status,
                to = %new_status,
                "Rejected instance status transition"
            );
            return Err(OrchestratorError::InvalidStatusTransition {
                instance: instance_id,
                from: instance.status.as_str().to_string(),
                to: new_status.as_str().to_string(),
            });
        }

        debug!(instance_id = %instance_id, from = %instance.status, to = %new_status, "Instance transition");
        instance.status = new_status;
        if new_status == InstanceStatus::Working && instance.metrics.started_at.is_none() {
            instance.metrics.started_at = Some(Utc::now());
        }
        if new_status.is_terminal() {
            instance.metrics.ended_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Add to an instance's usage counters.
    pub fn record_usage(
        &self,
        session: &mut Session,
        instance_id: Uuid,
        tokens: u64,
        cost_usd: f64,
        api_calls: u64,
    ) -> OrchestratorResult<()> {
        let instance = session
            .instance_mut(instance_id)
            .ok_or(OrchestratorError::InstanceNotFound(instance_id))?;
        instance.metrics.tokens_used += tokens;
        instance.metrics.cost_usd += cost_usd;
        instance.metrics.api_calls += api_calls;
        Ok(())
    }

    /// Instances currently occupying a scheduling slot.
    pub fn in_flight<'a>(&self, session: &'a Session) -> Vec<&'a Instance> {
        session
            .instances
            .iter()
            .filter(|i| i.status.is_in_flight())
            .collect()
    }

    pub fn by_status<'a>(
        &self,
        session: &'a Session,
        status: InstanceStatus,
    ) -> Vec<&'a Instance> {
        session
            .instances
            .iter()
            .filter(|i| i.status == status)
            .collect()
    }
}
