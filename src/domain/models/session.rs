//! Session domain model.
//!
//! A session is the process-wide document for one orchestrator
//! invocation: the instances it owns, the optional UltraPlan run, and
//! recovery metadata. It is persisted as JSON under
//! `{base_repo}/.claudio/session.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::instance::{Instance, InstanceStatus};
use super::ultraplan::UltraPlanSession;
use crate::domain::errors::{OrchestratorError, OrchestratorResult};

/// Recovery state of a session across process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    None,
    Interrupted,
    Recovered,
}

impl Default for RecoveryState {
    fn default() -> Self {
        Self::None
    }
}

/// A grouping node for instances, used to bucket them under
/// "Planning", "Group N", "Synthesis", "Revision", "Consolidation".
///
/// Trees are kept acyclic by referencing parents by ID rather than by
/// pointer; children are found by scanning for matching `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceGroup {
    pub id: Uuid,
    pub label: String,
    /// Session type this bucket belongs to (e.g. `ultraplan`).
    pub session_type: String,
    pub objective: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<Uuid>,
    /// Leaf payload: the instances placed in this bucket.
    #[serde(default)]
    pub instance_ids: Vec<Uuid>,
}

impl InstanceGroup {
    pub fn new(label: impl Into<String>, session_type: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            session_type: session_type.into(),
            objective: objective.into(),
            parent_id: None,
            instance_ids: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }
}

/// Process-wide session document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub name: String,
    pub base_repo: PathBuf,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ultra_plan: Option<UltraPlanSession>,
    #[serde(default)]
    pub groups: Vec<InstanceGroup>,
    #[serde(default)]
    pub recovery_state: RecoveryState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub recovery_attempt: u32,
    #[serde(default)]
    pub clean_shutdown: bool,
}

impl Session {
    pub fn new(name: impl Into<String>, base_repo: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            base_repo: base_repo.into(),
            created: Utc::now(),
            instances: Vec::new(),
            ultra_plan: None,
            groups: Vec::new(),
            recovery_state: RecoveryState::None,
            interrupted_at: None,
            recovered_at: None,
            recovery_attempt: 0,
            clean_shutdown: false,
        }
    }

    /// Short form of the session ID, used in branch names.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }

    /// The orchestrator's state directory inside the base repository.
    pub fn claudio_dir(&self) -> PathBuf {
        self.base_repo.join(".claudio")
    }

    pub fn instance(&self, id: Uuid) -> Option<&Instance> {
        self.instances.iter().find(|i| i.id == id)
    }

    pub fn instance_mut(&mut self, id: Uuid) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    /// Register a new instance. Instance IDs must be unique.
    pub fn add_instance(&mut self, instance: Instance) -> OrchestratorResult<Uuid> {
        if self.instance(instance.id).is_some() {
            return Err(OrchestratorError::Persistence(format!(
                "duplicate instance id {}",
                instance.id
            )));
        }
        let id = instance.id;
        self.instances.push(instance);
        Ok(id)
    }

    /// Attach an UltraPlan run. At most one may exist per session.
    pub fn attach_ultra_plan(&mut self, up: UltraPlanSession) -> OrchestratorResult<()> {
        if self.ultra_plan.is_some() {
            return Err(OrchestratorError::Persistence(format!(
                "session {} already has an ultraplan",
                self.id
            )));
        }
        self.ultra_plan = Some(up);
        Ok(())
    }

    pub fn ultra_plan(&self) -> OrchestratorResult<&UltraPlanSession> {
        self.ultra_plan
            .as_ref()
            .ok_or(OrchestratorError::UltraPlanMissing(self.id))
    }

    pub fn ultra_plan_mut(&mut self) -> OrchestratorResult<&mut UltraPlanSession> {
        let id = self.id;
        self.ultra_plan
            .as_mut()
            .ok_or(OrchestratorError::UltraPlanMissing(id))
    }

    /// Instances that are not in a terminal state.
    pub fn non_terminal_instances(&self) -> Vec<&Instance> {
        self.instances
            .iter()
            .filter(|i| !i.status.is_terminal())
            .collect()
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Whether the previous process exited uncleanly with active agents.
    pub fn needs_recovery(&self) -> bool {
        !self.clean_shutdown
            && self.instances.iter().any(|i| {
                matches!(
                    i.status,
                    InstanceStatus::Working | InstanceStatus::WaitingInput
                )
            })
    }

    /// Mark every active instance as interrupted. Returns how many were.
    pub fn mark_instances_interrupted(&mut self) -> usize {
        let now = Utc::now();
        let mut count = 0;
        for instance in &mut self.instances {
            if matches!(
                instance.status,
                InstanceStatus::Working | InstanceStatus::WaitingInput
            ) {
                instance.status = InstanceStatus::Interrupted;
                instance.interrupted_at = Some(now);
                count += 1;
            }
        }
        if count > 0 {
            self.recovery_state = RecoveryState::Interrupted;
            self.interrupted_at = Some(now);
            self.recovery_attempt += 1;
        }
        count
    }

    pub fn mark_recovered(&mut self) {
        self.recovery_state = RecoveryState::Recovered;
        self.recovered_at = Some(Utc::now());
    }

    /// Interrupted instances that carry a resume token.
    pub fn resumable_instances(&self) -> Vec<&Instance> {
        self.instances
            .iter()
            .filter(|i| i.status == InstanceStatus::Interrupted && i.resume_token.is_some())
            .collect()
    }

    // ------------------------------------------------------------------
    // Instance groups
    // ------------------------------------------------------------------

    pub fn group(&self, id: Uuid) -> Option<&InstanceGroup> {
        self.groups.iter().find(|g| g.id == id)
    }

    pub fn group_by_label(&self, label: &str) -> Option<&InstanceGroup> {
        self.groups.iter().find(|g| g.label == label)
    }

    pub fn child_groups(&self, parent_id: Uuid) -> Vec<&InstanceGroup> {
        self.groups
            .iter()
            .filter(|g| g.parent_id == Some(parent_id))
            .collect()
    }

    /// Place an instance in the named bucket, creating it (and the root
    /// bucket) on first use.
    pub fn place_instance(&mut self, label: &str, objective: &str, instance_id: Uuid) {
        let root_id = match self.groups.iter().find(|g| g.parent_id.is_none()) {
            Some(root) => root.id,
            None => {
                let root = InstanceGroup::new(self.name.clone(), "ultraplan", objective);
                let id = root.id;
                self.groups.push(root);
                id
            }
        };

        let bucket = self.groups.iter_mut().find(|g| g.label == label);
        match bucket {
            Some(bucket) => bucket.instance_ids.push(instance_id),
            None => {
                let mut bucket =
                    InstanceGroup::new(label, "ultraplan", objective).with_parent(root_id);
                bucket.instance_ids.push(instance_id);
                self.groups.push(bucket);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn instance(status: InstanceStatus) -> Instance {
        let mut inst = Instance::new(
            PathBuf::from("/tmp/wt"),
            "claudio/task/abc".to_string(),
            "do the work".to_string(),
        );
        inst.status = status;
        inst
    }

    #[test]
    fn duplicate_instance_ids_rejected() {
        let mut session = Session::new("test", "/repo");
        let inst = instance(InstanceStatus::Pending);
        let dup = inst.clone();
        session.add_instance(inst).unwrap();
        assert!(session.add_instance(dup).is_err());
    }

    #[test]
    fn at_most_one_ultraplan() {
        use crate::domain::models::ultraplan::{UltraPlanConfig, UltraPlanSession};
        let mut session = Session::new("test", "/repo");
        session
            .attach_ultra_plan(UltraPlanSession::new("obj", UltraPlanConfig::default()))
            .unwrap();
        assert!(session
            .attach_ultra_plan(UltraPlanSession::new("obj2", UltraPlanConfig::default()))
            .is_err());
    }

    #[test]
    fn recovery_detects_unclean_shutdown_with_active_instances() {
        let mut session = Session::new("test", "/repo");
        session.instances.push(instance(InstanceStatus::Working));
        session.instances.push(instance(InstanceStatus::Completed));
        assert!(session.needs_recovery());

        session.clean_shutdown = true;
        assert!(!session.needs_recovery());
    }

    #[test]
    fn mark_interrupted_touches_only_active_instances() {
        let mut session = Session::new("test", "/repo");
        session.instances.push(instance(InstanceStatus::Working));
        session
            .instances
            .push(instance(InstanceStatus::WaitingInput));
        session.instances.push(instance(InstanceStatus::Completed));

        let count = session.mark_instances_interrupted();
        assert_eq!(count, 2);
        assert_eq!(session.recovery_state, RecoveryState::Interrupted);
        assert!(session.interrupted_at.is_some());
        assert_eq!(session.recovery_attempt, 1);
        assert_eq!(
            session.instances[2].status,
            InstanceStatus::Completed,
            "terminal instances are untouched"
        );
    }

    #[test]
    fn resumable_requires_token() {
        let mut session = Session::new("test", "/repo");
        let mut with_token = instance(InstanceStatus::Interrupted);
        with_token.resume_token = Some("sess-1".to_string());
        let token_id = with_token.id;
        session.instances.push(with_token);
        session.instances.push(instance(InstanceStatus::Interrupted));

        let resumable = session.resumable_instances();
        assert_eq!(resumable.len(), 1);
        assert_eq!(resumable[0].id, token_id);
    }

    #[test]
    fn place_instance_builds_bucket_tree() {
        let mut session = Session::new("test", "/repo");
        let id = Uuid::new_v4();
        session.place_instance("Group 1", "obj", id);
        session.place_instance("Group 1", "obj", Uuid::new_v4());
        session.place_instance("Synthesis", "obj", Uuid::new_v4());

        let root = session
            .groups
            .iter()
            .find(|g| g.parent_id.is_none())
            .unwrap();
        assert_eq!(session.child_groups(root.id).len(), 2);
        let bucket = session.group_by_label("Group 1").unwrap();
        assert_eq!(bucket.instance_ids.len(), 2);
        assert!(bucket.instance_ids.contains(&id));
    }
}
