//! UltraPlan session model: the phase-structured state of one
//! plan-execute-consolidate run over a single objective.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use super::consolidation::ConsolidationState;
use super::plan::Plan;
use crate::domain::errors::{OrchestratorError, OrchestratorResult};

/// Top-level lifecycle phase of an UltraPlan run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UltraPlanPhase {
    Planning,
    PlanSelection,
    ContextRefresh,
    Executing,
    Synthesis,
    Revision,
    Consolidating,
    Complete,
    Failed,
}

impl Default for UltraPlanPhase {
    fn default() -> Self {
        Self::Planning
    }
}

impl UltraPlanPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planning => "planning",
            Self::PlanSelection => "plan_selection",
            Self::ContextRefresh => "context_refresh",
            Self::Executing => "executing",
            Self::Synthesis => "synthesis",
            Self::Revision => "revision",
            Self::Consolidating => "consolidating",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for UltraPlanPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How consolidated branches are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationMode {
    /// One branch per execution group, each based on the previous one;
    /// one review request per branch.
    Stacked,
    /// One branch off main holding every task's commits in execution order.
    Single,
}

impl Default for ConsolidationMode {
    fn default() -> Self {
        Self::Stacked
    }
}

impl ConsolidationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stacked => "stacked",
            Self::Single => "single",
        }
    }
}

fn default_branch_prefix() -> String {
    "claudio".to_string()
}

fn default_true() -> bool {
    true
}

/// Configuration consumed by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UltraPlanConfig {
    /// Prefix for generated branch names. Defaults to `claudio`.
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Include the 8-char session ID in generated branch names.
    #[serde(default = "default_true")]
    pub include_id: bool,
    /// Run three planners and a plan manager instead of one planner.
    #[serde(default)]
    pub multi_pass: bool,
    /// Max concurrent task instances. 0 means unbounded.
    #[serde(default)]
    pub max_parallel: usize,
    #[serde(default)]
    pub consolidation_mode: ConsolidationMode,
    #[serde(default)]
    pub create_draft_prs: bool,
    #[serde(default)]
    pub pr_labels: Vec<String>,
}

impl Default for UltraPlanConfig {
    fn default() -> Self {
        Self {
            branch_prefix: default_branch_prefix(),
            include_id: true,
            multi_pass: false,
            max_parallel: 0,
            consolidation_mode: ConsolidationMode::default(),
            create_draft_prs: false,
            pr_labels: Vec::new(),
        }
    }
}

impl UltraPlanConfig {
    /// Effective branch prefix; the default applies when empty.
    pub fn effective_branch_prefix(&self) -> &str {
        if self.branch_prefix.is_empty() {
            "claudio"
        } else {
            &self.branch_prefix
        }
    }
}

/// Gate raised after a partial group failure. While `awaiting` is true
/// the scheduler releases no tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDecision {
    pub group_index: usize,
    pub succeeded_tasks: Vec<String>,
    pub failed_tasks: Vec<String>,
    pub awaiting: bool,
}

/// Operator's resolution of a [`GroupDecision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupDecisionChoice {
    /// Proceed despite the failed tasks.
    Continue,
    /// Abort the run.
    Abort,
    /// Re-run the failed tasks of the group.
    Revise,
}

/// Completion record of the synthesis phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRecord {
    pub integration_notes: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// Completion record of the revision phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRecord {
    pub notes: String,
    pub completed_at: chrono::DateTime<chrono::Utc>,
}

/// State of one UltraPlan run, nested in the session document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UltraPlanSession {
    pub objective: String,
    #[serde(default)]
    pub config: UltraPlanConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default)]
    pub phase: UltraPlanPhase,
    #[serde(default)]
    pub current_group: usize,
    #[serde(default)]
    pub completed_tasks: BTreeSet<String>,
    #[serde(default)]
    pub failed_tasks: BTreeSet<String>,
    /// Task ID -> instance executing (or having executed) it.
    #[serde(default)]
    pub task_to_instance: BTreeMap<String, Uuid>,
    /// Per-group consolidator instance IDs, by group index.
    #[serde(default)]
    pub group_consolidator_ids: Vec<Uuid>,
    /// Branches produced by per-group consolidators, by group index.
    #[serde(default)]
    pub group_consolidated_branches: Vec<String>,
    /// Aggregated context written by per-group consolidators.
    #[serde(default)]
    pub group_consolidation_contexts: Vec<String>,
    /// Multi-pass candidates, indexed by completion order.
    #[serde(default)]
    pub candidate_plans: Vec<Option<Plan>>,
    #[serde(default)]
    pub plan_coordinator_ids: Vec<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_manager_id: Option<Uuid>,
    /// Planner instance for the single-pass path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidation_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<SynthesisRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<RevisionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consolidation: Option<ConsolidationState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_decision: Option<GroupDecision>,
    /// Error recorded when the phase transitioned to `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UltraPlanSession {
    pub fn new(objective: impl Into<String>, config: UltraPlanConfig) -> Self {
        Self {
            objective: objective.into(),
            config,
            ..Self::default()
        }
    }

    /// Whether a task has reached a terminal outcome.
    pub fn is_task_done(&self, task_id: &str) -> bool {
        self.completed_tasks.contains(task_id) || self.failed_tasks.contains(task_id)
    }

    /// Mark a task completed. Completed and failed sets stay disjoint.
    pub fn mark_task_completed(&mut self, task_id: &str) -> OrchestratorResult<()> {
        if self.failed_tasks.contains(task_id) {
            return Err(OrchestratorError::PlanValidation(format!(
                "task {task_id} already marked failed"
            )));
        }
        self.completed_tasks.insert(task_id.to_string());
        Ok(())
    }

    /// Mark a task failed. Completed and failed sets stay disjoint.
    pub fn mark_task_failed(&mut self, task_id: &str) -> OrchestratorResult<()> {
        if self.completed_tasks.contains(task_id) {
            return Err(OrchestratorError::PlanValidation(format!(
                "task {task_id} already marked completed"
            )));
        }
        self.failed_tasks.insert(task_id.to_string());
        Ok(())
    }

    /// Whether the scheduler is gated on an operator decision.
    pub fn awaiting_decision(&self) -> bool {
        self.group_decision.as_ref().is_some_and(|d| d.awaiting)
    }

    /// Whether every execution layer has been finished.
    pub fn execution_complete(&self) -> bool {
        self.plan
            .as_ref()
            .is_some_and(|p| self.current_group >= p.execution_order.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completed_and_failed_stay_disjoint() {
        let mut up = UltraPlanSession::new("obj", UltraPlanConfig::default());
        up.mark_task_completed("t1").unwrap();
        assert!(up.mark_task_failed("t1").is_err());
        up.mark_task_failed("t2").unwrap();
        assert!(up.mark_task_completed("t2").is_err());
        assert!(up.is_task_done("t1"));
        assert!(up.is_task_done("t2"));
    }

    #[test]
    fn awaiting_decision_requires_flag() {
        let mut up = UltraPlanSession::new("obj", UltraPlanConfig::default());
        assert!(!up.awaiting_decision());
        up.group_decision = Some(GroupDecision {
            group_index: 0,
            succeeded_tasks: vec!["t1".to_string()],
            failed_tasks: vec!["t2".to_string()],
            awaiting: false,
        });
        assert!(!up.awaiting_decision());
        up.group_decision.as_mut().unwrap().awaiting = true;
        assert!(up.awaiting_decision());
    }

    #[test]
    fn empty_branch_prefix_falls_back_to_default() {
        let config = UltraPlanConfig {
            branch_prefix: String::new(),
            ..UltraPlanConfig::default()
        };
        assert_eq!(config.effective_branch_prefix(), "claudio");
    }

    #[test]
    fn phase_serde_is_snake_case() {
        let json = serde_json::to_string(&UltraPlanPhase::PlanSelection).unwrap();
        assert_eq!(json, "\"plan_selection\"");
        let json = serde_json::to_string(&UltraPlanPhase::ContextRefresh).unwrap();
        assert_eq!(json, "\"context_refresh\"");
    }
}
