//! Agent instance domain model.
//!
//! An instance is one agent process bound to a worktree and branch,
//! executing a single prompt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Status of an agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    /// Created, process not yet launched.
    Pending,
    /// Agent process is running.
    Working,
    /// Agent is blocked on user input.
    WaitingInput,
    /// Agent was paused by the operator.
    Paused,
    /// Agent finished its work.
    Completed,
    /// Agent exited with an error.
    Error,
    /// Agent is creating a review request.
    CreatingPr,
    /// Agent produced no output within the stall window.
    Stuck,
    /// Agent exceeded its total runtime budget.
    Timeout,
    /// The orchestrator process exited while the agent was active.
    Interrupted,
}

impl Default for InstanceStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Working => "working",
            Self::WaitingInput => "waiting_input",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::CreatingPr => "creating_pr",
            Self::Stuck => "stuck",
            Self::Timeout => "timeout",
            Self::Interrupted => "interrupted",
        }
    }

    /// Terminal states. `Interrupted` is deliberately excluded: an
    /// interrupted instance may be resumed after recovery.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Timeout | Self::Stuck)
    }

    /// Whether the instance still occupies a scheduling slot.
    /// Interrupted instances do not: their process is gone, and context
    /// refresh owns reconciling them.
    pub fn is_in_flight(&self) -> bool {
        !self.is_terminal() && *self != Self::Interrupted
    }

    /// Valid transitions from this status. Transitions are monotonic:
    /// once terminal, an instance never changes again.
    pub fn valid_transitions(&self) -> &'static [InstanceStatus] {
        match self {
            Self::Pending => &[Self::Working, Self::Error, Self::Interrupted],
            Self::Working => &[
                Self::WaitingInput,
                Self::Paused,
                Self::Completed,
                Self::Error,
                Self::CreatingPr,
                Self::Stuck,
                Self::Timeout,
                Self::Interrupted,
            ],
            Self::WaitingInput => &[
                Self::Working,
                Self::Completed,
                Self::Error,
                Self::Timeout,
                Self::Interrupted,
            ],
            Self::Paused => &[Self::Working, Self::Error, Self::Interrupted],
            Self::CreatingPr => &[Self::Completed, Self::Error, Self::Timeout],
            Self::Interrupted => &[Self::Working, Self::Error],
            Self::Completed | Self::Error | Self::Stuck | Self::Timeout => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resource usage of an instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceMetrics {
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default)]
    pub api_calls: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl InstanceMetrics {
    pub fn duration_secs(&self) -> Option<i64> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds()),
            _ => None,
        }
    }
}

/// A running (or run) agent bound to a worktree and branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: Uuid,
    pub worktree_path: PathBuf,
    pub branch: String,
    /// The prompt the agent was launched with.
    pub prompt: String,
    #[serde(default)]
    pub status: InstanceStatus,
    /// OS process ID of the running agent, if launched.
    pub pid: Option<u32>,
    #[serde(default)]
    pub metrics: InstanceMetrics,
    /// Optional instance-level dependency list (task IDs).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<Vec<String>>,
    #[serde(default)]
    pub auto_start: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Backend token allowing the agent session to be resumed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interrupted_at: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(worktree_path: PathBuf, branch: String, prompt: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            worktree_path,
            branch,
            prompt,
            status: InstanceStatus::Pending,
            pid: None,
            metrics: InstanceMetrics::default(),
            dependencies: None,
            auto_start: false,
            display_name: None,
            resume_token: None,
            interrupted_at: None,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Short form of the instance ID for branch names and labels.
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_transitions() {
        for status in [
            InstanceStatus::Completed,
            InstanceStatus::Error,
            InstanceStatus::Stuck,
            InstanceStatus::Timeout,
        ] {
            assert!(status.is_terminal());
            assert!(status.valid_transitions().is_empty());
        }
    }

    #[test]
    fn interrupted_is_not_in_flight() {
        assert!(!InstanceStatus::Interrupted.is_terminal());
        assert!(!InstanceStatus::Interrupted.is_in_flight());
        assert!(InstanceStatus::Working.is_in_flight());
        assert!(InstanceStatus::WaitingInput.is_in_flight());
    }

    #[test]
    fn working_can_stall_or_time_out() {
        assert!(InstanceStatus::Working.can_transition_to(InstanceStatus::Stuck));
        assert!(InstanceStatus::Working.can_transition_to(InstanceStatus::Timeout));
        assert!(!InstanceStatus::Completed.can_transition_to(InstanceStatus::Working));
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&InstanceStatus::WaitingInput).unwrap();
        assert_eq!(json, "\"waiting_input\"");
        let json = serde_json::to_string(&InstanceStatus::CreatingPr).unwrap();
        assert_eq!(json, "\"creating_pr\"");
    }
}
