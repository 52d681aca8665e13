//! Artifacts exchanged with agents.
//!
//! Agents communicate results through two channels: tagged JSON blocks
//! in their output (`<plan>`, `<plan_decision>`) and a well-known
//! completion file written under their worktree. The completion file is
//! the source of truth for task success.

use serde::{Deserialize, Serialize};

/// Well-known completion artifact file name, relative to the worktree.
pub const COMPLETION_ARTIFACT_FILE: &str = ".claudio-completion.json";

/// Outcome reported in a completion artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionStatus {
    #[serde(alias = "complete", alias = "success")]
    Completed,
    #[serde(alias = "failure")]
    Failed,
}

/// Free-form notes: agents emit either a string or an array of strings.
/// Normalized to a joined string on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Notes {
    One(String),
    Many(Vec<String>),
}

impl Default for Notes {
    fn default() -> Self {
        Self::One(String::new())
    }
}

impl Notes {
    /// Normalize to a single newline-joined string.
    pub fn joined(&self) -> String {
        match self {
            Self::One(s) => s.clone(),
            Self::Many(lines) => lines.join("\n"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(s) => s.is_empty(),
            Self::Many(lines) => lines.iter().all(String::is_empty),
        }
    }
}

/// Completion artifact written by a task agent under its worktree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletion {
    pub task_id: String,
    pub status: CompletionStatus,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    /// New dependencies the task introduced (crates, services).
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub notes: Notes,
}

impl TaskCompletion {
    pub fn succeeded(&self) -> bool {
        self.status == CompletionStatus::Completed
    }
}

/// Action chosen by the plan manager over the candidate plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Select,
    Merge,
}

/// Per-candidate score in a plan decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanScore {
    pub strategy: String,
    pub score: f64,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub weaknesses: Vec<String>,
}

/// Decision artifact produced by the plan manager in a
/// `<plan_decision>` block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanDecision {
    pub action: DecisionAction,
    /// 0-based candidate index for `select`; exactly -1 for `merge`.
    pub selected_index: i64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub plan_scores: Vec<PlanScore>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_accept_string_or_array() {
        let one: TaskCompletion = serde_json::from_str(
            r#"{"task_id":"t1","status":"completed","summary":"done","notes":"single"}"#,
        )
        .unwrap();
        assert_eq!(one.notes.joined(), "single");

        let many: TaskCompletion = serde_json::from_str(
            r#"{"task_id":"t1","status":"completed","summary":"done","notes":["a","b"]}"#,
        )
        .unwrap();
        assert_eq!(many.notes.joined(), "a\nb");
    }

    #[test]
    fn completion_status_aliases() {
        let artifact: TaskCompletion =
            serde_json::from_str(r#"{"task_id":"t1","status":"complete","summary":""}"#).unwrap();
        assert!(artifact.succeeded());

        let failed: TaskCompletion =
            serde_json::from_str(r#"{"task_id":"t1","status":"failed","summary":""}"#).unwrap();
        assert!(!failed.succeeded());
    }

    #[test]
    fn missing_optional_fields_default() {
        let artifact: TaskCompletion =
            serde_json::from_str(r#"{"task_id":"t1","status":"completed"}"#).unwrap();
        assert!(artifact.files_modified.is_empty());
        assert!(artifact.notes.is_empty());
    }
}
