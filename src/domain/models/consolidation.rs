//! Consolidation state: the cherry-pick pipeline that folds per-task
//! branches into group branches and review requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::ultraplan::ConsolidationMode;

/// Phase of a consolidation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsolidationPhase {
    Idle,
    DetectingConflicts,
    CreatingBranches,
    MergingTasks,
    Pushing,
    CreatingPrs,
    Paused,
    Complete,
    Failed,
}

impl Default for ConsolidationPhase {
    fn default() -> Self {
        Self::Idle
    }
}

impl ConsolidationPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::DetectingConflicts => "detecting_conflicts",
            Self::CreatingBranches => "creating_branches",
            Self::MergingTasks => "merging_tasks",
            Self::Pushing => "pushing",
            Self::CreatingPrs => "creating_prs",
            Self::Paused => "paused",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for ConsolidationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of a cherry-pick conflict that paused the run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictInfo {
    /// Task whose branch conflicted.
    pub task_id: String,
    /// Branch being cherry-picked when the conflict occurred.
    pub source_branch: String,
    /// Conflicting files, as reported by the VCS.
    pub files: Vec<String>,
    /// Worktree where resolution happens.
    pub worktree_path: PathBuf,
    pub detected_at: DateTime<Utc>,
}

/// Outcome of assembling one group branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMergeResult {
    pub group_index: usize,
    pub branch: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub commit_count: usize,
    #[serde(default)]
    pub success: bool,
}

/// Canonical consolidation state.
///
/// The consolidator mutates this and the session serializes it; there is
/// exactly one state type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationState {
    #[serde(default)]
    pub phase: ConsolidationPhase,
    #[serde(default)]
    pub mode: ConsolidationMode,
    /// Group currently being assembled.
    #[serde(default)]
    pub current_group: usize,
    /// Group branches produced so far, in group order.
    #[serde(default)]
    pub group_branches: Vec<String>,
    /// Per-group merge outcomes.
    #[serde(default)]
    pub group_results: Vec<GroupMergeResult>,
    /// Tasks whose branches were fully cherry-picked. Resume skips these.
    #[serde(default)]
    pub merged_tasks: BTreeSet<String>,
    /// Review-request URLs in forward group order. Each new URL is
    /// prepended because requests are created in reverse group order.
    #[serde(default)]
    pub pr_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ConsolidationState {
    pub fn new(mode: ConsolidationMode) -> Self {
        Self {
            mode,
            started_at: Some(Utc::now()),
            ..Self::default()
        }
    }

    /// True iff the run is paused on a conflict with a non-empty file list.
    pub fn has_conflict(&self) -> bool {
        self.phase == ConsolidationPhase::Paused
            && self.conflict.as_ref().is_some_and(|c| !c.files.is_empty())
    }

    /// Record a review-request URL, preserving forward group order under
    /// reverse-order creation.
    pub fn record_pr_url(&mut self, url: String) {
        self.pr_urls.insert(0, url);
        self.touch();
    }

    pub fn set_phase(&mut self, phase: ConsolidationPhase) {
        self.phase = phase;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn has_conflict_requires_paused_and_files() {
        let mut state = ConsolidationState::new(ConsolidationMode::Stacked);
        assert!(!state.has_conflict());

        state.conflict = Some(ConflictInfo {
            task_id: "t3".to_string(),
            source_branch: "claudio/task/abc".to_string(),
            files: vec!["file.rs".to_string()],
            worktree_path: PathBuf::from("/tmp/wt"),
            detected_at: Utc::now(),
        });
        // Conflict recorded but not paused yet.
        assert!(!state.has_conflict());

        state.set_phase(ConsolidationPhase::Paused);
        assert!(state.has_conflict());

        state.conflict.as_mut().unwrap().files.clear();
        assert!(!state.has_conflict());
    }

    #[test]
    fn pr_urls_keep_forward_order_under_prepend() {
        let mut state = ConsolidationState::new(ConsolidationMode::Stacked);
        // Reverse creation order: group 3, then 2, then 1.
        state.record_pr_url("https://example.com/pr/3".to_string());
        state.record_pr_url("https://example.com/pr/2".to_string());
        state.record_pr_url("https://example.com/pr/1".to_string());
        assert_eq!(
            state.pr_urls,
            vec![
                "https://example.com/pr/1",
                "https://example.com/pr/2",
                "https://example.com/pr/3",
            ]
        );
    }
}
