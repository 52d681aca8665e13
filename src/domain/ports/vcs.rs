//! VCS port - interface for version-control primitives.
//!
//! All operations may block for seconds; the coordinator serializes
//! calls per worktree. Conflicts are data, not errors.

use async_trait::async_trait;
use std::path::Path;

use crate::domain::errors::OrchestratorResult;

/// Result of applying a cherry-pick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CherryPickOutcome {
    /// All commits applied cleanly.
    Applied,
    /// A commit conflicted; the pick is left in progress for resolution.
    Conflict { files: Vec<String> },
}

impl CherryPickOutcome {
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Trait for VCS backends.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Name of the primary branch of the base repository.
    async fn find_main_branch(&self, repo: &Path) -> OrchestratorResult<String>;

    /// Create `new_branch` pointing at `base_branch`. Fails if the base
    /// is missing or the new branch already exists.
    async fn create_branch_from(
        &self,
        repo: &Path,
        new_branch: &str,
        base_branch: &str,
    ) -> OrchestratorResult<()>;

    /// Materialize a worktree checked out at `branch` at `path`. The
    /// directory must not pre-exist.
    async fn create_worktree_from_branch(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
    ) -> OrchestratorResult<()>;

    /// Remove a worktree. Idempotent on a missing path.
    async fn remove_worktree(&self, repo: &Path, path: &Path) -> OrchestratorResult<()>;

    /// Apply each commit of `source_branch` onto the current branch of
    /// `worktree`. On conflict the pick is NOT aborted; the conflicting
    /// files are returned for resolution.
    async fn cherry_pick_branch(
        &self,
        worktree: &Path,
        source_branch: &str,
    ) -> OrchestratorResult<CherryPickOutcome>;

    /// Files currently in a conflicted state in the worktree.
    async fn get_conflicting_files(&self, worktree: &Path) -> OrchestratorResult<Vec<String>>;

    /// Resume an interrupted cherry-pick after resolution.
    async fn continue_cherry_pick(&self, worktree: &Path)
        -> OrchestratorResult<CherryPickOutcome>;

    /// Abort an in-progress cherry-pick, restoring pre-pick state.
    async fn abort_cherry_pick(&self, worktree: &Path) -> OrchestratorResult<()>;

    /// Number of commits on `head` that are not on `base`.
    async fn count_commits_between(
        &self,
        worktree: &Path,
        base: &str,
        head: &str,
    ) -> OrchestratorResult<usize>;

    /// Paths changed in the worktree relative to `base`.
    async fn get_changed_files(
        &self,
        worktree: &Path,
        base: &str,
    ) -> OrchestratorResult<Vec<String>>;

    /// Push the worktree's current branch to the default remote.
    async fn push(&self, worktree: &Path, force: bool) -> OrchestratorResult<()>;
}
