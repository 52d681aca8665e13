//! In-memory VCS for tests: scriptable branches, worktrees,
//! cherry-picks, conflicts, and pushes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::ports::{CherryPickOutcome, Vcs};

#[derive(Debug, Default)]
struct MockVcsState {
    branches: BTreeSet<String>,
    /// worktree path -> checked-out branch
    worktrees: BTreeMap<PathBuf, String>,
    /// source branch -> commits it would contribute
    branch_commits: BTreeMap<String, usize>,
    /// source branch -> files it would change
    branch_files: BTreeMap<String, Vec<String>>,
    /// source branch -> conflict files (fires on next pick of it)
    armed_conflicts: BTreeMap<String, Vec<String>>,
    /// (worktree, source) of a pick stopped on a conflict
    conflict_in_progress: Option<(PathBuf, String)>,
    /// commits accumulated per worktree
    worktree_commits: BTreeMap<PathBuf, usize>,
    /// files accumulated per worktree
    worktree_files: BTreeMap<PathBuf, Vec<String>>,
    /// chronological (worktree, source) pick log
    pick_log: Vec<(PathBuf, String)>,
    pushed_branches: Vec<String>,
    fail_push: bool,
}

/// Scriptable in-memory [`Vcs`] implementation.
#[derive(Debug)]
pub struct MockVcs {
    main_branch: String,
    state: Mutex<MockVcsState>,
}

impl MockVcs {
    pub fn new(main_branch: &str) -> Self {
        let mut state = MockVcsState::default();
        state.branches.insert(main_branch.to_string());
        Self {
            main_branch: main_branch.to_string(),
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockVcsState> {
        self.state.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Register a task branch with the commits and files it carries.
    pub fn add_task_branch(&self, branch: &str, commits: usize, files: &[&str]) {
        let mut state = self.lock();
        state.branches.insert(branch.to_string());
        state.branch_commits.insert(branch.to_string(), commits);
        state.branch_files.insert(
            branch.to_string(),
            files.iter().map(|f| (*f).to_string()).collect(),
        );
    }

    /// Make the next cherry-pick of `source` conflict on `files`.
    pub fn arm_conflict(&self, source: &str, files: &[&str]) {
        self.lock().armed_conflicts.insert(
            source.to_string(),
            files.iter().map(|f| (*f).to_string()).collect(),
        );
    }

    pub fn set_fail_push(&self, fail: bool) {
        self.lock().fail_push = fail;
    }

    pub fn pushed_branches(&self) -> Vec<String> {
        self.lock().pushed_branches.clone()
    }

    pub fn pick_log(&self) -> Vec<(PathBuf, String)> {
        self.lock().pick_log.clone()
    }

    pub fn branch_exists(&self, branch: &str) -> bool {
        self.lock().branches.contains(branch)
    }

    fn apply_pick(state: &mut MockVcsState, worktree: &Path, source: &str) {
        let commits = state.branch_commits.get(source).copied().unwrap_or(1);
        *state
            .worktree_commits
            .entry(worktree.to_path_buf())
            .or_default() += commits;
        let files = state.branch_files.get(source).cloned().unwrap_or_default();
        state
            .worktree_files
            .entry(worktree.to_path_buf())
            .or_default()
            .extend(files);
        state
            .pick_log
            .push((worktree.to_path_buf(), source.to_string()));
    }
}

#[async_trait]
impl Vcs for MockVcs {
    async fn find_main_branch(&self, _repo: &Path) -> OrchestratorResult<String> {
        Ok(self.main_branch.clone())
    }

    async fn create_branch_from(
        &self,
        _repo: &Path,
        new_branch: &str,
        base_branch: &str,
    ) -> OrchestratorResult<()> {
        let mut state = self.lock();
        if !state.branches.contains(base_branch) {
            return Err(OrchestratorError::Vcs(format!(
                "base branch {base_branch} does not exist"
            )));
        }
        if !state.branches.insert(new_branch.to_string()) {
            return Err(OrchestratorError::Vcs(format!(
                "branch {new_branch} already exists"
            )));
        }
        Ok(())
    }

    async fn create_worktree_from_branch(
        &self,
        _repo: &Path,
        path: &Path,
        branch: &str,
    ) -> OrchestratorResult<()> {
        let mut state = self.lock();
        if !state.branches.contains(branch) {
            return Err(OrchestratorError::Vcs(format!(
                "branch {branch} does not exist"
            )));
        }
        if state.worktrees.contains_key(path) {
            return Err(OrchestratorError::Vcs(format!(
                "worktree path {} already exists",
                path.display()
            )));
        }
        state.worktrees.insert(path.to_path_buf(), branch.to_string());
        Ok(())
    }

    async fn remove_worktree(&self, _repo: &Path, path: &Path) -> OrchestratorResult<()> {
        self.lock().worktrees.remove(path);
        Ok(())
    }

    async fn cherry_pick_branch(
        &self,
        worktree: &Path,
        source_branch: &str,
    ) -> OrchestratorResult<CherryPickOutcome> {
        let mut state = self.lock();
        if !state.worktrees.contains_key(worktree) {
            return Err(OrchestratorError::Vcs(format!(
                "no worktree at {}",
                worktree.display()
            )));
        }
        if let Some(files) = state.armed_conflicts.remove(source_branch) {
            state.conflict_in_progress =
                Some((worktree.to_path_buf(), source_branch.to_string()));
            return Ok(CherryPickOutcome::Conflict { files });
        }
        Self::apply_pick(&mut state, worktree, source_branch);
        Ok(CherryPickOutcome::Applied)
    }

    async fn get_conflicting_files(&self, _worktree: &Path) -> OrchestratorResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn continue_cherry_pick(
        &self,
        worktree: &Path,
    ) -> OrchestratorResult<CherryPickOutcome> {
        let mut state = self.lock();
        let Some((pending_worktree, source)) = state.conflict_in_progress.take() else {
            return Err(OrchestratorError::Vcs(
                "no cherry-pick in progress".to_string(),
            ));
        };
        if pending_worktree != worktree {
            return Err(OrchestratorError::Vcs(format!(
                "cherry-pick in progress at {}, not {}",
                pending_worktree.display(),
                worktree.display()
            )));
        }
        Self::apply_pick(&mut state, worktree, &source);
        Ok(CherryPickOutcome::Applied)
    }

    async fn abort_cherry_pick(&self, _worktree: &Path) -> OrchestratorResult<()> {
        self.lock().conflict_in_progress = None;
        Ok(())
    }

    async fn count_commits_between(
        &self,
        worktree: &Path,
        _base: &str,
        _head: &str,
    ) -> OrchestratorResult<usize> {
        Ok(self
            .lock()
            .worktree_commits
            .get(worktree)
            .copied()
            .unwrap_or(0))
    }

    async fn get_changed_files(
        &self,
        worktree: &Path,
        _base: &str,
    ) -> OrchestratorResult<Vec<String>> {
        Ok(self
            .lock()
            .worktree_files
            .get(worktree)
            .cloned()
            .unwrap_or_default())
    }

    async fn push(&self, worktree: &Path, _force: bool) -> OrchestratorResult<()> {
        let mut state = self.lock();
        if state.fail_push {
            return Err(OrchestratorError::Vcs("push rejected by remote".to_string()));
        }
        let branch = state
            .worktrees
            .get(worktree)
            .cloned()
            .ok_or_else(|| OrchestratorError::Vcs(format!("no worktree at {}", worktree.display())))?;
        state.pushed_branches.push(branch);
        Ok(())
    }
}
