//! Git implementation of the VCS port.
//!
//! Shells out to `git`. Operations are serialized per worktree, since
//! concurrent index mutation in one worktree corrupts state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::ports::{CherryPickOutcome, Vcs};

/// Git adapter over the system `git` binary.
#[derive(Debug, Default)]
pub struct GitVcs {
    /// One lock per worktree path.
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl GitVcs {
    pub fn new() -> Self {
        Self::default()
    }

    async fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(path.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run git in `dir`, returning trimmed stdout. Non-zero exit maps
    /// to a VCS error carrying stderr.
    async fn git(&self, dir: &Path, args: &[&str]) -> OrchestratorResult<String> {
        debug!(dir = %dir.display(), args = ?args, "git");
        let output = Command::new("git")
            .current_dir(dir)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| OrchestratorError::Vcs(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OrchestratorError::Vcs(format!(
                "git {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn branch_exists(&self, repo: &Path, branch: &str) -> OrchestratorResult<bool> {
        let status = Command::new("git")
            .current_dir(repo)
            .args([
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| OrchestratorError::Vcs(format!("failed to run git: {e}")))?;
        Ok(status.success())
    }

    /// Unmerged paths in the worktree.
    async fn conflicting_files(&self, worktree: &Path) -> OrchestratorResult<Vec<String>> {
        let out = self
            .git(worktree, &["diff", "--name-only", "--diff-filter=U"])
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    /// Classify a failed cherry-pick: conflict (unmerged paths present)
    /// or hard failure.
    async fn classify_pick_failure(
        &self,
        worktree: &Path,
        stderr: String,
    ) -> OrchestratorResult<CherryPickOutcome> {
        let files = self.conflicting_files(worktree).await?;
        if files.is_empty() {
            return Err(OrchestratorError::Vcs(format!(
                "cherry-pick failed without conflicts: {}",
                stderr.trim()
            )));
        }
        Ok(CherryPickOutcome::Conflict { files })
    }
}

#[async_trait]
impl Vcs for GitVcs {
    async fn find_main_branch(&self, repo: &Path) -> OrchestratorResult<String> {
        // Prefer the remote HEAD; fall back to conventional names.
        if let Ok(head) = self
            .git(repo, &["symbolic-ref", "refs/remotes/origin/HEAD"])
            .await
        {
            if let Some(name) = head.rsplit('/').next() {
                return Ok(name.to_string());
            }
        }
        for candidate in ["main", "master"] {
            if self.branch_exists(repo, candidate).await? {
                return Ok(candidate.to_string());
            }
        }
        Err(OrchestratorError::Vcs(
            "could not determine the main branch".to_string(),
        ))
    }

    async fn create_branch_from(
        &self,
        repo: &Path,
        new_branch: &str,
        base_branch: &str,
    ) -> OrchestratorResult<()> {
        if !self.branch_exists(repo, base_branch).await? {
            return Err(OrchestratorError::Vcs(format!(
                "base branch {base_branch} does not exist"
            )));
        }
        if self.branch_exists(repo, new_branch).await? {
            return Err(OrchestratorError::Vcs(format!(
                "branch {new_branch} already exists"
            )));
        }
        self.git(repo, &["branch", new_branch, base_branch]).await?;
        Ok(())
    }

    async fn create_worktree_from_branch(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
    ) -> OrchestratorResult<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(OrchestratorError::Vcs(format!(
                "worktree path {} already exists",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let path_str = path.to_string_lossy();
        self.git(repo, &["worktree", "add", path_str.as_ref(), branch])
            .await?;
        Ok(())
    }

    async fn remove_worktree(&self, repo: &Path, path: &Path) -> OrchestratorResult<()> {
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Ok(());
        }
        let path_str = path.to_string_lossy();
        self.git(repo, &["worktree", "remove", "--force", path_str.as_ref()])
            .await?;
        Ok(())
    }

    async fn cherry_pick_branch(
        &self,
        worktree: &Path,
        source_branch: &str,
    ) -> OrchestratorResult<CherryPickOutcome> {
        let lock = self.lock_for(worktree).await;
        let _guard = lock.lock().await;

        let merge_base = self
            .git(worktree, &["merge-base", "HEAD", source_branch])
            .await?;
        let range = format!("{merge_base}..{source_branch}");

        let output = Command::new("git")
            .current_dir(worktree)
            .args(["cherry-pick", &range])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| OrchestratorError::Vcs(format!("failed to run git: {e}")))?;

        if output.status.success() {
            return Ok(CherryPickOutcome::Applied);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        self.classify_pick_failure(worktree, stderr).await
    }

    async fn get_conflicting_files(&self, worktree: &Path) -> OrchestratorResult<Vec<String>> {
        self.conflicting_files(worktree).await
    }

    async fn continue_cherry_pick(
        &self,
        worktree: &Path,
    ) -> OrchestratorResult<CherryPickOutcome> {
        let lock = self.lock_for(worktree).await;
        let _guard = lock.lock().await;

        let output = Command::new("git")
            .current_dir(worktree)
            // Keep the prepared message without opening an editor.
            .args(["-c", "core.editor=true", "cherry-pick", "--continue"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| OrchestratorError::Vcs(format!("failed to run git: {e}")))?;

        if output.status.success() {
            return Ok(CherryPickOutcome::Applied);
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        self.classify_pick_failure(worktree, stderr).await
    }

    async fn abort_cherry_pick(&self, worktree: &Path) -> OrchestratorResult<()> {
        let lock = self.lock_for(worktree).await;
        let _guard = lock.lock().await;
        self.git(worktree, &["cherry-pick", "--abort"]).await?;
        Ok(())
    }

    async fn count_commits_between(
        &self,
        worktree: &Path,
        base: &str,
        head: &str,
    ) -> OrchestratorResult<usize> {
        let range = format!("{base}..{head}");
        let out = self.git(worktree, &["rev-list", "--count", &range]).await?;
        out.parse::<usize>()
            .map_err(|e| OrchestratorError::Vcs(format!("bad rev-list count '{out}': {e}")))
    }

    async fn get_changed_files(
        &self,
        worktree: &Path,
        base: &str,
    ) -> OrchestratorResult<Vec<String>> {
        let range = format!("{base}...HEAD");
        let out = self
            .git(worktree, &["diff", "--name-only", &range])
            .await?;
        Ok(out.lines().map(str::to_string).collect())
    }

    async fn push(&self, worktree: &Path, force: bool) -> OrchestratorResult<()> {
        let lock = self.lock_for(worktree).await;
        let _guard = lock.lock().await;

        let branch = self
            .git(worktree, &["rev-parse", "--abbrev-ref", "HEAD"])
            .await?;
        let mut args = vec!["push", "--set-upstream", "origin"];
        if force {
            args.push("--force-with-lease");
        }
        args.push(&branch);
        self.git(worktree, &args).await?;
        Ok(())
    }
}
