//! Consolidator: folds per-task branches into group branches via
//! cherry-pick, pushes them, and opens stacked review requests.
//!
//! Conflicts are a first-class pause, not an error: the run records a
//! conflict snapshot, stops, and can be resumed after resolution.
//! Resume re-enters the group loop at the first task that has not been
//! merged yet.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    ConflictInfo, ConsolidationMode, ConsolidationPhase, ConsolidationState, GroupMergeResult,
    PlannedTask, RevisionRecord, SynthesisRecord, TaskCompletion, UltraPlanConfig,
};
use crate::domain::ports::{CherryPickOutcome, ReviewRequest, ReviewService, Vcs};
use crate::services::events::{EventRecord, UltraPlanEvent};

/// Everything a consolidation run needs, captured up front so a paused
/// run can be reattached and resumed.
#[derive(Debug, Clone)]
pub struct ConsolidationInput {
    pub objective: String,
    pub session_id: Uuid,
    pub base_repo: PathBuf,
    pub config: UltraPlanConfig,
    pub tasks: Vec<PlannedTask>,
    pub execution_order: Vec<Vec<String>>,
    /// Task ID -> branch holding that task's commits. Only tasks that
    /// produced work appear here.
    pub task_branches: BTreeMap<String, String>,
    pub task_completions: BTreeMap<String, TaskCompletion>,
    pub synthesis: Option<SynthesisRecord>,
    pub revision: Option<RevisionRecord>,
    /// Branches already produced by per-group consolidator agents.
    /// When present (one per group), branch assembly is skipped.
    pub pre_consolidated_branches: Vec<String>,
    pub pre_consolidated_contexts: Vec<String>,
}

/// Sink for consolidation events.
pub type EventSink = Arc<dyn Fn(EventRecord) + Send + Sync>;

pub struct Consolidator {
    vcs: Arc<dyn Vcs>,
    review: Arc<dyn ReviewService>,
    input: ConsolidationInput,
    state: Arc<Mutex<ConsolidationState>>,
    stopped: Arc<AtomicBool>,
    events: EventSink,
}

impl Consolidator {
    pub fn new(
        vcs: Arc<dyn Vcs>,
        review: Arc<dyn ReviewService>,
        input: ConsolidationInput,
        events: EventSink,
    ) -> Self {
        let state = ConsolidationState::new(input.config.consolidation_mode);
        Self {
            vcs,
            review,
            input,
            state: Arc::new(Mutex::new(state)),
            stopped: Arc::new(AtomicBool::new(false)),
            events,
        }
    }

    /// Reattach to a previously persisted state (for resume).
    pub fn with_state(mut self, state: ConsolidationState) -> Self {
        self.state = Arc::new(Mutex::new(state));
        self
    }

    pub async fn state(&self) -> ConsolidationState {
        self.state.lock().await.clone()
    }

    /// Idempotent stop. The run halts at the next checkpoint, leaving
    /// the state as it was.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn emit(&self, event: UltraPlanEvent) {
        (self.events)(EventRecord::now(event));
    }

    /// The per-group task layout: the execution order in stacked mode,
    /// or a single flattened layer in single mode.
    fn group_layout(&self) -> Vec<Vec<String>> {
        match self.input.config.consolidation_mode {
            ConsolidationMode::Stacked => self.input.execution_order.clone(),
            ConsolidationMode::Single => {
                vec![self
                    .input
                    .execution_order
                    .iter()
                    .flatten()
                    .cloned()
                    .collect()]
            }
        }
    }

    /// Deterministic branch name for a group.
    fn branch_name(&self, group_index: usize) -> String {
        let prefix = self.input.config.effective_branch_prefix();
        let id_segment = if self.input.config.include_id {
            format!("-{}", &self.input.session_id.to_string()[..8])
        } else {
            String::new()
        };
        match self.input.config.consolidation_mode {
            ConsolidationMode::Stacked => {
                format!("{prefix}/ultraplan{id_segment}-group-{}", group_index + 1)
            }
            ConsolidationMode::Single => format!("{prefix}/ultraplan{id_segment}"),
        }
    }

    fn worktree_path(&self, group_index: usize) -> PathBuf {
        self.input
            .base_repo
            .join(".claudio")
            .join("consolidation")
            .join(format!("group-{}", group_index + 1))
    }

    /// Run the full consolidation. On conflict the returned state has
    /// `phase == Paused`; call [`resume`](Self::resume) after resolution.
    pub async fn run(&self) -> OrchestratorResult<ConsolidationState> {
        let layout = self.group_layout();
        self.emit(UltraPlanEvent::ConsolidationStarted {
            mode: self.input.config.consolidation_mode.as_str().to_string(),
            group_count: layout.len(),
        });

        if self.has_pre_consolidated_branches(&layout) {
            info!("Using pre-consolidated group branches");
            {
                let mut state = self.state.lock().await;
                state.group_branches = self.input.pre_consolidated_branches.clone();
            }
            return self.push_and_request(&layout).await;
        }

        self.execute_from(0, &layout).await
    }

    /// Resume a paused run: finish the interrupted cherry-pick, then
    /// re-enter the group loop skipping already-merged tasks.
    pub async fn resume(&self) -> OrchestratorResult<ConsolidationState> {
        let (conflict, group) = {
            let state = self.state.lock().await;
            if state.phase != ConsolidationPhase::Paused {
                return Err(OrchestratorError::ConsolidationFailed(format!(
                    "resume requires a paused consolidation, found {}",
                    state.phase
                )));
            }
            let conflict = state.conflict.clone().ok_or_else(|| {
                OrchestratorError::ConsolidationFailed(
                    "paused consolidation has no recorded conflict worktree".to_string(),
                )
            })?;
            (conflict, state.current_group)
        };

        info!(task_id = %conflict.task_id, group, "Resuming consolidation after conflict");

        match self.vcs.continue_cherry_pick(&conflict.worktree_path).await? {
            CherryPickOutcome::Conflict { files } => {
                // Still conflicted; stay paused with the fresh file list.
                let task_id = conflict.task_id.clone();
                let mut state = self.state.lock().await;
                state.conflict = Some(ConflictInfo {
                    files: files.clone(),
                    detected_at: Utc::now(),
                    ..conflict
                });
                state.set_phase(ConsolidationPhase::Paused);
                drop(state);
                self.emit(UltraPlanEvent::Conflict {
                    task_id: task_id.clone(),
                    files: files.clone(),
                });
                self.emit(UltraPlanEvent::ConsolidationConflict { task_id, files });
                return Ok(self.state().await);
            }
            CherryPickOutcome::Applied => {
                let mut state = self.state.lock().await;
                state.merged_tasks.insert(conflict.task_id.clone());
                state.conflict = None;
                state.set_phase(ConsolidationPhase::MergingTasks);
                drop(state);
                self.emit(UltraPlanEvent::ConsolidationTaskMerged {
                    task_id: conflict.task_id.clone(),
                    branch: conflict.source_branch.clone(),
                });
            }
        }

        let layout = self.group_layout();
        self.execute_from(group, &layout).await
    }

    fn has_pre_consolidated_branches(&self, layout: &[Vec<String>]) -> bool {
        !self.input.pre_consolidated_branches.is_empty()
            && self.input.pre_consolidated_branches.len() == layout.len()
    }

    /// Assemble groups starting at `start_group`, then push and create
    /// review requests. Groups before `start_group` are assumed done.
    async fn execute_from(
        &self,
        start_group: usize,
        layout: &[Vec<String>],
    ) -> OrchestratorResult<ConsolidationState> {
        for group_index in start_group..layout.len() {
            if self.is_stopped() {
                return Ok(self.state().await);
            }
            match self.assemble_group(group_index, &layout[group_index]).await {
                Ok(GroupOutcome::Assembled) => {}
                Ok(GroupOutcome::Paused) => return Ok(self.state().await),
                Err(e) => return self.fail(e).await,
            }
        }

        self.push_and_request(layout).await
    }

    /// Stage 1 for one group: branch, worktree, cherry-picks.
    async fn assemble_group(
        &self,
        group_index: usize,
        task_ids: &[String],
    ) -> OrchestratorResult<GroupOutcome> {
        let branch = self.branch_name(group_index);
        let worktree = self.worktree_path(group_index);
        let base = self.base_branch_for(group_index).await?;

        // On resume the branch and worktree already exist; only create
        // them the first time through.
        let already_created = {
            let mut state = self.state.lock().await;
            state.current_group = group_index;
            state.group_branches.len() > group_index
        };

        if !already_created {
            let mut state = self.state.lock().await;
            state.set_phase(ConsolidationPhase::CreatingBranches);
            drop(state);

            self.vcs
                .create_branch_from(&self.input.base_repo, &branch, &base)
                .await?;
            self.vcs
                .create_worktree_from_branch(&self.input.base_repo, &worktree, &branch)
                .await?;

            let mut state = self.state.lock().await;
            state.group_branches.push(branch.clone());
        }

        self.emit(UltraPlanEvent::ConsolidationGroupStarted {
            group_index,
            branch: branch.clone(),
        });

        {
            let mut state = self.state.lock().await;
            state.set_phase(ConsolidationPhase::MergingTasks);
        }

        let mut source_branches = 0usize;
        for task_id in task_ids {
            if self.is_stopped() {
                return Ok(GroupOutcome::Paused);
            }

            let Some(task_branch) = self
                .input
                .task_branches
                .get(task_id)
                .filter(|b| !b.is_empty())
            else {
                debug!(task_id = %task_id, "No branch for task, skipping");
                continue;
            };
            source_branches += 1;

            let already_merged = {
                let state = self.state.lock().await;
                state.merged_tasks.contains(task_id)
            };
            if already_merged {
                debug!(task_id = %task_id, "Task already merged, skipping");
                continue;
            }

            self.emit(UltraPlanEvent::ConsolidationTaskMerging {
                task_id: task_id.clone(),
                branch: task_branch.clone(),
            });

            match self.vcs.cherry_pick_branch(&worktree, task_branch).await? {
                CherryPickOutcome::Applied => {
                    let mut state = self.state.lock().await;
                    state.merged_tasks.insert(task_id.clone());
                    drop(state);
                    self.emit(UltraPlanEvent::ConsolidationTaskMerged {
                        task_id: task_id.clone(),
                        branch: task_branch.clone(),
                    });
                }
                CherryPickOutcome::Conflict { files } => {
                    warn!(task_id = %task_id, files = ?files, "Cherry-pick conflict, pausing");
                    let mut state = self.state.lock().await;
                    state.conflict = Some(ConflictInfo {
                        task_id: task_id.clone(),
                        source_branch: task_branch.clone(),
                        files: files.clone(),
                        worktree_path: worktree.clone(),
                        detected_at: Utc::now(),
                    });
                    state.set_phase(ConsolidationPhase::Paused);
                    drop(state);
                    self.emit(UltraPlanEvent::Conflict {
                        task_id: task_id.clone(),
                        files: files.clone(),
                    });
                    self.emit(UltraPlanEvent::ConsolidationConflict {
                        task_id: task_id.clone(),
                        files,
                    });
                    return Ok(GroupOutcome::Paused);
                }
            }
        }

        if source_branches == 0 {
            return Err(OrchestratorError::NoTaskBranches { group: group_index });
        }

        let commit_count = self
            .vcs
            .count_commits_between(&worktree, &base, "HEAD")
            .await?;
        if commit_count == 0 {
            // Cherry-picks reported success but nothing landed: treat as
            // data loss rather than an empty-but-fine group.
            return Err(OrchestratorError::NoCommitsAdded { group: group_index });
        }

        let files_changed = self.vcs.get_changed_files(&worktree, &base).await?;
        {
            let mut state = self.state.lock().await;
            state.group_results.push(GroupMergeResult {
                group_index,
                branch: branch.clone(),
                files_changed,
                commit_count,
                success: true,
            });
        }

        self.emit(UltraPlanEvent::ConsolidationGroupComplete {
            group_index,
            branch,
            commit_count,
        });

        Ok(GroupOutcome::Assembled)
    }

    /// Stage 2: push every group branch, then create review requests in
    /// reverse group order so each base exists before its dependent.
    async fn push_and_request(
        &self,
        layout: &[Vec<String>],
    ) -> OrchestratorResult<ConsolidationState> {
        {
            let mut state = self.state.lock().await;
            state.set_phase(ConsolidationPhase::Pushing);
        }

        let branches = {
            let state = self.state.lock().await;
            state.group_branches.clone()
        };

        let pre_consolidated = self.has_pre_consolidated_branches(layout);
        for (group_index, branch) in branches.iter().enumerate() {
            let worktree = self.worktree_path(group_index);
            if pre_consolidated {
                // Pre-consolidated branches have no worktree yet; make a
                // throwaway one to push from.
                self.vcs
                    .create_worktree_from_branch(&self.input.base_repo, &worktree, branch)
                    .await?;
            }
            if let Err(e) = self.vcs.push(&worktree, false).await {
                error!(branch = %branch, error = %e, "Push failed");
                return self
                    .fail(OrchestratorError::PushFailed {
                        branch: branch.clone(),
                        message: e.to_string(),
                    })
                    .await;
            }
            if let Err(e) = self
                .vcs
                .remove_worktree(&self.input.base_repo, &worktree)
                .await
            {
                warn!(worktree = %worktree.display(), error = %e, "Failed to remove consolidation worktree");
            }
        }

        {
            let mut state = self.state.lock().await;
            state.set_phase(ConsolidationPhase::CreatingPrs);
        }

        let main_branch = self.vcs.find_main_branch(&self.input.base_repo).await?;
        for (group_index, branch) in branches.iter().enumerate().rev() {
            let base = if group_index == 0
                || self.input.config.consolidation_mode == ConsolidationMode::Single
            {
                main_branch.clone()
            } else {
                branches[group_index - 1].clone()
            };

            self.emit(UltraPlanEvent::ConsolidationPrCreating {
                branch: branch.clone(),
                base: base.clone(),
            });

            let request = ReviewRequest {
                title: self.request_title(group_index, branches.len()),
                body: self.request_body(group_index, branches.len(), layout),
                branch: branch.clone(),
                base,
                draft: self.input.config.create_draft_prs,
                labels: self.input.config.pr_labels.clone(),
            };

            match self.review.create_review_request(&request).await {
                Ok(url) => {
                    {
                        let mut state = self.state.lock().await;
                        state.record_pr_url(url.clone());
                    }
                    self.emit(UltraPlanEvent::ConsolidationPrCreated {
                        branch: branch.clone(),
                        url,
                    });
                }
                Err(e) => return self.fail(e).await,
            }
        }

        let final_state = {
            let mut state = self.state.lock().await;
            state.set_phase(ConsolidationPhase::Complete);
            state.clone()
        };
        info!(prs = final_state.pr_urls.len(), "Consolidation complete");
        self.emit(UltraPlanEvent::ConsolidationComplete {
            pr_urls: final_state.pr_urls.clone(),
        });
        Ok(final_state)
    }

    async fn base_branch_for(&self, group_index: usize) -> OrchestratorResult<String> {
        if group_index == 0
            || self.input.config.consolidation_mode == ConsolidationMode::Single
        {
            return self.vcs.find_main_branch(&self.input.base_repo).await;
        }
        let state = self.state.lock().await;
        state
            .group_branches
            .get(group_index - 1)
            .cloned()
            .ok_or_else(|| {
                OrchestratorError::ConsolidationFailed(format!(
                    "group {group_index} has no predecessor branch"
                ))
            })
    }

    /// `ultraplan: [group N - ]{truncated objective}`.
    fn request_title(&self, group_index: usize, group_count: usize) -> String {
        let stacked = self.input.config.consolidation_mode == ConsolidationMode::Stacked
            && group_count > 1;
        if stacked {
            format!(
                "ultraplan: group {} - {}",
                group_index + 1,
                truncate(&self.input.objective, 40)
            )
        } else {
            format!("ultraplan: {}", truncate(&self.input.objective, 50))
        }
    }

    fn request_body(
        &self,
        group_index: usize,
        group_count: usize,
        layout: &[Vec<String>],
    ) -> String {
        let mut body = format!("## Objective\n{}\n", self.input.objective);

        if self.input.config.consolidation_mode == ConsolidationMode::Stacked && group_count > 1 {
            body.push_str(&format!(
                "\nGroup {} of {group_count} in a stacked review chain.\n",
                group_index + 1
            ));
        }

        let task_ids: &[String] = layout.get(group_index).map_or(&[], Vec::as_slice);
        body.push_str("\n## Tasks\n");
        for task_id in task_ids {
            let title = self
                .input
                .tasks
                .iter()
                .find(|t| &t.id == task_id)
                .map_or("", |t| t.title.as_str());
            let summary = self
                .input
                .task_completions
                .get(task_id)
                .map_or("", |c| c.summary.as_str());
            body.push_str(&format!("- **{task_id}** {title}: {summary}\n"));
        }

        let files: Vec<&str> = {
            let state_files: Vec<&str> = task_ids
                .iter()
                .filter_map(|id| self.input.task_completions.get(id))
                .flat_map(|c| c.files_modified.iter().map(String::as_str))
                .collect();
            state_files
        };
        if !files.is_empty() {
            body.push_str("\n## Files\n");
            for file in files {
                body.push_str(&format!("- `{file}`\n"));
            }
        }

        let mut issues = Vec::new();
        let mut suggestions = Vec::new();
        let mut dependencies = Vec::new();
        let mut notes = Vec::new();
        for task_id in task_ids {
            if let Some(completion) = self.input.task_completions.get(task_id) {
                issues.extend(completion.issues.iter().cloned());
                suggestions.extend(completion.suggestions.iter().cloned());
                dependencies.extend(completion.dependencies.iter().cloned());
                if !completion.notes.is_empty() {
                    notes.push(completion.notes.joined());
                }
            }
        }
        push_section(&mut body, "Known Issues", &issues);
        push_section(&mut body, "Integration Suggestions", &suggestions);
        push_section(&mut body, "New Dependencies", &dependencies);
        push_section(&mut body, "Implementation Notes", &notes);

        if let Some(context) = self.input.pre_consolidated_contexts.get(group_index) {
            if !context.is_empty() {
                body.push_str(&format!("\n## Consolidation Context\n{context}\n"));
            }
        }

        if let Some(synthesis) = &self.input.synthesis {
            body.push_str(&format!(
                "\n## Synthesis\n{}\n",
                synthesis.integration_notes
            ));
            push_section(&mut body, "Recommendations", &synthesis.recommendations);
        }

        if let Some(revision) = &self.input.revision {
            if !revision.notes.is_empty() {
                body.push_str(&format!("\n## Revision Notes\n{}\n", revision.notes));
            }
        }

        body
    }

    async fn fail(&self, error: OrchestratorError) -> OrchestratorResult<ConsolidationState> {
        {
            let mut state = self.state.lock().await;
            state.error = Some(error.to_string());
            state.set_phase(ConsolidationPhase::Failed);
        }
        self.emit(UltraPlanEvent::ConsolidationFailed {
            error: error.to_string(),
        });
        Err(error)
    }
}

enum GroupOutcome {
    Assembled,
    Paused,
}

fn push_section(body: &mut String, heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    body.push_str(&format!("\n## {heading}\n"));
    for item in items {
        body.push_str(&format!("- {item}\n"));
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(mode: ConsolidationMode, objective: &str) -> ConsolidationInput {
        ConsolidationInput {
            objective: objective.to_string(),
            session_id: Uuid::new_v4(),
            base_repo: PathBuf::from("/repo"),
            config: UltraPlanConfig {
                consolidation_mode: mode,
                ..UltraPlanConfig::default()
            },
            tasks: vec![],
            execution_order: vec![vec!["t1".to_string()], vec!["t2".to_string()]],
            task_branches: BTreeMap::new(),
            task_completions: BTreeMap::new(),
            synthesis: None,
            revision: None,
            pre_consolidated_branches: vec![],
            pre_consolidated_contexts: vec![],
        }
    }

    fn consolidator(input: ConsolidationInput) -> Consolidator {
        use crate::infrastructure::review::MockReviewService;
        use crate::infrastructure::vcs::MockVcs;
        Consolidator::new(
            Arc::new(MockVcs::new("main")),
            Arc::new(MockReviewService::new()),
            input,
            Arc::new(|_| {}),
        )
    }

    #[test]
    fn stacked_branch_names_include_group() {
        let input = input(ConsolidationMode::Stacked, "obj");
        let session_prefix = input.session_id.to_string()[..8].to_string();
        let consolidator = consolidator(input);
        assert_eq!(
            consolidator.branch_name(0),
            format!("claudio/ultraplan-{session_prefix}-group-1")
        );
        assert_eq!(
            consolidator.branch_name(2),
            format!("claudio/ultraplan-{session_prefix}-group-3")
        );
    }

    #[test]
    fn single_branch_name_has_no_group() {
        let input = input(ConsolidationMode::Single, "obj");
        let session_prefix = input.session_id.to_string()[..8].to_string();
        let consolidator = consolidator(input);
        assert_eq!(
            consolidator.branch_name(0),
            format!("claudio/ultraplan-{session_prefix}")
        );
    }

    #[test]
    fn include_id_false_drops_session_segment() {
        let mut input = input(ConsolidationMode::Single, "obj");
        input.config.include_id = false;
        let consolidator = consolidator(input);
        assert_eq!(consolidator.branch_name(0), "claudio/ultraplan");
    }

    #[test]
    fn single_mode_flattens_layout() {
        let consolidator = consolidator(input(ConsolidationMode::Single, "obj"));
        assert_eq!(
            consolidator.group_layout(),
            vec![vec!["t1".to_string(), "t2".to_string()]]
        );
    }

    #[test]
    fn titles_truncate_per_mode() {
        let long = "a very long objective that will definitely not fit in the title field";
        let stacked = consolidator(input(ConsolidationMode::Stacked, long));
        let title = stacked.request_title(1, 3);
        assert!(title.starts_with("ultraplan: group 2 - "));
        assert!(title.chars().count() <= "ultraplan: group 2 - ".chars().count() + 40);

        let single = consolidator(input(ConsolidationMode::Single, long));
        let title = single.request_title(0, 1);
        assert!(title.starts_with("ultraplan: "));
        assert!(title.chars().count() <= "ultraplan: ".chars().count() + 50);
    }

    #[test]
    fn short_objectives_are_untouched() {
        let consolidator = consolidator(input(ConsolidationMode::Single, "short objective"));
        assert_eq!(
            consolidator.request_title(0, 1),
            "ultraplan: short objective"
        );
    }

    #[test]
    fn body_contains_task_and_synthesis_sections() {
        let mut input = input(ConsolidationMode::Stacked, "obj");
        input.tasks = vec![PlannedTask::new("t1", "first task")];
        input.task_completions.insert(
            "t1".to_string(),
            TaskCompletion {
                task_id: "t1".to_string(),
                status: crate::domain::models::CompletionStatus::Completed,
                summary: "did the thing".to_string(),
                files_modified: vec!["src/lib.rs".to_string()],
                issues: vec!["flaky test".to_string()],
                suggestions: vec![],
                dependencies: vec![],
                notes: crate::domain::models::Notes::One(String::new()),
            },
        );
        input.synthesis = Some(SynthesisRecord {
            integration_notes: "pieces fit".to_string(),
            recommendations: vec!["add docs".to_string()],
            completed_at: Utc::now(),
        });

        let layout = input.execution_order.clone();
        let consolidator = consolidator(input);
        let body = consolidator.request_body(0, 2, &layout);
        assert!(body.contains("Group 1 of 2"));
        assert!(body.contains("**t1** first task: did the thing"));
        assert!(body.contains("`src/lib.rs`"));
        assert!(body.contains("## Known Issues"));
        assert!(body.contains("## Synthesis"));
        assert!(body.contains("add docs"));
    }
}
