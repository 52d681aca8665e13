//! Consolidator scenarios against the in-memory VCS: conflict
//! pause/resume, failure semantics, and the pre-consolidated path.

mod common;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use claudio::domain::models::{
    CompletionStatus, ConsolidationMode, ConsolidationPhase, UltraPlanConfig,
};
use claudio::infrastructure::review::MockReviewService;
use claudio::infrastructure::vcs::MockVcs;
use claudio::services::{ConsolidationInput, Consolidator, EventRecord};
use common::{completion, task};
use uuid::Uuid;

struct Harness {
    consolidator: Consolidator,
    vcs: Arc<MockVcs>,
    review: Arc<MockReviewService>,
    events: Arc<Mutex<Vec<EventRecord>>>,
}

fn harness(mode: ConsolidationMode) -> Harness {
    let vcs = Arc::new(MockVcs::new("main"));
    let review = Arc::new(MockReviewService::new());
    let events = Arc::new(Mutex::new(Vec::new()));

    // Two layers: [t1, t2] then [t3].
    let tasks = vec![task("t1", &[]), task("t2", &[]), task("t3", &["t1"])];
    let execution_order = vec![
        vec!["t1".to_string(), "t2".to_string()],
        vec!["t3".to_string()],
    ];
    let mut task_branches = BTreeMap::new();
    let mut task_completions = BTreeMap::new();
    for id in ["t1", "t2", "t3"] {
        let branch = format!("claudio/task/{id}");
        vcs.add_task_branch(&branch, 2, &[&format!("src/{id}.rs")]);
        task_branches.insert(id.to_string(), branch);
        task_completions.insert(id.to_string(), completion(id, CompletionStatus::Completed));
    }

    let input = ConsolidationInput {
        objective: "ship the consolidated feature".to_string(),
        session_id: Uuid::new_v4(),
        base_repo: PathBuf::from("/repo"),
        config: UltraPlanConfig {
            consolidation_mode: mode,
            ..UltraPlanConfig::default()
        },
        tasks,
        execution_order,
        task_branches,
        task_completions,
        synthesis: None,
        revision: None,
        pre_consolidated_branches: vec![],
        pre_consolidated_contexts: vec![],
    };

    let sink = events.clone();
    let consolidator = Consolidator::new(
        vcs.clone(),
        review.clone(),
        input,
        Arc::new(move |record| sink.lock().unwrap().push(record)),
    );
    Harness {
        consolidator,
        vcs,
        review,
        events,
    }
}

fn event_types(events: &Arc<Mutex<Vec<EventRecord>>>) -> Vec<String> {
    events
        .lock()
        .unwrap()
        .iter()
        .map(|record| {
            serde_json::to_value(record).unwrap()["type"]
                .as_str()
                .unwrap()
                .to_string()
        })
        .collect()
}

#[tokio::test]
async fn clean_run_produces_stacked_branches_and_requests() {
    let h = harness(ConsolidationMode::Stacked);
    let state = h.consolidator.run().await.expect("consolidation succeeds");

    assert_eq!(state.phase, ConsolidationPhase::Complete);
    assert_eq!(state.group_branches.len(), 2);
    assert_eq!(state.group_results.len(), 2);
    assert_eq!(state.group_results[0].commit_count, 4, "t1+t2, two commits each");
    assert!(state.group_results.iter().all(|g| g.success));
    assert_eq!(h.review.requests().len(), 2);

    // Event order within the run.
    let types = event_types(&h.events);
    let order = [
        "consolidation_started",
        "consolidation_group_started",
        "consolidation_task_merging",
        "consolidation_task_merged",
        "consolidation_group_complete",
        "consolidation_pr_creating",
        "consolidation_pr_created",
        "consolidation_complete",
    ];
    let mut last = 0;
    for expected in order {
        let position = types
            .iter()
            .position(|t| t == expected)
            .unwrap_or_else(|| panic!("missing event {expected}"));
        assert!(position >= last, "{expected} out of order");
        last = position;
    }
}

#[tokio::test]
async fn conflict_pauses_then_resume_completes() {
    let h = harness(ConsolidationMode::Stacked);
    h.vcs.arm_conflict("claudio/task/t2", &["src/shared.rs"]);

    let state = h.consolidator.run().await.expect("pause is not an error");
    assert_eq!(state.phase, ConsolidationPhase::Paused);
    assert!(state.has_conflict());
    let conflict = state.conflict.as_ref().unwrap();
    assert_eq!(conflict.task_id, "t2");
    assert_eq!(conflict.files, vec!["src/shared.rs"]);
    assert!(conflict
        .worktree_path
        .ends_with(".claudio/consolidation/group-1"));

    // No push, no review requests while paused.
    assert!(h.vcs.pushed_branches().is_empty());
    assert!(h.review.requests().is_empty());
    assert!(event_types(&h.events).contains(&"consolidation_conflict".to_string()));

    // Resume: finishes t2's pick, then the rest, then pushes and PRs.
    let state = h.consolidator.resume().await.expect("resume succeeds");
    assert_eq!(state.phase, ConsolidationPhase::Complete);
    assert_eq!(state.pr_urls.len(), 2);

    // t1 was merged before the pause and is not re-picked: each source
    // appears exactly once in the pick log.
    let picks: Vec<String> = h
        .vcs
        .pick_log()
        .into_iter()
        .map(|(_, source)| source)
        .collect();
    assert_eq!(
        picks,
        vec![
            "claudio/task/t1",
            "claudio/task/t2",
            "claudio/task/t3",
        ]
    );
}

#[tokio::test]
async fn resume_requires_paused_state() {
    let h = harness(ConsolidationMode::Stacked);
    let err = h.consolidator.resume().await.unwrap_err();
    assert!(err.to_string().contains("paused"));
}

#[tokio::test]
async fn push_failure_fails_the_run() {
    let h = harness(ConsolidationMode::Stacked);
    h.vcs.set_fail_push(true);

    let err = h.consolidator.run().await.unwrap_err();
    assert!(err.to_string().contains("Push failed"));
    let state = h.consolidator.state().await;
    assert_eq!(state.phase, ConsolidationPhase::Failed);
    assert!(h.review.requests().is_empty());
    assert!(event_types(&h.events).contains(&"consolidation_failed".to_string()));
}

#[tokio::test]
async fn no_task_branches_fails_the_group() {
    let vcs = Arc::new(MockVcs::new("main"));
    let review = Arc::new(MockReviewService::new());
    let input = ConsolidationInput {
        objective: "objective".to_string(),
        session_id: Uuid::new_v4(),
        base_repo: PathBuf::from("/repo"),
        config: UltraPlanConfig::default(),
        tasks: vec![task("t1", &[])],
        execution_order: vec![vec!["t1".to_string()]],
        task_branches: BTreeMap::new(),
        task_completions: BTreeMap::new(),
        synthesis: None,
        revision: None,
        pre_consolidated_branches: vec![],
        pre_consolidated_contexts: vec![],
    };
    let consolidator = Consolidator::new(vcs, review, input, Arc::new(|_| {}));

    let err = consolidator.run().await.unwrap_err();
    assert!(err.to_string().contains("no task branches with commits"));
}

#[tokio::test]
async fn pre_consolidated_branches_skip_assembly() {
    let vcs = Arc::new(MockVcs::new("main"));
    let review = Arc::new(MockReviewService::new());
    let events = Arc::new(Mutex::new(Vec::new()));

    // Branches already assembled by per-group consolidator agents.
    vcs.add_task_branch("pre/group-1", 3, &["a.rs"]);
    vcs.add_task_branch("pre/group-2", 2, &["b.rs"]);

    let input = ConsolidationInput {
        objective: "objective".to_string(),
        session_id: Uuid::new_v4(),
        base_repo: PathBuf::from("/repo"),
        config: UltraPlanConfig::default(),
        tasks: vec![task("t1", &[]), task("t2", &["t1"])],
        execution_order: vec![vec!["t1".to_string()], vec!["t2".to_string()]],
        task_branches: BTreeMap::new(),
        task_completions: BTreeMap::new(),
        synthesis: None,
        revision: None,
        pre_consolidated_branches: vec!["pre/group-1".to_string(), "pre/group-2".to_string()],
        pre_consolidated_contexts: vec![
            "group one context".to_string(),
            "group two context".to_string(),
        ],
    };
    let sink = events.clone();
    let consolidator = Consolidator::new(
        vcs.clone(),
        review.clone(),
        input,
        Arc::new(move |record| sink.lock().unwrap().push(record)),
    );

    let state = consolidator.run().await.expect("pre-consolidated run");
    assert_eq!(state.phase, ConsolidationPhase::Complete);
    assert_eq!(state.group_branches, vec!["pre/group-1", "pre/group-2"]);
    // No cherry-picks happened.
    assert!(vcs.pick_log().is_empty());
    assert_eq!(vcs.pushed_branches(), vec!["pre/group-1", "pre/group-2"]);

    let requests = review.requests();
    assert_eq!(requests.len(), 2);
    // Reverse creation: group 2 request first, carrying its context.
    assert!(requests[0].body.contains("group two context"));
    assert!(requests[1].body.contains("group one context"));
}
