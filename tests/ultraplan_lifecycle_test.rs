//! End-to-end lifecycle scenarios over in-memory adapters:
//! linear stacked runs, the fan-out optimizer with single-mode
//! consolidation, and multi-pass plan selection.

mod common;

use claudio::domain::models::{ConsolidationMode, UltraPlanConfig, UltraPlanPhase};
use common::{fixture, plan_output, scripted_agent, task, ScriptOptions};

#[tokio::test]
async fn linear_plan_stacked_end_to_end() {
    // T1 -> T2 -> T3: three layers, three group branches, three stacked
    // review requests based on main, group-1, group-2.
    let tasks = vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t2"])];
    let agent = scripted_agent(plan_output("linear", &tasks), ScriptOptions::default());
    let f = fixture(UltraPlanConfig::default(), agent);

    f.coordinator.run().await.expect("run succeeds");

    let session = f.coordinator.session().await;
    let up = session.ultra_plan.as_ref().unwrap();
    assert_eq!(up.phase, UltraPlanPhase::Complete);

    let plan = f.plan().await;
    assert_eq!(plan.execution_order.len(), 3);
    assert_eq!(up.completed_tasks.len(), 3);
    assert!(up.failed_tasks.is_empty());

    // Three sequential instances for tasks (plus planning + synthesis).
    let (completed, total, _) = f.coordinator.get_progress().await;
    assert_eq!((completed, total), (3, 3));

    // Stacked branches and pushes in group order.
    let id8 = &session.id.to_string()[..8];
    let expected_branches: Vec<String> = (1..=3)
        .map(|n| format!("claudio/ultraplan-{id8}-group-{n}"))
        .collect();
    assert_eq!(f.vcs.pushed_branches(), expected_branches);

    // Requests were created in reverse group order with stacked bases.
    let requests = f.review.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].branch, expected_branches[2]);
    assert_eq!(requests[0].base, expected_branches[1]);
    assert_eq!(requests[1].branch, expected_branches[1]);
    assert_eq!(requests[1].base, expected_branches[0]);
    assert_eq!(requests[2].branch, expected_branches[0]);
    assert_eq!(requests[2].base, "main");
    assert!(requests[2].title.starts_with("ultraplan: group 1 - "));

    // PR URLs surface in forward group order despite reverse creation.
    let state = up.consolidation.as_ref().unwrap();
    assert_eq!(
        state.pr_urls,
        vec![
            "https://example.com/pr/3",
            "https://example.com/pr/2",
            "https://example.com/pr/1",
        ]
    );

    let events = f.event_types();
    assert!(events.contains(&"plan_ready".to_string()));
    assert!(events.contains(&"group_complete".to_string()));
    assert!(events.contains(&"consolidation_complete".to_string()));
}

#[tokio::test]
async fn diamond_single_mode_with_fanout_cap() {
    // T1, {T2,T3} depend on T1, T4 depends on both. With max_parallel=1
    // the optimizer splits the middle layer; single mode folds all four
    // cherry-picks into one branch and one review request against main.
    let tasks = vec![
        task("t1", &[]),
        task("t2", &["t1"]),
        task("t3", &["t1"]),
        task("t4", &["t2", "t3"]),
    ];
    let config = UltraPlanConfig {
        max_parallel: 1,
        consolidation_mode: ConsolidationMode::Single,
        ..UltraPlanConfig::default()
    };
    let agent = scripted_agent(plan_output("diamond", &tasks), ScriptOptions::default());
    let f = fixture(config, agent);

    f.coordinator.run().await.expect("run succeeds");

    let plan = f.plan().await;
    assert_eq!(
        plan.execution_order,
        vec![
            vec!["t1".to_string()],
            vec!["t2".to_string()],
            vec!["t3".to_string()],
            vec!["t4".to_string()],
        ],
        "optimizer splits the wide layer without reordering"
    );

    // One consolidated branch containing all four picks in order.
    let picks: Vec<String> = f
        .vcs
        .pick_log()
        .into_iter()
        .map(|(_, source)| source)
        .collect();
    let session = f.coordinator.session().await;
    let up = session.ultra_plan.as_ref().unwrap();
    let expected: Vec<String> = ["t1", "t2", "t3", "t4"]
        .iter()
        .map(|t| {
            let id = up.task_to_instance.get(*t).expect("task mapped");
            session.instance(*id).expect("task instance").branch.clone()
        })
        .collect();
    assert_eq!(picks, expected);

    let requests = f.review.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].base, "main");
    let id8 = &session.id.to_string()[..8];
    assert_eq!(requests[0].branch, format!("claudio/ultraplan-{id8}"));
}

#[tokio::test]
async fn multi_pass_selects_candidate_plan() {
    // Three seeded planners emit distinct plans; the manager picks
    // candidate index 1 (completion order).
    let plan_a = plan_output("wide", &[task("a1", &[]), task("a2", &[])]);
    let plan_b = plan_output("simple", &[task("b1", &[])]);
    let plan_c = plan_output("balanced", &[task("c1", &[]), task("c2", &["c1"])]);

    let options = ScriptOptions {
        strategy_plans: vec![
            ("maximize-parallelism".to_string(), plan_a),
            ("minimize-complexity".to_string(), plan_b),
            ("balanced-approach".to_string(), plan_c),
        ],
        plan_decision: Some(
            r#"<plan_decision>{"action":"select","selected_index":1,"reasoning":"second finisher wins","plan_scores":[{"strategy":"x","score":0.9,"strengths":[],"weaknesses":[]}]}</plan_decision>"#
                .to_string(),
        ),
        ..ScriptOptions::default()
    };
    let config = UltraPlanConfig {
        multi_pass: true,
        ..UltraPlanConfig::default()
    };
    let agent = scripted_agent(String::new(), options);
    let f = fixture(config, agent);

    f.coordinator.run().await.expect("run succeeds");

    let session = f.coordinator.session().await;
    let up = session.ultra_plan.as_ref().unwrap();
    assert_eq!(up.phase, UltraPlanPhase::Complete);
    assert_eq!(up.candidate_plans.len(), 3);
    assert_eq!(up.plan_coordinator_ids.len(), 3);
    assert!(up.plan_manager_id.is_some());

    // The adopted plan is candidate[1] in completion order (modulo the
    // derived execution order added on adoption).
    let candidate = up.candidate_plans[1].as_ref().expect("candidate present");
    let plan = up.plan.as_ref().expect("plan adopted");
    assert_eq!(plan.summary, candidate.summary);
    assert_eq!(plan.tasks, candidate.tasks);

    // Phase walk: planning -> plan_selection -> context_refresh -> executing.
    let phase_changes: Vec<(String, String)> = f
        .events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|record| {
            let value = serde_json::to_value(record).unwrap();
            if value["type"] == "phase_change" {
                Some((
                    value["data"]["from"].as_str().unwrap().to_string(),
                    value["data"]["to"].as_str().unwrap().to_string(),
                ))
            } else {
                None
            }
        })
        .collect();
    assert_eq!(
        phase_changes[0],
        ("planning".to_string(), "plan_selection".to_string())
    );
    assert_eq!(
        phase_changes[1],
        ("plan_selection".to_string(), "context_refresh".to_string())
    );
    assert_eq!(
        phase_changes[2],
        ("context_refresh".to_string(), "executing".to_string())
    );

    let events = f.event_types();
    assert!(events.contains(&"plan_selection_started".to_string()));
    assert!(events.contains(&"all_plans_generated".to_string()));
    assert!(events.contains(&"plan_selected".to_string()));
}

#[tokio::test]
async fn synthesis_recommendations_trigger_revision() {
    let tasks = vec![task("t1", &[])];
    let options = ScriptOptions {
        synthesis_recommendations: vec!["tighten error handling".to_string()],
        ..ScriptOptions::default()
    };
    let agent = scripted_agent(plan_output("tiny", &tasks), options);
    let f = fixture(UltraPlanConfig::default(), agent);

    f.coordinator.run().await.expect("run succeeds");

    let session = f.coordinator.session().await;
    let up = session.ultra_plan.as_ref().unwrap();
    assert_eq!(up.phase, UltraPlanPhase::Complete);
    assert!(up.synthesis.is_some());
    assert!(up.revision.is_some(), "revision ran on recommendations");
    assert!(up.revision_id.is_some());
}
