//! Partial group failure: the decision gate blocks scheduling until
//! the operator resolves it.

mod common;

use claudio::domain::models::{GroupDecisionChoice, UltraPlanConfig, UltraPlanPhase};
use claudio::services::TaskScheduler;
use common::{fixture, plan_output, scripted_agent, task, ScriptOptions};

fn diamond_options(failing: &str) -> ScriptOptions {
    ScriptOptions {
        failing_tasks: vec![failing.to_string()],
        ..ScriptOptions::default()
    }
}

#[tokio::test]
async fn partial_failure_raises_the_decision_gate() {
    // Layer [t2, t3]: t2 completes, t3 fails.
    let tasks = vec![
        task("t1", &[]),
        task("t2", &["t1"]),
        task("t3", &["t1"]),
        task("t4", &["t2", "t3"]),
    ];
    let agent = scripted_agent(plan_output("diamond", &tasks), diamond_options("t3"));
    let f = fixture(UltraPlanConfig::default(), agent);

    f.coordinator.run().await.expect("run pauses, not errors");

    let session = f.coordinator.session().await;
    let up = session.ultra_plan.as_ref().unwrap();
    assert_eq!(up.phase, UltraPlanPhase::Executing, "phase stays executing");

    let decision = up.group_decision.as_ref().expect("decision raised");
    assert!(decision.awaiting);
    assert_eq!(decision.group_index, 1);
    assert_eq!(decision.succeeded_tasks, vec!["t2"]);
    assert_eq!(decision.failed_tasks, vec!["t3"]);

    // The scheduler releases nothing while the gate is up, even though
    // the next layer's dependencies would appear satisfiable.
    let scheduler = TaskScheduler::new();
    assert!(scheduler.ready_tasks(&session, up).is_empty());

    assert!(f
        .event_types()
        .contains(&"group_decision_required".to_string()));
}

#[tokio::test]
async fn continue_choice_completes_with_the_surviving_tasks() {
    // Fork plan: the failed task has no dependents, so continuing
    // consolidates the surviving work.
    let tasks = vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t1"])];
    let agent = scripted_agent(plan_output("fork", &tasks), diamond_options("t3"));
    let f = fixture(UltraPlanConfig::default(), agent);

    f.coordinator.run().await.expect("first run pauses");
    f.coordinator
        .resolve_group_decision(GroupDecisionChoice::Continue)
        .await
        .expect("continue accepted");
    f.coordinator.run().await.expect("second run completes");

    let session = f.coordinator.session().await;
    let up = session.ultra_plan.as_ref().unwrap();
    assert_eq!(up.phase, UltraPlanPhase::Complete);
    assert!(up.failed_tasks.contains("t3"));
    assert!(up.completed_tasks.contains("t1"));
    assert!(up.completed_tasks.contains("t2"));

    // Consolidation folded only the completed tasks.
    let picked: Vec<String> = f
        .vcs
        .pick_log()
        .into_iter()
        .map(|(_, source)| source)
        .collect();
    assert_eq!(picked.len(), 2);
}

#[tokio::test]
async fn continue_choice_fails_blocked_dependents() {
    // Diamond: t4 depends on the failed t3, so after continuing it is
    // failed as blocked, and its branch-less group fails consolidation
    // (a data-loss signal, not a silent skip).
    let tasks = vec![
        task("t1", &[]),
        task("t2", &["t1"]),
        task("t3", &["t1"]),
        task("t4", &["t2", "t3"]),
    ];
    let agent = scripted_agent(plan_output("diamond", &tasks), diamond_options("t3"));
    let f = fixture(UltraPlanConfig::default(), agent);

    f.coordinator.run().await.expect("first run pauses");
    f.coordinator
        .resolve_group_decision(GroupDecisionChoice::Continue)
        .await
        .expect("continue accepted");

    let err = f.coordinator.run().await.unwrap_err();
    assert!(err.to_string().contains("no task branches with commits"));

    let session = f.coordinator.session().await;
    let up = session.ultra_plan.as_ref().unwrap();
    assert_eq!(up.phase, UltraPlanPhase::Failed);
    assert!(up.failed_tasks.contains("t4"), "t4 failed as blocked");
    assert!(up.completed_tasks.contains("t2"));
    assert!(f.event_types().contains(&"task_blocked".to_string()));
}

#[tokio::test]
async fn abort_choice_fails_the_run() {
    let tasks = vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t1"])];
    let agent = scripted_agent(plan_output("fork", &tasks), diamond_options("t3"));
    let f = fixture(UltraPlanConfig::default(), agent);

    f.coordinator.run().await.expect("run pauses");
    f.coordinator
        .resolve_group_decision(GroupDecisionChoice::Abort)
        .await
        .expect("abort accepted");

    let session = f.coordinator.session().await;
    let up = session.ultra_plan.as_ref().unwrap();
    assert_eq!(up.phase, UltraPlanPhase::Failed);
    assert!(up
        .error
        .as_ref()
        .is_some_and(|e| e.contains("partial failure in group 1")));
}

#[tokio::test]
async fn revise_choice_reruns_failed_tasks() {
    // The scripted agent fails t3 every attempt; after revise the gate
    // comes back, which proves the task was re-released.
    let tasks = vec![task("t1", &[]), task("t2", &["t1"]), task("t3", &["t1"])];
    let agent = scripted_agent(plan_output("fork", &tasks), diamond_options("t3"));
    let f = fixture(UltraPlanConfig::default(), agent);

    f.coordinator.run().await.expect("run pauses");
    let first_instance = {
        let session = f.coordinator.session().await;
        session.ultra_plan.as_ref().unwrap().task_to_instance["t3"]
    };

    f.coordinator
        .resolve_group_decision(GroupDecisionChoice::Revise)
        .await
        .expect("revise accepted");
    {
        let session = f.coordinator.session().await;
        let up = session.ultra_plan.as_ref().unwrap();
        assert!(!up.failed_tasks.contains("t3"), "t3 cleared for rerun");
        assert_eq!(up.current_group, 1, "group rewound");
    }

    f.coordinator.run().await.expect("rerun pauses again");
    let session = f.coordinator.session().await;
    let up = session.ultra_plan.as_ref().unwrap();
    let second_instance = up.task_to_instance["t3"];
    assert_ne!(first_instance, second_instance, "t3 ran on a new instance");
    assert!(up.awaiting_decision(), "t3 failed again, gate re-raised");
}
