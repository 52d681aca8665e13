//! Common test utilities for integration tests.
//!
//! Builders for plans and artifacts, a scripted agent resolver that
//! understands the orchestrator's prompts, and a coordinator fixture
//! wired to in-memory adapters.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use claudio::domain::models::{
    CompletionStatus, Notes, Plan, PlannedTask, Session, TaskCompletion, UltraPlanConfig,
    UltraPlanSession,
};
use claudio::infrastructure::agents::{MockAgent, MockBehavior};
use claudio::infrastructure::review::MockReviewService;
use claudio::infrastructure::vcs::MockVcs;
use claudio::services::phases::PhaseTiming;
use claudio::services::{Callbacks, EventRecord, UltraPlanCoordinator};
use tempfile::TempDir;

pub fn task(id: &str, deps: &[&str]) -> PlannedTask {
    PlannedTask {
        id: id.to_string(),
        title: format!("title of {id}"),
        description: format!("description of {id}"),
        files: vec![],
        depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
        priority: 0,
        est_complexity: claudio::domain::models::Complexity::Medium,
    }
}

pub fn completion(task_id: &str, status: CompletionStatus) -> TaskCompletion {
    TaskCompletion {
        task_id: task_id.to_string(),
        status,
        summary: format!("work on {task_id}"),
        files_modified: vec![format!("src/{task_id}.rs")],
        issues: vec![],
        suggestions: vec![],
        dependencies: vec![],
        notes: Notes::One(String::new()),
    }
}

/// Serialize a plan into planner output with a `<plan>` block.
pub fn plan_output(summary: &str, tasks: &[PlannedTask]) -> String {
    let plan = serde_json::json!({
        "summary": summary,
        "tasks": tasks,
        "insights": [],
        "constraints": [],
    });
    format!("Here is my plan.\n<plan>\n{plan}\n</plan>\n")
}

/// Resolver options for [`scripted_agent`].
#[derive(Clone, Default)]
pub struct ScriptOptions {
    /// Task IDs whose agents report failure.
    pub failing_tasks: Vec<String>,
    /// Recommendations the synthesis agent emits.
    pub synthesis_recommendations: Vec<String>,
    /// Decision block the plan manager emits (multi-pass).
    pub plan_decision: Option<String>,
    /// Plans keyed by strategy marker found in the planning prompt.
    pub strategy_plans: Vec<(String, String)>,
}

/// An agent whose behavior is derived from the prompt it was spawned
/// with: planners emit `plan_text`, task agents emit completion
/// artifacts, synthesis and revision agents emit their records.
pub fn scripted_agent(plan_text: String, options: ScriptOptions) -> MockAgent {
    MockAgent::new(move |prompt: &str| {
        // Plan manager (multi-pass) first: its prompt embeds candidates.
        if prompt.contains("You are the plan manager") {
            let decision = options
                .plan_decision
                .clone()
                .unwrap_or_else(|| r#"<plan_decision>{"action":"select","selected_index":0,"reasoning":"default","plan_scores":[]}</plan_decision>"#.to_string());
            return MockBehavior::complete(decision, None);
        }

        if prompt.contains("You are the synthesis agent") {
            let mut artifact = completion("synthesis", CompletionStatus::Completed);
            artifact.summary = "all pieces integrate".to_string();
            artifact.suggestions = options.synthesis_recommendations.clone();
            return MockBehavior::complete("synthesis done", Some(artifact));
        }

        if prompt.contains("You are the revision agent") {
            let mut artifact = completion("revision", CompletionStatus::Completed);
            artifact.summary = "applied recommendations".to_string();
            return MockBehavior::complete("revision done", Some(artifact));
        }

        if prompt.contains("planning coordinator") {
            for (marker, text) in &options.strategy_plans {
                if prompt.contains(marker.as_str()) {
                    return MockBehavior::complete(text.clone(), None);
                }
            }
            return MockBehavior::complete(plan_text.clone(), None);
        }

        // Task agent: the prompt's artifact template names the task.
        if let Some(task_id) = extract_task_id(prompt) {
            let status = if options.failing_tasks.contains(&task_id) {
                CompletionStatus::Failed
            } else {
                CompletionStatus::Completed
            };
            return MockBehavior::complete(
                format!("finished {task_id}"),
                Some(completion(&task_id, status)),
            );
        }

        MockBehavior::error()
    })
}

fn extract_task_id(prompt: &str) -> Option<String> {
    let marker = "\"task_id\": \"";
    let start = prompt.find(marker)? + marker.len();
    let end = prompt[start..].find('"')? + start;
    Some(prompt[start..end].to_string())
}

/// A coordinator over in-memory adapters, plus the handles tests need.
pub struct Fixture {
    pub coordinator: UltraPlanCoordinator,
    pub vcs: Arc<MockVcs>,
    pub review: Arc<MockReviewService>,
    pub events: Arc<Mutex<Vec<EventRecord>>>,
    // Session files live under this directory; dropped with the fixture.
    pub base: TempDir,
}

pub fn fixture(config: UltraPlanConfig, agent: MockAgent) -> Fixture {
    let base = TempDir::new().expect("tempdir");
    let mut session = Session::new("it", base.path());
    session
        .attach_ultra_plan(UltraPlanSession::new("build the widget service", config))
        .expect("fresh session");

    let vcs = Arc::new(MockVcs::new("main"));
    let review = Arc::new(MockReviewService::new());
    let timing = PhaseTiming {
        poll_interval: Duration::from_millis(5),
        instance_timeout: Duration::from_secs(30),
        stall_timeout: Duration::from_secs(30),
    };
    let coordinator = UltraPlanCoordinator::new(
        session,
        Arc::new(agent),
        vcs.clone(),
        review.clone(),
        timing,
    );

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    coordinator.set_callbacks(Callbacks {
        on_event: Some(Arc::new(move |record: &EventRecord| {
            sink.lock().unwrap().push(record.clone());
        })),
        ..Callbacks::default()
    });

    Fixture {
        coordinator,
        vcs,
        review,
        events,
        base,
    }
}

impl Fixture {
    pub fn event_types(&self) -> Vec<String> {
        self.events
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

    pub async fn plan(&self) -> Plan {
        self.coordinator.plan().await.expect("plan set")
    }
}
