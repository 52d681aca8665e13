//! Event taxonomy and callback plumbing.
//!
//! Every significant transition in an UltraPlan run is reported as a
//! timestamped event. Callbacks must be non-blocking; the coordinator
//! invokes them outside its mutex.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::models::{GroupDecision, Plan, UltraPlanPhase};

/// Payload of an orchestration event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum UltraPlanEvent {
    TaskStarted {
        task_id: String,
        instance_id: Uuid,
    },
    TaskComplete {
        task_id: String,
    },
    TaskFailed {
        task_id: String,
        error: Option<String>,
    },
    TaskBlocked {
        task_id: String,
        missing_dependencies: Vec<String>,
    },
    GroupComplete {
        group_index: usize,
        succeeded: usize,
        failed: usize,
    },
    PhaseChange {
        from: UltraPlanPhase,
        to: UltraPlanPhase,
    },
    Conflict {
        task_id: String,
        files: Vec<String>,
    },
    PlanReady {
        task_count: usize,
        group_count: usize,
    },
    MultipassPlanGenerated {
        index: usize,
        task_count: usize,
    },
    AllPlansGenerated {
        count: usize,
    },
    PlanSelectionStarted,
    PlanSelected {
        action: String,
        selected_index: i64,
    },
    GroupDecisionRequired {
        group_index: usize,
        succeeded_tasks: Vec<String>,
        failed_tasks: Vec<String>,
    },
    ConsolidationStarted {
        mode: String,
        group_count: usize,
    },
    ConsolidationGroupStarted {
        group_index: usize,
        branch: String,
    },
    ConsolidationTaskMerging {
        task_id: String,
        branch: String,
    },
    ConsolidationTaskMerged {
        task_id: String,
        branch: String,
    },
    ConsolidationGroupComplete {
        group_index: usize,
        branch: String,
        commit_count: usize,
    },
    ConsolidationPrCreating {
        branch: String,
        base: String,
    },
    ConsolidationPrCreated {
        branch: String,
        url: String,
    },
    ConsolidationConflict {
        task_id: String,
        files: Vec<String>,
    },
    ConsolidationComplete {
        pr_urls: Vec<String>,
    },
    ConsolidationFailed {
        error: String,
    },
}

/// An event plus the moment it happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: UltraPlanEvent,
}

impl EventRecord {
    pub fn now(event: UltraPlanEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

type Hook<T> = Option<Arc<dyn Fn(&T) + Send + Sync>>;

/// Hooks installed by the embedding application (UI, logs).
///
/// Each hook must return quickly; it is invoked on the coordinator's
/// loop with no locks held.
#[derive(Clone, Default)]
pub struct Callbacks {
    /// Every event, in emission order.
    pub on_event: Hook<EventRecord>,
    pub on_phase_change: Option<Arc<dyn Fn(UltraPlanPhase, UltraPlanPhase) + Send + Sync>>,
    pub on_plan_ready: Hook<Plan>,
    pub on_task_complete: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    /// (completed, total) after every task outcome.
    pub on_progress: Option<Arc<dyn Fn(usize, usize) + Send + Sync>>,
    pub on_decision_required: Hook<GroupDecision>,
    /// Fired once with the final success flag.
    pub on_complete: Option<Arc<dyn Fn(bool) + Send + Sync>>,
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_event", &self.on_event.is_some())
            .field("on_phase_change", &self.on_phase_change.is_some())
            .field("on_plan_ready", &self.on_plan_ready.is_some())
            .field("on_task_complete", &self.on_task_complete.is_some())
            .field("on_progress", &self.on_progress.is_some())
            .field("on_decision_required", &self.on_decision_required.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

impl Callbacks {
    pub fn emit(&self, record: &EventRecord) {
        if let Some(hook) = &self.on_event {
            hook(record);
        }
    }
}
