//! Plan domain model.
//!
//! A plan is a validated DAG of tasks plus a derived execution order:
//! a list of layers where every task in a layer can run in parallel.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Estimated complexity of a planned task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

impl Default for Complexity {
    fn default() -> Self {
        Self::Medium
    }
}

impl Complexity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "low" | "trivial" => Some(Self::Low),
            "medium" | "moderate" => Some(Self::Medium),
            "high" | "complex" => Some(Self::High),
            _ => None,
        }
    }
}

/// A single task in a plan.
///
/// Task IDs are strings because they originate in LLM-authored plan
/// artifacts (e.g. `task-1`), not in this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedTask {
    /// Stable identifier, unique within the plan.
    pub id: String,
    /// Short title.
    pub title: String,
    /// Full description handed to the executing agent.
    pub description: String,
    /// Files the planner expects the task to touch. Advisory only.
    #[serde(default)]
    pub files: Vec<String>,
    /// IDs of tasks that must complete before this one starts.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Lower value means higher priority.
    #[serde(default)]
    pub priority: i32,
    /// Planner's complexity estimate.
    #[serde(default)]
    pub est_complexity: Complexity,
}

impl PlannedTask {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            files: Vec::new(),
            depends_on: Vec::new(),
            priority: 0,
            est_complexity: Complexity::default(),
        }
    }
}

/// A validated plan: summary, tasks, planner metadata, and the derived
/// execution order (list of parallelizable layers of task IDs).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub summary: String,
    pub tasks: Vec<PlannedTask>,
    #[serde(default)]
    pub insights: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub execution_order: Vec<Vec<String>>,
}

impl Plan {
    /// Look up a task by ID.
    pub fn task(&self, id: &str) -> Option<&PlannedTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn task_mut(&mut self, id: &str) -> Option<&mut PlannedTask> {
        self.tasks.iter_mut().find(|t| t.id == id)
    }

    /// Input-order index of a task. Used for stable scheduling order.
    pub fn task_index(&self, id: &str) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }

    pub fn contains_task(&self, id: &str) -> bool {
        self.task(id).is_some()
    }

    /// Execution-order layer a task belongs to.
    pub fn layer_of(&self, id: &str) -> Option<usize> {
        self.execution_order
            .iter()
            .position(|layer| layer.iter().any(|t| t == id))
    }

    /// Number of execution layers.
    pub fn group_count(&self) -> usize {
        self.execution_order.len()
    }

    /// Width of the widest layer.
    pub fn max_parallelism(&self) -> usize {
        self.execution_order
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
    }

    /// Map of task ID -> IDs of tasks depending on it.
    pub fn dependents(&self) -> HashMap<&str, Vec<&str>> {
        let mut out: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in &self.tasks {
            for dep in &task.depends_on {
                out.entry(dep.as_str()).or_default().push(task.id.as_str());
            }
        }
        out
    }
}
