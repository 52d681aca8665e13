//! Plan analysis: structured validation reports and dependency
//! statistics. Neither gates execution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::models::{Complexity, Plan};

use super::dependency_resolver::DependencyResolver;

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
    Info,
}

/// A single finding about a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(default)]
    pub related_ids: Vec<String>,
}

/// All findings for one plan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.severity == IssueSeverity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
    }
}

/// Dependency statistics for a plan. Side-channel only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyAnalysis {
    pub total_dependencies: usize,
    /// Tasks with no dependencies.
    pub root_tasks: Vec<String>,
    /// Tasks with three or more dependents.
    pub bottlenecks: Vec<String>,
    /// Longest dependency chain, root first.
    pub critical_path: Vec<String>,
    /// Tasks per layer on average.
    pub average_parallelism: f64,
}

/// Analyzer over validated or unvalidated plans.
#[derive(Debug, Clone, Default)]
pub struct PlanAnalyzer {
    resolver: DependencyResolver,
}

impl PlanAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a structured report: hard validation failures as errors,
    /// same-layer file overlap as warnings, high-complexity tasks as info.
    pub fn report(&self, plan: &Plan) -> ValidationReport {
        let mut issues = Vec::new();

        if let Err(e) = self.resolver.validate(plan) {
            issues.push(ValidationIssue {
                severity: IssueSeverity::Error,
                task_id: None,
                field: None,
                message: e.to_string(),
                suggestion: None,
                related_ids: Vec::new(),
            });
        }

        for layer in &plan.execution_order {
            let mut claimed: HashMap<&str, &str> = HashMap::new();
            for task_id in layer {
                let Some(task) = plan.task(task_id) else {
                    continue;
                };
                for file in &task.files {
                    if let Some(&other) = claimed.get(file.as_str()) {
                        issues.push(ValidationIssue {
                            severity: IssueSeverity::Warning,
                            task_id: Some(task_id.clone()),
                            field: Some("files".to_string()),
                            message: format!(
                                "file {file} is also listed by task {other} in the same layer"
                            ),
                            suggestion: Some(
                                "consider sequencing these tasks to avoid merge conflicts"
                                    .to_string(),
                            ),
                            related_ids: vec![other.to_string()],
                        });
                    } else {
                        claimed.insert(file.as_str(), task_id.as_str());
                    }
                }
            }
        }

        for task in &plan.tasks {
            if task.est_complexity == Complexity::High {
                issues.push(ValidationIssue {
                    severity: IssueSeverity::Info,
                    task_id: Some(task.id.clone()),
                    field: Some("est_complexity".to_string()),
                    message: format!("task {} is estimated high complexity", task.id),
                    suggestion: Some("candidate for splitting".to_string()),
                    related_ids: Vec::new(),
                });
            }
        }

        ValidationReport { issues }
    }

    /// Dependency statistics: totals, roots, bottlenecks, the critical
    /// path (longest-path DFS with memoization), and parallelism ratio.
    pub fn analyze_dependencies(&self, plan: &Plan) -> DependencyAnalysis {
        let total_dependencies = plan.tasks.iter().map(|t| t.depends_on.len()).sum();

        let root_tasks: Vec<String> = plan
            .tasks
            .iter()
            .filter(|t| t.depends_on.is_empty())
            .map(|t| t.id.clone())
            .collect();

        let dependents = plan.dependents();
        let bottlenecks: Vec<String> = plan
            .tasks
            .iter()
            .filter(|t| dependents.get(t.id.as_str()).map_or(0, Vec::len) >= 3)
            .map(|t| t.id.clone())
            .collect();

        let critical_path = self.critical_path(plan);

        let average_parallelism = if plan.execution_order.is_empty() {
            0.0
        } else {
            #[allow(clippy::cast_precision_loss)]
            {
                plan.tasks.len() as f64 / plan.execution_order.len() as f64
            }
        };

        DependencyAnalysis {
            total_dependencies,
            root_tasks,
            bottlenecks,
            critical_path,
            average_parallelism,
        }
    }

    /// Longest dependency chain, memoized per task.
    fn critical_path(&self, plan: &Plan) -> Vec<String> {
        // memo: task id -> longest chain ending at that task (root first)
        fn longest<'a>(
            id: &'a str,
            plan: &'a Plan,
            memo: &mut HashMap<&'a str, Vec<&'a str>>,
        ) -> Vec<&'a str> {
            if let Some(found) = memo.get(id) {
                return found.clone();
            }
            let chain = match plan.task(id) {
                Some(task) => {
                    let mut best: Vec<&str> = Vec::new();
                    for dep in &task.depends_on {
                        let candidate = longest(dep.as_str(), plan, memo);
                        if candidate.len() > best.len() {
                            best = candidate;
                        }
                    }
                    best.push(id);
                    best
                }
                None => vec![id],
            };
            memo.insert(id, chain.clone());
            chain
        }

        let mut memo = HashMap::new();
        let mut best: Vec<&str> = Vec::new();
        for task in &plan.tasks {
            let chain = longest(task.id.as_str(), plan, &mut memo);
            if chain.len() > best.len() {
                best = chain;
            }
        }
        best.into_iter().map(str::to_string).collect()
    }
}
