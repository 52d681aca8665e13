//! Plan editing operations.
//!
//! Every operation leaves the plan valid; operations that alter
//! dependencies recompute the execution order. Invalid edits are
//! rejected and the plan is left untouched.

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{Plan, PlannedTask};

use super::dependency_resolver::DependencyResolver;

/// Editor over a plan. Holds the plan by value; callers take it back
/// with [`into_plan`](Self::into_plan).
#[derive(Debug, Clone)]
pub struct PlanEditor {
    plan: Plan,
    resolver: DependencyResolver,
}

impl PlanEditor {
    pub fn new(plan: Plan) -> Self {
        Self {
            plan,
            resolver: DependencyResolver::new(),
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn into_plan(self) -> Plan {
        self.plan
    }

    /// Add a task. Its dependencies must already exist.
    pub fn add_task(&mut self, task: PlannedTask) -> OrchestratorResult<()> {
        let mut candidate = self.plan.clone();
        candidate.tasks.push(task);
        self.commit(candidate)
    }

    /// Delete a task. Other tasks' dependencies on it are removed.
    pub fn delete_task(&mut self, task_id: &str) -> OrchestratorResult<()> {
        if !self.plan.contains_task(task_id) {
            return Err(OrchestratorError::TaskNotFound(task_id.to_string()));
        }
        let mut candidate = self.plan.clone();
        candidate.tasks.retain(|t| t.id != task_id);
        for task in &mut candidate.tasks {
            task.depends_on.retain(|d| d != task_id);
        }
        self.commit(candidate)
    }

    /// Replace a task's dependency list.
    pub fn update_task_dependencies(
        &mut self,
        task_id: &str,
        depends_on: Vec<String>,
    ) -> OrchestratorResult<()> {
        // Probe reachability before mutating so the error names the edge.
        for dep in &depends_on {
            if self
                .resolver
                .has_circular_dependency(&self.plan.tasks, task_id, dep)
            {
                return Err(OrchestratorError::DependencyCycle(format!(
                    "{task_id} -> {dep}"
                )));
            }
        }

        let mut candidate = self.plan.clone();
        let task = candidate
            .task_mut(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        task.depends_on = depends_on;
        self.commit(candidate)
    }

    /// Split a task into sequential parts `{id}-1 .. {id}-N`.
    ///
    /// The first part inherits the original dependencies; each further
    /// part depends on the previous one; dependents of the original are
    /// rewired to the last part.
    pub fn split_task(
        &mut self,
        task_id: &str,
        parts: Vec<(String, String)>,
    ) -> OrchestratorResult<()> {
        if parts.len() < 2 {
            return Err(OrchestratorError::PlanValidation(
                "split requires at least two parts".to_string(),
            ));
        }
        let original = self
            .plan
            .task(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;

        let mut candidate = self.plan.clone();
        let position = candidate.task_index(task_id).unwrap();
        candidate.tasks.remove(position);

        let part_ids: Vec<String> = (1..=parts.len())
            .map(|i| format!("{task_id}-{i}"))
            .collect();

        for task in &mut candidate.tasks {
            for dep in &mut task.depends_on {
                if dep == task_id {
                    *dep = part_ids.last().unwrap().clone();
                }
            }
        }

        for (i, (title, description)) in parts.into_iter().enumerate() {
            let depends_on = if i == 0 {
                original.depends_on.clone()
            } else {
                vec![part_ids[i - 1].clone()]
            };
            let part = PlannedTask {
                id: part_ids[i].clone(),
                title,
                description,
                files: original.files.clone(),
                depends_on,
                priority: original.priority,
                est_complexity: original.est_complexity,
            };
            candidate.tasks.insert(position + i, part);
        }

        self.commit(candidate)
    }

    /// Merge tasks into the first of them. Dependencies are unioned
    /// (minus the merged IDs); dependents are rewired to the survivor.
    pub fn merge_tasks(&mut self, task_ids: &[String]) -> OrchestratorResult<()> {
        if task_ids.len() < 2 {
            return Err(OrchestratorError::PlanValidation(
                "merge requires at least two tasks".to_string(),
            ));
        }
        for id in task_ids {
            if !self.plan.contains_task(id) {
                return Err(OrchestratorError::TaskNotFound(id.clone()));
            }
        }

        let survivor_id = &task_ids[0];
        let absorbed: Vec<String> = task_ids[1..].to_vec();
        let mut candidate = self.plan.clone();

        let mut merged_deps: Vec<String> = Vec::new();
        let mut merged_files: Vec<String> = Vec::new();
        let mut merged_descriptions: Vec<String> = Vec::new();
        for id in task_ids {
            let task = candidate.task(id).unwrap().clone();
            merged_descriptions.push(task.description);
            for dep in task.depends_on {
                if !task_ids.contains(&dep) && !merged_deps.contains(&dep) {
                    merged_deps.push(dep);
                }
            }
            for file in task.files {
                if !merged_files.contains(&file) {
                    merged_files.push(file);
                }
            }
        }

        candidate.tasks.retain(|t| !absorbed.contains(&t.id));
        for task in &mut candidate.tasks {
            for dep in &mut task.depends_on {
                if absorbed.contains(dep) {
                    *dep = survivor_id.clone();
                }
            }
            task.depends_on.dedup();
        }

        let survivor = candidate.task_mut(survivor_id).unwrap();
        survivor.depends_on = merged_deps;
        survivor.files = merged_files;
        survivor.description = merged_descriptions.join("\n");

        self.commit(candidate)
    }

    /// Move a task one position earlier in the input order.
    /// Affects the stable tiebreak within a layer, not dependencies.
    pub fn move_task_up(&mut self, task_id: &str) -> OrchestratorResult<()> {
        let index = self
            .plan
            .task_index(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        if index == 0 {
            return Ok(());
        }
        let mut candidate = self.plan.clone();
        candidate.tasks.swap(index, index - 1);
        self.commit(candidate)
    }

    /// Move a task one position later in the input order.
    pub fn move_task_down(&mut self, task_id: &str) -> OrchestratorResult<()> {
        let index = self
            .plan
            .task_index(task_id)
            .ok_or_else(|| OrchestratorError::TaskNotFound(task_id.to_string()))?;
        if index + 1 >= self.plan.tasks.len() {
            return Ok(());
        }
        let mut candidate = self.plan.clone();
        candidate.tasks.swap(index, index + 1);
        self.commit(candidate)
    }

    /// Validate the candidate, recompute its execution order, and adopt
    /// it. On any failure the current plan is untouched.
    fn commit(&mut self, mut candidate: Plan) -> OrchestratorResult<()> {
        self.resolver.validate(&candidate)?;
        candidate.execution_order = self.resolver.compute_execution_order(&candidate.tasks)?;
        self.plan = candidate;
        Ok(())
    }
}
