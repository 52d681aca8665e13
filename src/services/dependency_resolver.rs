//! Service for validating plan dependency graphs and deriving layered
//! execution orders.

use std::collections::{HashMap, HashSet};

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{Plan, PlannedTask};

/// Resolves task dependencies, detects cycles, and computes the layered
/// topological execution order.
#[derive(Debug, Clone, Default)]
pub struct DependencyResolver;

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util<'a>(
    node: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    visited: &mut HashSet<&'a str>,
    rec_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

impl DependencyResolver {
    pub fn new() -> Self {
        Self
    }

    /// Validate a plan: non-empty task list, unique IDs, no
    /// self-dependencies, no dangling dependencies, no cycles.
    pub fn validate(&self, plan: &Plan) -> OrchestratorResult<()> {
        if plan.tasks.is_empty() {
            return Err(OrchestratorError::PlanValidation(
                "plan has no tasks".to_string(),
            ));
        }

        let mut ids: HashSet<&str> = HashSet::new();
        for task in &plan.tasks {
            if !ids.insert(task.id.as_str()) {
                return Err(OrchestratorError::PlanValidation(format!(
                    "duplicate task id {}",
                    task.id
                )));
            }
        }

        for task in &plan.tasks {
            for dep in &task.depends_on {
                if dep == &task.id {
                    return Err(OrchestratorError::PlanValidation(format!(
                        "task {} depends on itself",
                        task.id
                    )));
                }
                if !ids.contains(dep.as_str()) {
                    return Err(OrchestratorError::PlanValidation(format!(
                        "task {} depends on unknown task {dep}",
                        task.id
                    )));
                }
            }
        }

        if let Some(cycle) = self.detect_cycle(&plan.tasks) {
            return Err(OrchestratorError::DependencyCycle(cycle.join(" -> ")));
        }

        Ok(())
    }

    /// Detect a dependency cycle. Returns the cycle path if found.
    pub fn detect_cycle(&self, tasks: &[PlannedTask]) -> Option<Vec<String>> {
        let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in tasks {
            graph
                .entry(task.id.as_str())
                .or_default()
                .extend(task.depends_on.iter().map(String::as_str));
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        // Iterate in input order for a deterministic cycle report.
        for task in tasks {
            if !visited.contains(task.id.as_str())
                && detect_cycle_util(
                    task.id.as_str(),
                    &graph,
                    &mut visited,
                    &mut rec_stack,
                    &mut path,
                )
            {
                return Some(path.into_iter().map(str::to_string).collect());
            }
        }

        None
    }

    /// Kahn-style layered topological sort.
    ///
    /// Each layer holds tasks whose dependencies all sit in earlier
    /// layers. Within a layer order is stable: priority ascending, then
    /// input order. If the layers do not cover every task the graph has
    /// a cycle and the plan is invalid.
    pub fn compute_execution_order(
        &self,
        tasks: &[PlannedTask],
    ) -> OrchestratorResult<Vec<Vec<String>>> {
        let index_of: HashMap<&str, usize> = tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.as_str(), i))
            .collect();

        let mut in_degree: HashMap<&str, usize> = HashMap::new();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
        for task in tasks {
            in_degree.entry(task.id.as_str()).or_insert(0);
            for dep in &task.depends_on {
                dependents
                    .entry(dep.as_str())
                    .or_default()
                    .push(task.id.as_str());
                *in_degree.entry(task.id.as_str()).or_insert(0) += 1;
            }
        }

        let sort_key = |id: &str| {
            let idx = index_of[id];
            (tasks[idx].priority, idx)
        };

        let mut current: Vec<&str> = tasks
            .iter()
            .filter(|t| in_degree[t.id.as_str()] == 0)
            .map(|t| t.id.as_str())
            .collect();
        current.sort_by_key(|id| sort_key(id));

        let mut layers: Vec<Vec<String>> = Vec::new();
        let mut placed = 0usize;

        while !current.is_empty() {
            placed += current.len();
            let mut next: Vec<&str> = Vec::new();
            for &id in &current {
                if let Some(children) = dependents.get(id) {
                    for &child in children {
                        let degree = in_degree.get_mut(child).unwrap();
                        *degree -= 1;
                        if *degree == 0 {
                            next.push(child);
                        }
                    }
                }
            }
            next.sort_by_key(|id| sort_key(id));
            layers.push(current.iter().map(|id| (*id).to_string()).collect());
            current = next;
        }

        if placed != tasks.len() {
            return Err(OrchestratorError::PlanValidation(format!(
                "execution order covers {placed} of {} tasks; plan has a cycle",
                tasks.len()
            )));
        }

        Ok(layers)
    }

    /// Forward DFS from `candidate_dep`: would adding an edge
    /// `task -> candidate_dep` create a cycle, i.e. is `task` reachable
    /// from `candidate_dep` along existing dependency edges?
    pub fn has_circular_dependency(
        &self,
        tasks: &[PlannedTask],
        task_id: &str,
        candidate_dep: &str,
    ) -> bool {
        if task_id == candidate_dep {
            return true;
        }

        let by_id: HashMap<&str, &PlannedTask> =
            tasks.iter().map(|t| (t.id.as_str(), t)).collect();

        let mut stack = vec![candidate_dep];
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(id) = stack.pop() {
            if id == task_id {
                return true;
            }
            if !seen.insert(id) {
                continue;
            }
            if let Some(task) = by_id.get(id) {
                stack.extend(task.depends_on.iter().map(String::as_str));
            }
        }
        false
    }

    /// Split every layer wider than `max_parallel` into consecutive
    /// sub-layers of at most `max_parallel` tasks. Dependency
    /// correctness is preserved: a split layer still sits between the
    /// same predecessor and successor layers, and priority order within
    /// the split is retained. `max_parallel == 0` is a no-op.
    pub fn cap_layer_width(
        &self,
        execution_order: Vec<Vec<String>>,
        max_parallel: usize,
    ) -> Vec<Vec<String>> {
        if max_parallel == 0 {
            return execution_order;
        }
        let mut out = Vec::with_capacity(execution_order.len());
        for layer in execution_order {
            if layer.len() <= max_parallel {
                out.push(layer);
            } else {
                for chunk in layer.chunks(max_parallel) {
                    out.push(chunk.to_vec());
                }
            }
        }
        out
    }
}
