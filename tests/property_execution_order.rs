//! Property tests for execution-order derivation and scheduling.

use std::collections::HashMap;

use claudio::domain::models::{Plan, PlannedTask, Session, UltraPlanConfig, UltraPlanSession};
use claudio::services::{DependencyResolver, TaskScheduler};
use proptest::prelude::*;

/// Build an acyclic task set: each task may depend only on tasks with a
/// smaller index, which guarantees a DAG by construction.
fn arb_dag(max_tasks: usize) -> impl Strategy<Value = Vec<PlannedTask>> {
    (2..max_tasks)
        .prop_flat_map(|n| {
            let deps = proptest::collection::vec(
                proptest::collection::vec(0..n, 0..3),
                n,
            );
            let priorities = proptest::collection::vec(0i32..5, n);
            (Just(n), deps, priorities)
        })
        .prop_map(|(n, deps, priorities)| {
            (0..n)
                .map(|i| {
                    let mut depends_on: Vec<String> = deps[i]
                        .iter()
                        .filter(|&&d| d < i)
                        .map(|d| format!("t{d}"))
                        .collect();
                    depends_on.sort();
                    depends_on.dedup();
                    PlannedTask {
                        id: format!("t{i}"),
                        title: format!("task {i}"),
                        description: String::new(),
                        files: vec![],
                        depends_on,
                        priority: priorities[i],
                        est_complexity: claudio::domain::models::Complexity::Medium,
                    }
                })
                .collect()
        })
}

proptest! {
    /// Topological soundness: for every edge u -> v, layer(u) < layer(v).
    #[test]
    fn layers_respect_every_edge(tasks in arb_dag(20)) {
        let resolver = DependencyResolver::new();
        let order = resolver.compute_execution_order(&tasks).unwrap();

        let layer_of: HashMap<&str, usize> = order
            .iter()
            .enumerate()
            .flat_map(|(layer, ids)| ids.iter().map(move |id| (id.as_str(), layer)))
            .collect();

        for task in &tasks {
            for dep in &task.depends_on {
                prop_assert!(
                    layer_of[dep.as_str()] < layer_of[task.id.as_str()],
                    "dependency {} must sit in an earlier layer than {}",
                    dep,
                    task.id
                );
            }
        }
    }

    /// Completeness: the layers cover every task exactly once.
    #[test]
    fn layers_cover_all_tasks_exactly_once(tasks in arb_dag(20)) {
        let resolver = DependencyResolver::new();
        let order = resolver.compute_execution_order(&tasks).unwrap();

        let total: usize = order.iter().map(Vec::len).sum();
        prop_assert_eq!(total, tasks.len());

        let mut seen = std::collections::HashSet::new();
        for id in order.iter().flatten() {
            prop_assert!(seen.insert(id.clone()), "task {} appears twice", id);
        }
    }

    /// The max-parallel split keeps every task in order relative to its
    /// original layer predecessors and successors.
    #[test]
    fn width_cap_preserves_order(tasks in arb_dag(20), cap in 1usize..4) {
        let resolver = DependencyResolver::new();
        let order = resolver.compute_execution_order(&tasks).unwrap();
        let capped = resolver.cap_layer_width(order.clone(), cap);

        // No layer exceeds the cap.
        for layer in &capped {
            prop_assert!(layer.len() <= cap);
        }

        // Flattened task order is unchanged.
        let flat: Vec<&String> = order.iter().flatten().collect();
        let capped_flat: Vec<&String> = capped.iter().flatten().collect();
        prop_assert_eq!(flat, capped_flat);

        // Edges still point forward across the split layers.
        let layer_of: HashMap<&str, usize> = capped
            .iter()
            .enumerate()
            .flat_map(|(layer, ids)| ids.iter().map(move |id| (id.as_str(), layer)))
            .collect();
        for task in &tasks {
            for dep in &task.depends_on {
                prop_assert!(layer_of[dep.as_str()] < layer_of[task.id.as_str()]);
            }
        }
    }

    /// Scheduler idempotence: same state, same answer.
    #[test]
    fn scheduler_is_idempotent(tasks in arb_dag(15)) {
        let resolver = DependencyResolver::new();
        let mut plan = Plan {
            summary: "generated".to_string(),
            tasks,
            ..Plan::default()
        };
        plan.execution_order = resolver.compute_execution_order(&plan.tasks).unwrap();

        let session = Session::new("prop", "/repo");
        let mut up = UltraPlanSession::new("objective", UltraPlanConfig::default());
        up.plan = Some(plan);

        let scheduler = TaskScheduler::new();
        let first = scheduler.ready_tasks(&session, &up);
        let second = scheduler.ready_tasks(&session, &up);
        prop_assert_eq!(first, second);
    }

    /// Cycles are always rejected: reversing one dependency edge into a
    /// two-node loop breaks the sort.
    #[test]
    fn cycles_are_rejected(tasks in arb_dag(10)) {
        // Find a task with a dependency and close the loop.
        let Some(dependent) = tasks.iter().find(|t| !t.depends_on.is_empty()).cloned() else {
            return Ok(());
        };
        let dep_id = dependent.depends_on[0].clone();

        let mut cyclic = tasks;
        if let Some(dep_task) = cyclic.iter_mut().find(|t| t.id == dep_id) {
            dep_task.depends_on.push(dependent.id.clone());
        }

        let resolver = DependencyResolver::new();
        prop_assert!(resolver.compute_execution_order(&cyclic).is_err());
        prop_assert!(resolver.detect_cycle(&cyclic).is_some());
    }
}
