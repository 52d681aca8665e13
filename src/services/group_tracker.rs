//! Group tracker: maps tasks to execution groups and advances the
//! current group when its tasks are finished.

use tracing::{debug, info};

use crate::domain::models::UltraPlanSession;

#[derive(Debug, Clone, Default)]
pub struct GroupTracker;

impl GroupTracker {
    pub fn new() -> Self {
        Self
    }

    /// Execution-order group a task belongs to, or `None` if the task
    /// is not in the plan's order.
    pub fn group_of(&self, up: &UltraPlanSession, task_id: &str) -> Option<usize> {
        up.plan.as_ref().and_then(|p| p.layer_of(task_id))
    }

    /// Every task in the current group is completed or failed.
    pub fn is_current_group_done(&self, up: &UltraPlanSession) -> bool {
        let Some(plan) = up.plan.as_ref() else {
            return false;
        };
        match plan.execution_order.get(up.current_group) {
            Some(layer) => layer.iter().all(|t| up.is_task_done(t)),
            // Past the last layer: nothing left to finish.
            None => true,
        }
    }

    /// Advance the current group if it is done. Returns
    /// `(advanced, previous_group)`. Advancing past the last layer
    /// leaves `current_group == len(execution_order)`, which marks
    /// execution complete.
    pub fn advance_if_done(&self, up: &mut UltraPlanSession) -> (bool, usize) {
        let previous = up.current_group;
        let Some(plan) = up.plan.as_ref() else {
            return (false, previous);
        };
        if up.current_group >= plan.execution_order.len() {
            return (false, previous);
        }
        if !self.is_current_group_done(up) {
            return (false, previous);
        }

        up.current_group += 1;
        if up.execution_complete() {
            info!(groups = plan.execution_order.len(), "All execution groups finished");
        } else {
            debug!(from = previous, to = up.current_group, "Advanced execution group");
        }
        (true, previous)
    }

    /// Bucket label for an execution group, 1-based for humans.
    pub fn group_label(index: usize) -> String {
        format!("Group {}", index + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Plan, PlannedTask, UltraPlanConfig};
    use crate::services::dependency_resolver::DependencyResolver;

    fn up_with_layers() -> UltraPlanSession {
        let resolver = DependencyResolver::new();
        let tasks = vec![
            PlannedTask::new("t1", "one"),
            PlannedTask {
                depends_on: vec!["t1".to_string()],
                ..PlannedTask::new("t2", "two")
            },
            PlannedTask {
                depends_on: vec!["t1".to_string()],
                ..PlannedTask::new("t3", "three")
            },
        ];
        let mut plan = Plan {
            summary: "layers".to_string(),
            tasks,
            ..Plan::default()
        };
        plan.execution_order = resolver.compute_execution_order(&plan.tasks).unwrap();
        let mut up = UltraPlanSession::new("obj", UltraPlanConfig::default());
        up.plan = Some(plan);
        up
    }

    #[test]
    fn group_of_searches_execution_order() {
        let tracker = GroupTracker::new();
        let up = up_with_layers();
        assert_eq!(tracker.group_of(&up, "t1"), Some(0));
        assert_eq!(tracker.group_of(&up, "t3"), Some(1));
        assert_eq!(tracker.group_of(&up, "nope"), None);
    }

    #[test]
    fn advance_requires_all_tasks_done() {
        let tracker = GroupTracker::new();
        let mut up = up_with_layers();

        let (advanced, previous) = tracker.advance_if_done(&mut up);
        assert!(!advanced);
        assert_eq!(previous, 0);

        up.mark_task_completed("t1").unwrap();
        let (advanced, previous) = tracker.advance_if_done(&mut up);
        assert!(advanced);
        assert_eq!(previous, 0);
        assert_eq!(up.current_group, 1);
    }

    #[test]
    fn failed_tasks_count_as_done_for_advancement() {
        let tracker = GroupTracker::new();
        let mut up = up_with_layers();
        up.mark_task_completed("t1").unwrap();
        tracker.advance_if_done(&mut up);

        up.mark_task_completed("t2").unwrap();
        up.mark_task_failed("t3").unwrap();
        let (advanced, _) = tracker.advance_if_done(&mut up);
        assert!(advanced);
        assert!(up.execution_complete());
    }

    #[test]
    fn advance_past_end_is_a_noop() {
        let tracker = GroupTracker::new();
        let mut up = up_with_layers();
        up.current_group = 2;
        let (advanced, previous) = tracker.advance_if_done(&mut up);
        assert!(!advanced);
        assert_eq!(previous, 2);
    }

    #[test]
    fn labels_are_one_based() {
        assert_eq!(GroupTracker::group_label(0), "Group 1");
        assert_eq!(GroupTracker::group_label(2), "Group 3");
    }
}
