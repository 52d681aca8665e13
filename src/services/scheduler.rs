//! Task scheduler: decides which tasks may start right now.

use crate::domain::models::{Session, UltraPlanSession};

/// Chooses ready tasks respecting the current execution group, the
/// group-decision gate, and task dependencies. Stateless; idempotent
/// for a fixed session state.
#[derive(Debug, Clone, Default)]
pub struct TaskScheduler;

impl TaskScheduler {
    pub fn new() -> Self {
        Self
    }

    /// Tasks that may start now, in stable (priority, input index) order.
    ///
    /// Returns nothing while an operator decision is pending, once every
    /// layer has run, or when no candidate has all dependencies
    /// completed. Tasks with a non-terminal instance are in flight and
    /// excluded.
    pub fn ready_tasks(&self, session: &Session, up: &UltraPlanSession) -> Vec<String> {
        if up.awaiting_decision() {
            return Vec::new();
        }

        let Some(plan) = up.plan.as_ref() else {
            return Vec::new();
        };

        if plan.execution_order.is_empty() {
            return self.ready_tasks_legacy(session, up);
        }

        let group = up.current_group;
        let Some(layer) = plan.execution_order.get(group) else {
            return Vec::new();
        };

        let mut ready: Vec<&String> = layer
            .iter()
            .filter(|task_id| !up.is_task_done(task_id))
            .filter(|task_id| !self.is_in_flight(session, up, task_id))
            .filter(|task_id| self.deps_completed(up, plan_deps(plan, task_id)))
            .collect();

        ready.sort_by_key(|task_id| sort_key(plan, task_id));
        ready.into_iter().cloned().collect()
    }

    /// Fallback for legacy plans without an execution order: release any
    /// task whose dependencies are all completed, ignoring groups.
    fn ready_tasks_legacy(&self, session: &Session, up: &UltraPlanSession) -> Vec<String> {
        let Some(plan) = up.plan.as_ref() else {
            return Vec::new();
        };

        let mut ready: Vec<&String> = plan
            .tasks
            .iter()
            .map(|t| &t.id)
            .filter(|task_id| !up.is_task_done(task_id))
            .filter(|task_id| !self.is_in_flight(session, up, task_id))
            .filter(|task_id| self.deps_completed(up, plan_deps(plan, task_id)))
            .collect();

        ready.sort_by_key(|task_id| sort_key(plan, task_id));
        ready.into_iter().cloned().collect()
    }

    /// A task is in flight when it is mapped to an instance that still
    /// occupies a scheduling slot.
    fn is_in_flight(&self, session: &Session, up: &UltraPlanSession, task_id: &str) -> bool {
        up.task_to_instance
            .get(task_id)
            .and_then(|id| session.instance(*id))
            .is_some_and(|i| i.status.is_in_flight())
    }

    /// Dependencies must be *completed*, not merely done.
    fn deps_completed<'a>(
        &self,
        up: &UltraPlanSession,
        mut deps: impl Iterator<Item = &'a String>,
    ) -> bool {
        deps.all(|dep| up.completed_tasks.contains(dep))
    }
}

fn plan_deps<'a>(
    plan: &'a crate::domain::models::Plan,
    task_id: &str,
) -> impl Iterator<Item = &'a String> {
    const EMPTY: &[String] = &[];
    plan.task(task_id)
        .map_or(EMPTY.iter(), |t| t.depends_on.iter())
}

fn sort_key(plan: &crate::domain::models::Plan, task_id: &str) -> (i32, usize) {
    let index = plan.task_index(task_id).unwrap_or(usize::MAX);
    let priority = plan.task(task_id).map_or(i32::MAX, |t| t.priority);
    (priority, index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{
        GroupDecision, Instance, InstanceStatus, Plan, PlannedTask, UltraPlanConfig,
    };
    use crate::services::dependency_resolver::DependencyResolver;
    use std::path::PathBuf;

    fn task(id: &str, deps: &[&str]) -> PlannedTask {
        PlannedTask {
            depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
            ..PlannedTask::new(id, id)
        }
    }

    fn fixture() -> (Session, UltraPlanSession) {
        let resolver = DependencyResolver::new();
        let mut plan = Plan {
            summary: "diamond".to_string(),
            tasks: vec![
                task("t1", &[]),
                task("t2", &["t1"]),
                task("t3", &["t1"]),
                task("t4", &["t2", "t3"]),
            ],
            ..Plan::default()
        };
        plan.execution_order = resolver.compute_execution_order(&plan.tasks).unwrap();

        let session = Session::new("test", "/repo");
        let mut up = UltraPlanSession::new("objective", UltraPlanConfig::default());
        up.plan = Some(plan);
        (session, up)
    }

    #[test]
    fn first_group_is_ready() {
        let scheduler = TaskScheduler::new();
        let (session, up) = fixture();
        assert_eq!(scheduler.ready_tasks(&session, &up), vec!["t1"]);
    }

    #[test]
    fn decision_gate_blocks_everything() {
        let scheduler = TaskScheduler::new();
        let (session, mut up) = fixture();
        up.group_decision = Some(GroupDecision {
            group_index: 0,
            succeeded_tasks: vec![],
            failed_tasks: vec!["t1".to_string()],
            awaiting: true,
        });
        assert!(scheduler.ready_tasks(&session, &up).is_empty());
    }

    #[test]
    fn in_flight_tasks_are_excluded() {
        let scheduler = TaskScheduler::new();
        let (mut session, mut up) = fixture();

        let mut inst = Instance::new(
            PathBuf::from("/wt"),
            "b".to_string(),
            "p".to_string(),
        );
        inst.status = InstanceStatus::Working;
        let id = inst.id;
        session.instances.push(inst);
        up.task_to_instance.insert("t1".to_string(), id);

        assert!(scheduler.ready_tasks(&session, &up).is_empty());

        // Terminal instance frees the slot, but the task must then be
        // marked done to leave the candidate set.
        session.instance_mut(id).unwrap().status = InstanceStatus::Completed;
        up.mark_task_completed("t1").unwrap();
        up.current_group = 1;
        assert_eq!(scheduler.ready_tasks(&session, &up), vec!["t2", "t3"]);
    }

    #[test]
    fn failed_dependency_blocks_dependent() {
        let scheduler = TaskScheduler::new();
        let (session, mut up) = fixture();
        up.mark_task_completed("t1").unwrap();
        up.current_group = 1;
        up.mark_task_completed("t2").unwrap();
        up.mark_task_failed("t3").unwrap();
        up.current_group = 2;

        // t4 depends on t3 which failed: not ready even though done.
        assert!(scheduler.ready_tasks(&session, &up).is_empty());
    }

    #[test]
    fn past_last_group_returns_empty() {
        let scheduler = TaskScheduler::new();
        let (session, mut up) = fixture();
        up.current_group = 3;
        assert!(scheduler.ready_tasks(&session, &up).is_empty());
    }

    #[test]
    fn idempotent_without_state_change() {
        let scheduler = TaskScheduler::new();
        let (session, up) = fixture();
        let first = scheduler.ready_tasks(&session, &up);
        let second = scheduler.ready_tasks(&session, &up);
        assert_eq!(first, second);
    }

    #[test]
    fn legacy_mode_ignores_groups() {
        let scheduler = TaskScheduler::new();
        let (session, mut up) = fixture();
        up.plan.as_mut().unwrap().execution_order.clear();
        up.mark_task_completed("t1").unwrap();

        // Both t2 and t3 release at once despite no layering.
        assert_eq!(scheduler.ready_tasks(&session, &up), vec!["t2", "t3"]);
    }

    #[test]
    fn stable_priority_order() {
        let scheduler = TaskScheduler::new();
        let resolver = DependencyResolver::new();
        let mut high = task("high", &[]);
        high.priority = 0;
        let mut low = task("low", &[]);
        low.priority = 9;
        let mut plan = Plan {
            summary: "prio".to_string(),
            tasks: vec![low, high],
            ..Plan::default()
        };
        plan.execution_order = resolver.compute_execution_order(&plan.tasks).unwrap();

        let session = Session::new("test", "/repo");
        let mut up = UltraPlanSession::new("objective", UltraPlanConfig::default());
        up.plan = Some(plan);

        assert_eq!(scheduler.ready_tasks(&session, &up), vec!["high", "low"]);
    }
}
