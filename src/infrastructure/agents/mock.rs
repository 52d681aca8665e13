//! Scriptable agent backend for tests.
//!
//! A resolver closure inspects each spawn's prompt and decides how the
//! instance behaves: how many polls it stays working, its final
//! status, its output, and its completion artifact.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::{Instance, InstanceStatus, TaskCompletion};
use crate::domain::ports::{AgentBackend, InstanceSpec, OUTPUT_TAIL_BYTES};

/// Scripted behavior for one spawned instance.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    /// Polls spent in `Working` before finishing.
    pub working_polls: usize,
    pub final_status: InstanceStatus,
    pub output: String,
    pub artifact: Option<TaskCompletion>,
}

impl MockBehavior {
    /// Complete immediately with the given output and artifact.
    pub fn complete(output: impl Into<String>, artifact: Option<TaskCompletion>) -> Self {
        Self {
            working_polls: 0,
            final_status: InstanceStatus::Completed,
            output: output.into(),
            artifact,
        }
    }

    /// Fail immediately with no artifact.
    pub fn error() -> Self {
        Self {
            working_polls: 0,
            final_status: InstanceStatus::Error,
            output: String::new(),
            artifact: None,
        }
    }
}

type Resolver = Box<dyn Fn(&str) -> MockBehavior + Send + Sync>;

#[derive(Default)]
struct MockAgentState {
    /// instance -> (behavior, polls so far)
    instances: HashMap<Uuid, (MockBehavior, usize)>,
    started: Vec<Uuid>,
    stopped: Vec<Uuid>,
}

/// Scriptable [`AgentBackend`].
pub struct MockAgent {
    resolver: Resolver,
    state: Mutex<MockAgentState>,
}

impl MockAgent {
    /// Backend whose behavior per instance is decided by `resolver`
    /// from the spawn prompt.
    pub fn new(resolver: impl Fn(&str) -> MockBehavior + Send + Sync + 'static) -> Self {
        Self {
            resolver: Box::new(resolver),
            state: Mutex::new(MockAgentState::default()),
        }
    }

    /// Backend where every instance completes instantly with no artifact.
    pub fn always_complete() -> Self {
        Self::new(|_| MockBehavior::complete("done", None))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockAgentState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn started_instances(&self) -> Vec<Uuid> {
        self.lock().started.clone()
    }

    pub fn stopped_instances(&self) -> Vec<Uuid> {
        self.lock().stopped.clone()
    }
}

#[async_trait]
impl AgentBackend for MockAgent {
    async fn add_instance(&self, spec: &InstanceSpec) -> OrchestratorResult<Instance> {
        let instance_id = Uuid::new_v4();
        let worktree = spec
            .base_repo
            .join(".claudio")
            .join("worktrees")
            .join(instance_id.to_string());
        let branch = format!(
            "{}/task/{}",
            spec.branch_prefix,
            &instance_id.to_string()[..8]
        );
        let mut instance = Instance::new(worktree, branch, spec.prompt.clone());
        instance.id = instance_id;
        instance.display_name = spec.display_name.clone();

        let behavior = (self.resolver)(&spec.prompt);
        self.lock().instances.insert(instance_id, (behavior, 0));
        Ok(instance)
    }

    async fn add_instance_from_branch(
        &self,
        spec: &InstanceSpec,
        _branch: &str,
    ) -> OrchestratorResult<Instance> {
        self.add_instance(spec).await
    }

    async fn start_instance(&self, instance: &mut Instance) -> OrchestratorResult<()> {
        instance.status = InstanceStatus::Working;
        instance.pid = Some(4242);
        instance.metrics.started_at = Some(chrono::Utc::now());
        self.lock().started.push(instance.id);
        Ok(())
    }

    async fn stop_instance(&self, instance: &Instance) -> OrchestratorResult<()> {
        self.lock().stopped.push(instance.id);
        Ok(())
    }

    async fn poll_status(&self, instance: &Instance) -> OrchestratorResult<InstanceStatus> {
        if instance.status.is_terminal() {
            return Ok(instance.status);
        }
        let mut state = self.lock();
        let Some((behavior, polls)) = state.instances.get_mut(&instance.id) else {
            return Ok(instance.status);
        };
        if instance.status == InstanceStatus::Pending {
            return Ok(InstanceStatus::Pending);
        }
        *polls += 1;
        if *polls > behavior.working_polls {
            Ok(behavior.final_status)
        } else {
            Ok(InstanceStatus::Working)
        }
    }

    async fn read_output_tail(&self, instance: &Instance) -> OrchestratorResult<String> {
        Ok(self
            .lock()
            .instances
            .get(&instance.id)
            .map(|(b, _)| tail_of(&b.output))
            .unwrap_or_default())
    }

    async fn read_completion_artifact(
        &self,
        instance: &Instance,
    ) -> OrchestratorResult<Option<TaskCompletion>> {
        Ok(self
            .lock()
            .instances
            .get(&instance.id)
            .and_then(|(b, _)| b.artifact.clone()))
    }
}

/// Same tail bound the real backend applies.
fn tail_of(output: &str) -> String {
    let bytes = output.as_bytes();
    #[allow(clippy::cast_possible_truncation)]
    let cap = OUTPUT_TAIL_BYTES as usize;
    if bytes.len() <= cap {
        return output.to_string();
    }
    String::from_utf8_lossy(&bytes[bytes.len() - cap..]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_keeps_short_output_whole() {
        assert_eq!(tail_of("short"), "short");
    }

    #[test]
    fn tail_bounds_long_output() {
        #[allow(clippy::cast_possible_truncation)]
        let cap = OUTPUT_TAIL_BYTES as usize;
        let mut long = "y".repeat(cap * 3);
        long.push_str("tail marker");

        let tail = tail_of(&long);
        assert_eq!(tail.len(), cap);
        assert!(tail.ends_with("tail marker"));
    }
}
