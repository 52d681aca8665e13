//! Agent port - interface for the agent process backend.

use async_trait::async_trait;
use std::path::PathBuf;
use uuid::Uuid;

use crate::domain::errors::OrchestratorResult;
use crate::domain::models::{Instance, InstanceStatus, TaskCompletion};

/// Maximum bytes returned by [`AgentBackend::read_output_tail`].
///
/// Large enough to hold a trailing artifact block (plans, decisions)
/// while keeping per-poll reads bounded regardless of transcript size.
pub const OUTPUT_TAIL_BYTES: u64 = 64 * 1024;

/// Everything the backend needs to materialize a new instance.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    /// Base repository the worktree is created from.
    pub base_repo: PathBuf,
    /// Session the instance belongs to; used in branch names.
    pub session_id: Uuid,
    /// Prompt the agent will be launched with.
    pub prompt: String,
    /// Branch prefix from the session config.
    pub branch_prefix: String,
    pub display_name: Option<String>,
}

/// Trait for agent process backends.
///
/// The backend owns process spawning, I/O capture, and resume. The
/// completion artifact it exposes is the source of truth for task
/// success; stdout is advisory.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Allocate an ID, create a worktree and branch off the main branch,
    /// materialize the prompt, and return a pending instance.
    async fn add_instance(&self, spec: &InstanceSpec) -> OrchestratorResult<Instance>;

    /// Same as [`add_instance`](Self::add_instance) but based on an
    /// existing branch. Used for per-group consolidators and synthesis.
    async fn add_instance_from_branch(
        &self,
        spec: &InstanceSpec,
        branch: &str,
    ) -> OrchestratorResult<Instance>;

    /// Launch the agent process in its worktree. On success the
    /// instance transitions pending -> working and carries a PID.
    async fn start_instance(&self, instance: &mut Instance) -> OrchestratorResult<()>;

    /// Best-effort termination. Always safe to call.
    async fn stop_instance(&self, instance: &Instance) -> OrchestratorResult<()>;

    /// Current status as observed by the backend.
    async fn poll_status(&self, instance: &Instance) -> OrchestratorResult<InstanceStatus>;

    /// Tail of the agent's captured output: at most
    /// [`OUTPUT_TAIL_BYTES`] of the most recent bytes. Callers poll
    /// this every tick; the read must stay bounded no matter how much
    /// the agent has written.
    async fn read_output_tail(&self, instance: &Instance) -> OrchestratorResult<String>;

    /// The completion artifact, if the agent has written one.
    async fn read_completion_artifact(
        &self,
        instance: &Instance,
    ) -> OrchestratorResult<Option<TaskCompletion>>;
}
