//! Claude Code CLI agent backend.
//!
//! Spawns one `claude` process per instance inside its worktree.
//! Output is captured to a log file in the worktree; the completion
//! artifact is the well-known JSON file the prompt instructs the agent
//! to write.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{
    Instance, InstanceStatus, TaskCompletion, COMPLETION_ARTIFACT_FILE,
};
use crate::domain::ports::{AgentBackend, InstanceSpec, Vcs, OUTPUT_TAIL_BYTES};

/// File the agent's prompt is materialized into.
const PROMPT_FILE: &str = "PROMPT.md";
/// File the agent's combined output is captured into.
const OUTPUT_FILE: &str = ".claudio-output.log";

/// Claude Code CLI backend configuration.
#[derive(Debug, Clone)]
pub struct ClaudeCodeConfig {
    /// Path to the claude CLI binary.
    pub binary_path: String,
    /// Model passed to the CLI.
    pub model: Option<String>,
    /// Max agent turns per instance.
    pub max_turns: u32,
    /// Additional CLI flags.
    pub extra_flags: Vec<String>,
}

impl Default for ClaudeCodeConfig {
    fn default() -> Self {
        Self {
            binary_path: "claude".to_string(),
            model: None,
            max_turns: 50,
            extra_flags: vec![],
        }
    }
}

/// Agent backend spawning Claude Code CLI processes.
pub struct ClaudeCodeAgent {
    config: ClaudeCodeConfig,
    vcs: Arc<dyn Vcs>,
    /// instance -> child PID while running
    running: Arc<RwLock<HashMap<Uuid, u32>>>,
}

impl ClaudeCodeAgent {
    pub fn new(config: ClaudeCodeConfig, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            config,
            vcs,
            running: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn worktree_path(spec: &InstanceSpec, instance_id: Uuid) -> PathBuf {
        spec.base_repo
            .join(".claudio")
            .join("worktrees")
            .join(instance_id.to_string())
    }

    fn branch_name(spec: &InstanceSpec, instance_id: Uuid) -> String {
        let short = &instance_id.to_string()[..8];
        format!("{}/task/{short}", spec.branch_prefix)
    }

    /// Create branch + worktree off `base_branch` and materialize the
    /// prompt file.
    async fn materialize(
        &self,
        spec: &InstanceSpec,
        base_branch: &str,
    ) -> OrchestratorResult<Instance> {
        let instance_id = Uuid::new_v4();
        let branch = Self::branch_name(spec, instance_id);
        let worktree = Self::worktree_path(spec, instance_id);

        self.vcs
            .create_branch_from(&spec.base_repo, &branch, base_branch)
            .await?;
        self.vcs
            .create_worktree_from_branch(&spec.base_repo, &worktree, &branch)
            .await?;

        tokio::fs::write(worktree.join(PROMPT_FILE), &spec.prompt).await?;

        let mut instance = Instance::new(worktree, branch, spec.prompt.clone());
        instance.id = instance_id;
        if let Some(name) = &spec.display_name {
            instance.display_name = Some(name.clone());
        }
        debug!(instance_id = %instance.id, branch = %instance.branch, "Instance materialized");
        Ok(instance)
    }

    fn is_pid_alive(pid: u32) -> bool {
        // Signal 0 probes existence without delivering anything.
        #[allow(clippy::cast_possible_wrap)]
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    fn artifact_path(instance: &Instance) -> PathBuf {
        instance.worktree_path.join(COMPLETION_ARTIFACT_FILE)
    }
}

#[async_trait]
impl AgentBackend for ClaudeCodeAgent {
    async fn add_instance(&self, spec: &InstanceSpec) -> OrchestratorResult<Instance> {
        let main = self.vcs.find_main_branch(&spec.base_repo).await?;
        self.materialize(spec, &main).await
    }

    async fn add_instance_from_branch(
        &self,
        spec: &InstanceSpec,
        branch: &str,
    ) -> OrchestratorResult<Instance> {
        self.materialize(spec, branch).await
    }

    async fn start_instance(&self, instance: &mut Instance) -> OrchestratorResult<()> {
        let output_path = instance.worktree_path.join(OUTPUT_FILE);
        let output_file = std::fs::File::create(&output_path)
            .map_err(|e| OrchestratorError::Agent(format!("cannot create output log: {e}")))?;
        let stderr_file = output_file
            .try_clone()
            .map_err(|e| OrchestratorError::Agent(format!("cannot clone output log: {e}")))?;

        let mut args: Vec<String> = vec![
            "--print".to_string(),
            "--max-turns".to_string(),
            self.config.max_turns.to_string(),
        ];
        if let Some(model) = &self.config.model {
            args.push("--model".to_string());
            args.push(model.clone());
        }
        args.extend(self.config.extra_flags.clone());
        args.push("-p".to_string());
        args.push(format!("Follow the instructions in {PROMPT_FILE}."));

        let child = Command::new(&self.config.binary_path)
            .current_dir(&instance.worktree_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .map_err(|e| {
                OrchestratorError::Agent(format!(
                    "failed to spawn agent for instance {}: {e}",
                    instance.id
                ))
            })?;

        let pid = child.id().ok_or_else(|| {
            OrchestratorError::Agent(format!("agent for instance {} has no PID", instance.id))
        })?;
        self.running.write().await.insert(instance.id, pid);

        instance.pid = Some(pid);
        instance.status = InstanceStatus::Working;
        instance.metrics.started_at = Some(chrono::Utc::now());
        info!(instance_id = %instance.id, pid, "Agent started");
        Ok(())
    }

    async fn stop_instance(&self, instance: &Instance) -> OrchestratorResult<()> {
        let pid = {
            let running = self.running.read().await;
            running.get(&instance.id).copied().or(instance.pid)
        };
        if let Some(pid) = pid {
            #[allow(clippy::cast_possible_wrap)]
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                warn!(instance_id = %instance.id, pid, error = %e, "SIGTERM failed");
            }
        }
        self.running.write().await.remove(&instance.id);
        Ok(())
    }

    async fn poll_status(&self, instance: &Instance) -> OrchestratorResult<InstanceStatus> {
        if instance.status.is_terminal() {
            return Ok(instance.status);
        }
        let Some(pid) = instance.pid else {
            return Ok(instance.status);
        };
        if Self::is_pid_alive(pid) {
            return Ok(InstanceStatus::Working);
        }

        // Process exited. The completion artifact decides success; its
        // absence means the agent died without reporting.
        self.running.write().await.remove(&instance.id);
        let has_artifact = tokio::fs::try_exists(Self::artifact_path(instance))
            .await
            .unwrap_or(false);
        if has_artifact {
            Ok(InstanceStatus::Completed)
        } else {
            Ok(InstanceStatus::Error)
        }
    }

    async fn read_output_tail(&self, instance: &Instance) -> OrchestratorResult<String> {
        let path = instance.worktree_path.join(OUTPUT_FILE);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(String::new()),
            Err(e) => return Err(e.into()),
        };

        // Seek so the read stays bounded however large the log grows.
        let len = file.metadata().await?.len();
        let start = len.saturating_sub(OUTPUT_TAIL_BYTES);
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }

        let mut buf = Vec::with_capacity((len - start) as usize);
        file.read_to_end(&mut buf).await?;
        // The seek may land mid-codepoint; lossy conversion tolerates it.
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    async fn read_completion_artifact(
        &self,
        instance: &Instance,
    ) -> OrchestratorResult<Option<TaskCompletion>> {
        let path = Self::artifact_path(instance);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<TaskCompletion>(&bytes) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(e) => {
                warn!(instance_id = %instance.id, error = %e, "Malformed completion artifact");
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::vcs::MockVcs;
    use tempfile::TempDir;

    fn agent() -> ClaudeCodeAgent {
        ClaudeCodeAgent::new(
            ClaudeCodeConfig::default(),
            Arc::new(MockVcs::new("main")),
        )
    }

    fn instance_in(dir: &TempDir) -> Instance {
        Instance::new(
            dir.path().to_path_buf(),
            "claudio/task/abc".to_string(),
            "prompt".to_string(),
        )
    }

    #[tokio::test]
    async fn missing_output_log_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let tail = agent().read_output_tail(&instance_in(&dir)).await.unwrap();
        assert!(tail.is_empty());
    }

    #[tokio::test]
    async fn short_output_is_returned_whole() {
        let dir = TempDir::new().unwrap();
        let instance = instance_in(&dir);
        std::fs::write(dir.path().join(OUTPUT_FILE), "hello agent\n").unwrap();

        let tail = agent().read_output_tail(&instance).await.unwrap();
        assert_eq!(tail, "hello agent\n");
    }

    #[tokio::test]
    async fn long_output_is_tail_bounded() {
        let dir = TempDir::new().unwrap();
        let instance = instance_in(&dir);

        let mut transcript = "x".repeat(2 * OUTPUT_TAIL_BYTES as usize);
        transcript.push_str("THE END");
        std::fs::write(dir.path().join(OUTPUT_FILE), &transcript).unwrap();

        let tail = agent().read_output_tail(&instance).await.unwrap();
        assert_eq!(tail.len() as u64, OUTPUT_TAIL_BYTES);
        assert!(tail.ends_with("THE END"));
    }
}
