//! `run` and `resume` handlers: wire adapters to the coordinator and
//! drive a session.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::domain::models::{
    ConsolidationMode, ConsolidationPhase, Session, UltraPlanConfig, UltraPlanSession,
};
use crate::domain::ports::{AgentBackend, ReviewService, Vcs};
use crate::infrastructure::agents::{ClaudeCodeAgent, ClaudeCodeConfig};
use crate::infrastructure::config::Config;
use crate::infrastructure::review::GithubReviewService;
use crate::infrastructure::vcs::GitVcs;
use crate::services::phases::PhaseTiming;
use crate::services::{SessionStore, UltraPlanCoordinator};

/// Flag overrides applied on top of the loaded config.
pub struct RunOverrides {
    pub multi_pass: bool,
    pub max_parallel: Option<usize>,
    pub branch_prefix: Option<String>,
    pub mode: Option<String>,
    pub draft: bool,
    pub labels: Vec<String>,
}

fn effective_ultra_plan_config(
    config: &Config,
    overrides: &RunOverrides,
) -> Result<UltraPlanConfig> {
    let mut up = config.ultra_plan.clone();
    if overrides.multi_pass {
        up.multi_pass = true;
    }
    if let Some(max_parallel) = overrides.max_parallel {
        up.max_parallel = max_parallel;
    }
    if let Some(prefix) = &overrides.branch_prefix {
        up.branch_prefix = prefix.clone();
    }
    if let Some(mode) = &overrides.mode {
        up.consolidation_mode = match mode.as_str() {
            "stacked" => ConsolidationMode::Stacked,
            "single" => ConsolidationMode::Single,
            other => bail!("invalid consolidation mode '{other}' (stacked|single)"),
        };
    }
    if overrides.draft {
        up.create_draft_prs = true;
    }
    if !overrides.labels.is_empty() {
        up.pr_labels = overrides.labels.clone();
    }
    Ok(up)
}

fn build_timing(config: &Config) -> PhaseTiming {
    PhaseTiming {
        poll_interval: Duration::from_secs(config.timing.poll_interval_secs),
        instance_timeout: Duration::from_secs(config.timing.instance_timeout_secs),
        stall_timeout: Duration::from_secs(config.timing.stall_timeout_secs),
    }
}

fn build_ports(
    config: &Config,
) -> Result<(Arc<dyn Vcs>, Arc<dyn AgentBackend>, Arc<dyn ReviewService>)> {
    let vcs: Arc<dyn Vcs> = Arc::new(GitVcs::new());
    let agent: Arc<dyn AgentBackend> = Arc::new(ClaudeCodeAgent::new(
        ClaudeCodeConfig {
            binary_path: config.agent.binary_path.clone(),
            model: config.agent.model.clone(),
            max_turns: config.agent.max_turns,
            extra_flags: vec![],
        },
        vcs.clone(),
    ));
    let repo_slug = config
        .github
        .repo_slug
        .clone()
        .context("github.repo_slug must be configured (owner/repo)")?;
    let review: Arc<dyn ReviewService> =
        Arc::new(GithubReviewService::from_env(repo_slug).map_err(anyhow::Error::new)?);
    Ok((vcs, agent, review))
}

/// Start a fresh session for an objective and run it to completion or
/// to a pause point.
pub async fn handle_run(
    config: &Config,
    objective: String,
    overrides: RunOverrides,
    json: bool,
) -> Result<()> {
    let base_repo = std::env::current_dir().context("cannot resolve working directory")?;
    let store = SessionStore::for_repo(&base_repo);
    if store.exists().await {
        bail!(
            "a session document already exists at {}; use `claudio resume` or remove it",
            store.path().display()
        );
    }

    let up_config = effective_ultra_plan_config(config, &overrides)?;
    let mut session = Session::new(objective.clone(), base_repo);
    session.attach_ultra_plan(UltraPlanSession::new(objective, up_config))?;

    let (vcs, agent, review) = build_ports(config)?;
    let coordinator =
        UltraPlanCoordinator::new(session, agent, vcs, review, build_timing(config));

    coordinator.run().await?;
    report_outcome(&coordinator, json).await
}

/// Resume a persisted session: recover interrupted instances, then
/// continue the phase loop or a paused consolidation.
pub async fn handle_resume(config: &Config, json: bool) -> Result<()> {
    let base_repo = std::env::current_dir().context("cannot resolve working directory")?;
    let store = SessionStore::for_repo(&base_repo);
    let mut session = store
        .load()
        .await
        .context("no session to resume in this repository")?;

    if session.needs_recovery() {
        let interrupted = session.mark_instances_interrupted();
        warn!(interrupted, "Recovered an unclean shutdown");
        store.save(&session).await?;
    }
    session.clean_shutdown = false;

    let consolidation_paused = session
        .ultra_plan
        .as_ref()
        .and_then(|up| up.consolidation.as_ref())
        .is_some_and(|c| c.phase == ConsolidationPhase::Paused);

    let (vcs, agent, review) = build_ports(config)?;
    let coordinator =
        UltraPlanCoordinator::new(session, agent, vcs, review, build_timing(config));

    if consolidation_paused {
        info!("Resuming paused consolidation");
        // Pushes are the transient part of a resumed consolidation;
        // route the whole resume through the retry manager.
        coordinator
            .retry_manager()
            .run_vcs("resume_consolidation", || {
                coordinator.resume_consolidation()
            })
            .await?;
    } else {
        coordinator.run().await?;
    }
    report_outcome(&coordinator, json).await
}

async fn report_outcome(coordinator: &UltraPlanCoordinator, json: bool) -> Result<()> {
    let (completed, total, phase) = coordinator.get_progress().await;
    let session = coordinator.session().await;
    let pr_urls = session
        .ultra_plan
        .as_ref()
        .and_then(|up| up.consolidation.as_ref())
        .map(|c| c.pr_urls.clone())
        .unwrap_or_default();

    if json {
        let summary = serde_json::json!({
            "phase": phase.as_str(),
            "completed_tasks": completed,
            "total_tasks": total,
            "pr_urls": pr_urls,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("phase: {phase}");
        println!("tasks: {completed}/{total} completed");
        for url in pr_urls {
            println!("review: {url}");
        }
    }

    super::status::print_pauses(&session);
    Ok(())
}
