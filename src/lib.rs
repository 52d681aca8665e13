//! Claudio - multi-agent coding orchestrator.
//!
//! Decomposes an objective into a DAG of tasks, runs AI coding agents
//! against them in isolated git worktrees up to a configured fan-out,
//! and consolidates the resulting task branches into stacked review
//! requests:
//! - Plan model with layered topological execution order
//! - Dependency-aware task scheduler with a group-decision gate
//! - Phase-structured coordinator (plan, execute, synthesize, revise,
//!   consolidate) with per-step restart
//! - Cherry-pick consolidation with conflict pause/resume

pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::{OrchestratorError, OrchestratorResult};
pub use services::UltraPlanCoordinator;
