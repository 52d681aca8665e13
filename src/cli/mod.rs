//! CLI interface module.
//!
//! Command definitions (clap derive) and their handlers.

pub mod commands;

use clap::{Parser, Subcommand};

/// Multi-agent coding orchestrator.
#[derive(Debug, Parser)]
#[command(name = "claudio", version, about)]
pub struct Cli {
    /// Emit machine-readable JSON instead of tables.
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Plan and execute an objective with a swarm of agents.
    Run {
        /// The high-level objective to accomplish.
        objective: String,

        /// Generate three candidate plans and let a plan manager choose.
        #[arg(long)]
        multi_pass: bool,

        /// Max concurrent task agents (0 = unbounded).
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Prefix for generated branch names.
        #[arg(long)]
        branch_prefix: Option<String>,

        /// Consolidation mode: stacked or single.
        #[arg(long)]
        mode: Option<String>,

        /// Create review requests as drafts.
        #[arg(long)]
        draft: bool,

        /// Label to apply to review requests (repeatable).
        #[arg(long = "label")]
        labels: Vec<String>,
    },

    /// Resume an interrupted or paused session.
    Resume,

    /// Show the current session's state.
    Status,

    /// Inspect plan artifacts without running anything.
    #[command(subcommand)]
    Plan(PlanCommands),
}

#[derive(Debug, Subcommand)]
pub enum PlanCommands {
    /// Validate a plan artifact and print the issue report.
    Validate {
        /// File holding the plan JSON (bare or in a <plan> block).
        file: String,
    },
    /// Show a plan's execution order and dependency analysis.
    Show {
        /// File holding the plan JSON (bare or in a <plan> block).
        file: String,
    },
}
