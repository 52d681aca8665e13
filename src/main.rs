//! Claudio CLI entry point.

use anyhow::{Context, Result};
use clap::Parser;

use claudio::cli::{
    commands::{plan, run, status},
    Cli, Commands, PlanCommands,
};
use claudio::infrastructure::{config::ConfigLoader, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let _logger = logging::init(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Run {
            objective,
            multi_pass,
            max_parallel,
            branch_prefix,
            mode,
            draft,
            labels,
        } => {
            run::handle_run(
                &config,
                objective,
                run::RunOverrides {
                    multi_pass,
                    max_parallel,
                    branch_prefix,
                    mode,
                    draft,
                    labels,
                },
                cli.json,
            )
            .await?;
        }
        Commands::Resume => {
            run::handle_resume(&config, cli.json).await?;
        }
        Commands::Status => {
            status::handle_status(cli.json).await?;
        }
        Commands::Plan(plan_cmd) => match plan_cmd {
            PlanCommands::Validate { file } => plan::handle_validate(&file, cli.json)?,
            PlanCommands::Show { file } => plan::handle_show(&file, cli.json)?,
        },
    }

    Ok(())
}
