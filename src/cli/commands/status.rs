//! `status` handler: render a snapshot of the persisted session.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, Table};

use crate::domain::models::Session;
use crate::services::SessionStore;

pub async fn handle_status(json: bool) -> Result<()> {
    let base_repo = std::env::current_dir().context("cannot resolve working directory")?;
    let store = SessionStore::for_repo(&base_repo);
    let session = store
        .load()
        .await
        .context("no session found in this repository")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    println!("session: {} ({})", session.name, session.id);
    if let Some(up) = &session.ultra_plan {
        println!("objective: {}", up.objective);
        println!("phase: {}", up.phase);
        if let Some(plan) = &up.plan {
            println!(
                "plan: {} tasks in {} groups (group {} current)",
                plan.tasks.len(),
                plan.execution_order.len(),
                up.current_group + 1
            );
        }
        println!(
            "tasks: {} completed, {} failed",
            up.completed_tasks.len(),
            up.failed_tasks.len()
        );
    }

    if !session.instances.is_empty() {
        let mut table = Table::new();
        table.load_preset(UTF8_FULL);
        table.set_header(vec!["instance", "status", "branch", "name"]);
        for instance in &session.instances {
            table.add_row(vec![
                Cell::new(&instance.id.to_string()[..8]),
                Cell::new(instance.status.as_str()),
                Cell::new(&instance.branch),
                Cell::new(instance.display_name.as_deref().unwrap_or("-")),
            ]);
        }
        println!("{table}");
    }

    print_pauses(&session);
    Ok(())
}

/// Print any pause conditions the operator must resolve.
pub fn print_pauses(session: &Session) {
    let Some(up) = &session.ultra_plan else {
        return;
    };

    if let Some(decision) = &up.group_decision {
        if decision.awaiting {
            println!(
                "decision needed: group {} finished with {} succeeded, {} failed",
                decision.group_index + 1,
                decision.succeeded_tasks.len(),
                decision.failed_tasks.len()
            );
        }
    }

    if let Some(consolidation) = &up.consolidation {
        if consolidation.has_conflict() {
            if let Some(conflict) = &consolidation.conflict {
                println!(
                    "conflict: task {} on {} in {}",
                    conflict.task_id,
                    conflict.files.join(", "),
                    conflict.worktree_path.display()
                );
                println!("resolve the files, stage them, then run `claudio resume`");
            }
        }
    }
}
