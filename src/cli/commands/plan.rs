//! `plan` handlers: validate and inspect plan artifacts offline.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Table};

use crate::domain::models::Plan;
use crate::services::{
    parse_plan, DependencyResolver, IssueSeverity, PlanAnalyzer,
};

/// Accept either a bare JSON plan or planner output with a `<plan>` block.
fn load_plan(path: &str) -> Result<Plan> {
    let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {path}"))?;
    if text.contains("<plan>") {
        return Ok(parse_plan(&text)?);
    }
    serde_json::from_str(&text).with_context(|| format!("{path} is not a plan JSON document"))
}

pub fn handle_validate(file: &str, json: bool) -> Result<()> {
    let mut plan = load_plan(file)?;
    let resolver = DependencyResolver::new();
    if plan.execution_order.is_empty() {
        if let Ok(order) = resolver.compute_execution_order(&plan.tasks) {
            plan.execution_order = order;
        }
    }

    let report = PlanAnalyzer::new().report(&plan);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.issues.is_empty() {
        println!("plan is valid: {} tasks, no findings", plan.tasks.len());
        return Ok(());
    }
    for issue in &report.issues {
        let severity = match issue.severity {
            IssueSeverity::Error => "error",
            IssueSeverity::Warning => "warning",
            IssueSeverity::Info => "info",
        };
        match &issue.task_id {
            Some(task_id) => println!("{severity}: [{task_id}] {}", issue.message),
            None => println!("{severity}: {}", issue.message),
        }
        if let Some(suggestion) = &issue.suggestion {
            println!("  suggestion: {suggestion}");
        }
    }
    if report.has_errors() {
        anyhow::bail!("plan has validation errors");
    }
    Ok(())
}

pub fn handle_show(file: &str, json: bool) -> Result<()> {
    let mut plan = load_plan(file)?;
    let resolver = DependencyResolver::new();
    resolver.validate(&plan)?;
    if plan.execution_order.is_empty() {
        plan.execution_order = resolver.compute_execution_order(&plan.tasks)?;
    }

    let analysis = PlanAnalyzer::new().analyze_dependencies(&plan);
    if json {
        let out = serde_json::json!({
            "plan": plan,
            "analysis": analysis,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{}", plan.summary);
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["group", "task", "title", "priority", "complexity"]);
    for (group, layer) in plan.execution_order.iter().enumerate() {
        for task_id in layer {
            if let Some(task) = plan.task(task_id) {
                table.add_row(vec![
                    (group + 1).to_string(),
                    task.id.clone(),
                    task.title.clone(),
                    task.priority.to_string(),
                    task.est_complexity.as_str().to_string(),
                ]);
            }
        }
    }
    println!("{table}");

    println!("dependencies: {}", analysis.total_dependencies);
    println!("roots: {}", analysis.root_tasks.join(", "));
    if !analysis.bottlenecks.is_empty() {
        println!("bottlenecks: {}", analysis.bottlenecks.join(", "));
    }
    println!("critical path: {}", analysis.critical_path.join(" -> "));
    println!("average parallelism: {:.2}", analysis.average_parallelism);
    Ok(())
}
