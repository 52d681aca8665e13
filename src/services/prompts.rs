//! Prompt construction for every agent role.
//!
//! Candidate formatting for the plan manager is deterministic: the
//! same candidates always produce the same prompt text.

use crate::domain::models::{Plan, PlannedTask, SynthesisRecord, TaskCompletion};

/// Seed strategy for a multi-pass planning coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStrategy {
    MaximizeParallelism,
    MinimizeComplexity,
    BalancedApproach,
}

impl PlanStrategy {
    pub const ALL: [PlanStrategy; 3] = [
        Self::MaximizeParallelism,
        Self::MinimizeComplexity,
        Self::BalancedApproach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaximizeParallelism => "maximize-parallelism",
            Self::MinimizeComplexity => "minimize-complexity",
            Self::BalancedApproach => "balanced-approach",
        }
    }

    fn guidance(&self) -> &'static str {
        match self {
            Self::MaximizeParallelism => {
                "Favor wide plans: split work so as many tasks as possible can run at the same time."
            }
            Self::MinimizeComplexity => {
                "Favor simple plans: fewer, clearer tasks, even at the cost of parallelism."
            }
            Self::BalancedApproach => {
                "Balance parallelism against task clarity; neither extreme wins by default."
            }
        }
    }
}

const PLAN_FORMAT: &str = r#"## Required Output Format
Respond with a JSON object wrapped in <plan></plan> tags:
<plan>
{
  "summary": "One-paragraph plan summary",
  "tasks": [
    {
      "id": "task-1",
      "title": "Short task title",
      "description": "Everything the implementing agent needs to know",
      "files": ["paths/you/expect/to/touch"],
      "depends_on": ["ids of prerequisite tasks"],
      "priority": 0,
      "est_complexity": "low|medium|high"
    }
  ],
  "insights": ["observations about the codebase or objective"],
  "constraints": ["constraints every task must respect"]
}
</plan>"#;

/// Prompt for a single-pass planning coordinator.
pub fn planning_prompt(objective: &str) -> String {
    format!(
        r#"You are the planning coordinator for a multi-agent coding session.

## Objective
{objective}

## Instructions
Decompose the objective into a dependency-ordered set of tasks. Each task
must be achievable by one agent working alone in its own worktree.
Declare a dependency wherever one task needs another's changes.
Independent tasks must NOT depend on each other.

{PLAN_FORMAT}"#
    )
}

/// Prompt for one strategy-seeded planner in multi-pass mode.
pub fn planning_prompt_with_strategy(objective: &str, strategy: PlanStrategy) -> String {
    format!(
        "{}\n\n## Strategy\n{}: {}\n",
        planning_prompt(objective),
        strategy.as_str(),
        strategy.guidance()
    )
}

/// Deterministic one-block rendering of a candidate plan.
fn format_candidate(index: usize, plan: &Plan) -> String {
    let tasks_json = serde_json::to_string_pretty(&plan.tasks).unwrap_or_default();
    let order = plan
        .execution_order
        .iter()
        .map(|layer| format!("[{}]", layer.join(", ")))
        .collect::<Vec<_>>()
        .join(" ");

    format!(
        r"### Candidate {index}
Summary: {}
Tasks: {}
Groups: {}
Max parallelism: {}
Insights: {}
Constraints: {}
Tasks JSON:
{tasks_json}
Execution order: {order}",
        plan.summary,
        plan.tasks.len(),
        plan.group_count(),
        plan.max_parallelism(),
        plan.insights.join("; "),
        plan.constraints.join("; "),
    )
}

/// Prompt for the plan manager choosing among candidate plans.
pub fn plan_manager_prompt(objective: &str, candidates: &[Plan]) -> String {
    let rendered = candidates
        .iter()
        .enumerate()
        .map(|(i, p)| format_candidate(i, p))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are the plan manager. Several planning coordinators produced
candidate plans for the same objective. Pick the best one, or decide
the candidates should be merged into a new plan.

## Objective
{objective}

## Candidates
{rendered}

## Required Output Format
Respond with a JSON object wrapped in <plan_decision></plan_decision> tags:
<plan_decision>
{{
  "action": "select|merge",
  "selected_index": 0,
  "reasoning": "Why this choice",
  "plan_scores": [
    {{"strategy": "candidate strategy", "score": 0.0, "strengths": [], "weaknesses": []}}
  ]
}}
</plan_decision>
For "select", selected_index is the 0-based candidate index.
For "merge", selected_index must be exactly -1."#
    )
}

/// Prompt for the planner that merges all candidates into one plan.
pub fn plan_merge_prompt(objective: &str, candidates: &[Plan]) -> String {
    let rendered = candidates
        .iter()
        .enumerate()
        .map(|(i, p)| format_candidate(i, p))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        r#"You are a planning coordinator. Merge the strongest parts of the
candidate plans below into a single improved plan for the objective.

## Objective
{objective}

## Candidate Plans (seed material)
{rendered}

{PLAN_FORMAT}"#
    )
}

/// Aggregated context from a task's completed dependencies.
pub fn dependency_context(completions: &[(&PlannedTask, &TaskCompletion)]) -> String {
    if completions.is_empty() {
        return "None — this task has no completed dependencies.".to_string();
    }
    completions
        .iter()
        .map(|(task, completion)| {
            let mut section = format!("- {} ({}): {}", task.id, task.title, completion.summary);
            if !completion.issues.is_empty() {
                section.push_str(&format!("\n  Issues: {}", completion.issues.join("; ")));
            }
            if !completion.suggestions.is_empty() {
                section.push_str(&format!(
                    "\n  Suggestions: {}",
                    completion.suggestions.join("; ")
                ));
            }
            if !completion.notes.is_empty() {
                section.push_str(&format!("\n  Notes: {}", completion.notes.joined()));
            }
            section
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Prompt for a task-executing agent.
pub fn task_prompt(objective: &str, task: &PlannedTask, dependency_context: &str) -> String {
    format!(
        r#"You are one agent in a coordinated coding session. Work only on the
task below, in this worktree, and commit your changes to the current branch.

## Session Objective
{objective}

## Your Task: {} ({})
{}

Expected files (advisory): {}

## Context From Completed Dependencies
{dependency_context}

## Completion
When finished, write `.claudio-completion.json` at the worktree root:
{{
  "task_id": "{}",
  "status": "completed|failed",
  "summary": "What you did",
  "files_modified": [],
  "issues": [],
  "suggestions": [],
  "dependencies": [],
  "notes": ""
}}"#,
        task.title,
        task.id,
        task.description,
        if task.files.is_empty() {
            "none listed".to_string()
        } else {
            task.files.join(", ")
        },
        task.id,
    )
}

/// Prompt for the synthesis agent.
pub fn synthesis_prompt(
    objective: &str,
    completions: &[(&PlannedTask, &TaskCompletion)],
) -> String {
    let work = completions
        .iter()
        .map(|(task, completion)| {
            format!(
                "- {} ({}): {}\n  Files: {}",
                task.id,
                task.title,
                completion.summary,
                completion.files_modified.join(", "),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are the synthesis agent. Every task of the session has finished;
review the work as a whole.

## Objective
{objective}

## Completed Work
{work}

## Instructions
Assess how well the pieces integrate. Note seams, inconsistencies, and
follow-up work. When finished, write `.claudio-completion.json` at the
worktree root with "summary" holding your integration notes and
"suggestions" holding concrete recommendations (empty if none)."#
    )
}

/// Prompt for the revision agent acting on synthesis recommendations.
pub fn revision_prompt(objective: &str, synthesis: &SynthesisRecord) -> String {
    format!(
        r#"You are the revision agent. The synthesis pass recommended changes;
apply them in this worktree and commit the results.

## Objective
{objective}

## Integration Notes
{}

## Recommendations To Apply
{}

When finished, write `.claudio-completion.json` at the worktree root
summarizing what you changed."#,
        synthesis.integration_notes,
        synthesis
            .recommendations
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {r}", i + 1))
            .collect::<Vec<_>>()
            .join("\n"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        Plan {
            summary: "demo".to_string(),
            tasks: vec![PlannedTask::new("t1", "one")],
            insights: vec!["small".to_string()],
            constraints: vec![],
            execution_order: vec![vec!["t1".to_string()]],
        }
    }

    #[test]
    fn candidate_formatting_is_deterministic() {
        let candidates = vec![plan(), plan()];
        let a = plan_manager_prompt("obj", &candidates);
        let b = plan_manager_prompt("obj", &candidates);
        assert_eq!(a, b);
        assert!(a.contains("### Candidate 0"));
        assert!(a.contains("### Candidate 1"));
        assert!(a.contains("Execution order: [t1]"));
    }

    #[test]
    fn strategy_prompts_differ() {
        let a = planning_prompt_with_strategy("obj", PlanStrategy::MaximizeParallelism);
        let b = planning_prompt_with_strategy("obj", PlanStrategy::MinimizeComplexity);
        assert_ne!(a, b);
        assert!(a.contains("maximize-parallelism"));
    }

    #[test]
    fn task_prompt_includes_artifact_contract() {
        let task = PlannedTask::new("t1", "one");
        let prompt = task_prompt("obj", &task, "None");
        assert!(prompt.contains(".claudio-completion.json"));
        assert!(prompt.contains("\"task_id\": \"t1\""));
    }

    #[test]
    fn dependency_context_empty_case() {
        assert!(dependency_context(&[]).starts_with("None"));
    }
}
