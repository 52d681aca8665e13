//! Parsing of agent-produced plan and plan-decision artifacts.
//!
//! Planners wrap their JSON in `<plan>...</plan>`; the plan manager
//! wraps its decision in `<plan_decision>...</plan_decision>`. Both are
//! parsed strictly: a missing block, malformed JSON, or an invalid
//! decision fails the phase.

use crate::domain::errors::{OrchestratorError, OrchestratorResult};
use crate::domain::models::{DecisionAction, Plan, PlanDecision};

/// Extract the contents of a `<tag>...</tag>` block from agent output.
///
/// Uses the first opening tag and the last closing tag so JSON that
/// itself contains angle brackets survives.
pub fn extract_tagged_block<'a>(text: &'a str, tag: &str) -> Option<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = text.find(&open)? + open.len();
    let end = text.rfind(&close)?;
    if end < start {
        return None;
    }
    Some(text[start..end].trim())
}

/// Parse a plan artifact out of planner output.
///
/// Fails on a missing `<plan>` block, malformed JSON, or an empty task
/// list. Validation and execution-order derivation happen separately.
pub fn parse_plan(text: &str) -> OrchestratorResult<Plan> {
    let block = extract_tagged_block(text, "plan")
        .ok_or_else(|| OrchestratorError::PlanParse("no <plan> block in output".to_string()))?;

    let plan: Plan = serde_json::from_str(block)
        .map_err(|e| OrchestratorError::PlanParse(format!("malformed plan JSON: {e}")))?;

    if plan.tasks.is_empty() {
        return Err(OrchestratorError::PlanParse(
            "plan contains no tasks".to_string(),
        ));
    }

    Ok(plan)
}

/// Parse and validate a plan decision against `candidate_count` plans.
///
/// `select` requires `0 <= selected_index < candidate_count`; `merge`
/// requires `selected_index == -1`.
pub fn parse_plan_decision(text: &str, candidate_count: usize) -> OrchestratorResult<PlanDecision> {
    let block = extract_tagged_block(text, "plan_decision").ok_or_else(|| {
        OrchestratorError::InvalidPlanDecision("no <plan_decision> block in output".to_string())
    })?;

    let decision: PlanDecision = serde_json::from_str(block).map_err(|e| {
        OrchestratorError::InvalidPlanDecision(format!("malformed decision JSON: {e}"))
    })?;

    match decision.action {
        DecisionAction::Select => {
            let max = i64::try_from(candidate_count)
                .map_err(|_| OrchestratorError::InvalidPlanDecision("candidate count overflow".to_string()))?;
            if decision.selected_index < 0 || decision.selected_index >= max {
                return Err(OrchestratorError::InvalidPlanDecision(format!(
                    "select index {} out of range for {} candidates",
                    decision.selected_index, candidate_count
                )));
            }
        }
        DecisionAction::Merge => {
            if decision.selected_index != -1 {
                return Err(OrchestratorError::InvalidPlanDecision(format!(
                    "merge requires selected_index -1, got {}",
                    decision.selected_index
                )));
            }
        }
    }

    Ok(decision)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAN_TEXT: &str = r#"Thinking about the objective...
<plan>
{
  "summary": "two tasks",
  "tasks": [
    {"id": "t1", "title": "one", "description": "first"},
    {"id": "t2", "title": "two", "description": "second", "depends_on": ["t1"], "priority": 1, "est_complexity": "high"}
  ],
  "insights": ["keep it small"],
  "constraints": []
}
</plan>
Done."#;

    #[test]
    fn parses_plan_block() {
        let plan = parse_plan(PLAN_TEXT).unwrap();
        assert_eq!(plan.summary, "two tasks");
        assert_eq!(plan.tasks.len(), 2);
        assert_eq!(plan.tasks[1].depends_on, vec!["t1"]);
        assert_eq!(plan.insights, vec!["keep it small"]);
    }

    #[test]
    fn missing_block_fails() {
        let err = parse_plan("no block here").unwrap_err();
        assert!(err.to_string().contains("no <plan> block"));
    }

    #[test]
    fn malformed_json_fails() {
        let err = parse_plan("<plan>{not json}</plan>").unwrap_err();
        assert!(err.to_string().contains("malformed"));
    }

    #[test]
    fn empty_task_list_fails() {
        let err = parse_plan(r#"<plan>{"summary":"x","tasks":[]}</plan>"#).unwrap_err();
        assert!(err.to_string().contains("no tasks"));
    }

    #[test]
    fn decision_select_in_range() {
        let text = r#"<plan_decision>{"action":"select","selected_index":1,"reasoning":"best parallelism","plan_scores":[]}</plan_decision>"#;
        let decision = parse_plan_decision(text, 3).unwrap();
        assert_eq!(decision.action, DecisionAction::Select);
        assert_eq!(decision.selected_index, 1);
    }

    #[test]
    fn decision_select_out_of_range_fails() {
        let text = r#"<plan_decision>{"action":"select","selected_index":3,"reasoning":""}</plan_decision>"#;
        assert!(parse_plan_decision(text, 3).is_err());
    }

    #[test]
    fn decision_merge_requires_minus_one() {
        let ok = r#"<plan_decision>{"action":"merge","selected_index":-1,"reasoning":""}</plan_decision>"#;
        assert!(parse_plan_decision(ok, 3).is_ok());

        let bad = r#"<plan_decision>{"action":"merge","selected_index":0,"reasoning":""}</plan_decision>"#;
        assert!(parse_plan_decision(bad, 3).is_err());
    }
}
