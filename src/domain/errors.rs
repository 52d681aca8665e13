//! Domain errors for the Claudio orchestrator.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur while orchestrating a session.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Plan parse failed: {0}")]
    PlanParse(String),

    #[error("Plan validation failed: {0}")]
    PlanValidation(String),

    #[error("Invalid plan decision: {0}")]
    InvalidPlanDecision(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Instance not found: {0}")]
    InstanceNotFound(Uuid),

    #[error("Invalid status transition for instance {instance}: {from} -> {to}")]
    InvalidStatusTransition {
        instance: Uuid,
        from: String,
        to: String,
    },

    #[error("Invalid phase transition from {from} to {to}")]
    InvalidPhaseTransition { from: String, to: String },

    #[error("Dependency cycle detected involving task: {0}")]
    DependencyCycle(String),

    #[error("No session found where one was expected")]
    SessionMissing,

    #[error("No ultraplan attached to session {0}")]
    UltraPlanMissing(Uuid),

    #[error("Consolidation failed: {0}")]
    ConsolidationFailed(String),

    #[error("Push failed for branch {branch}: {message}")]
    PushFailed { branch: String, message: String },

    #[error("Group {group} produced no commits despite task branches existing")]
    NoCommitsAdded { group: usize },

    #[error("Group {group} has no task branches with commits")]
    NoTaskBranches { group: usize },

    #[error("VCS operation failed: {0}")]
    Vcs(String),

    #[error("Agent backend error: {0}")]
    Agent(String),

    #[error("Review request failed for branch {branch}: {message}")]
    ReviewRequest { branch: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Unknown step type: {0}")]
    UnknownStepType(String),

    #[error("Operation canceled")]
    Canceled,
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Persistence(err.to_string())
    }
}

impl From<std::io::Error> for OrchestratorError {
    fn from(err: std::io::Error) -> Self {
        OrchestratorError::Persistence(err.to_string())
    }
}
