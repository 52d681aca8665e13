//! Application services for the Claudio orchestrator.

pub mod consolidator;
pub mod coordinator;
pub mod dependency_resolver;
pub mod events;
pub mod group_tracker;
pub mod instance_registry;
pub mod phases;
pub mod plan_analyzer;
pub mod plan_editor;
pub mod plan_parser;
pub mod prompts;
pub mod retry_manager;
pub mod scheduler;
pub mod session_store;

pub use consolidator::{ConsolidationInput, Consolidator, EventSink};
pub use coordinator::{StepInfo, StepType, UltraPlanCoordinator};
pub use dependency_resolver::DependencyResolver;
pub use events::{Callbacks, EventRecord, UltraPlanEvent};
pub use group_tracker::GroupTracker;
pub use instance_registry::InstanceRegistry;
pub use phases::{
    build_executors, executor_for, ConsolidationExecutor, ContextRefreshExecutor,
    ExecutionExecutor, PhaseContext, PhaseExecutor, PhaseTiming, PlanSelectionExecutor,
    PlanningExecutor, RevisionExecutor, SynthesisExecutor,
};
pub use plan_analyzer::{
    DependencyAnalysis, IssueSeverity, PlanAnalyzer, ValidationIssue, ValidationReport,
};
pub use plan_editor::PlanEditor;
pub use plan_parser::{extract_tagged_block, parse_plan, parse_plan_decision};
pub use prompts::PlanStrategy;
pub use retry_manager::{RetryManager, RetryPolicy};
pub use scheduler::TaskScheduler;
pub use session_store::SessionStore;
