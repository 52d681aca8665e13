//! Domain models
//!
//! Pure domain entities: plans, instances, sessions, consolidation
//! state, and agent artifacts.

pub mod artifacts;
pub mod consolidation;
pub mod instance;
pub mod plan;
pub mod session;
pub mod ultraplan;

pub use artifacts::{
    CompletionStatus, DecisionAction, Notes, PlanDecision, PlanScore, TaskCompletion,
    COMPLETION_ARTIFACT_FILE,
};
pub use consolidation::{
    ConflictInfo, ConsolidationPhase, ConsolidationState, GroupMergeResult,
};
pub use instance::{Instance, InstanceMetrics, InstanceStatus};
pub use plan::{Complexity, Plan, PlannedTask};
pub use session::{InstanceGroup, RecoveryState, Session};
pub use ultraplan::{
    ConsolidationMode, GroupDecision, GroupDecisionChoice, RevisionRecord, SynthesisRecord,
    UltraPlanConfig, UltraPlanPhase, UltraPlanSession,
};
