pub mod engine;
pub mod states;

pub use engine::{
    EvidenceArtifact, ExecutionRequest, ExecutionResult, Guard, GuardConfig, GuardError,
    PolicyCheck,
};
pub use states::{GoalState, GuardEvent, GuardTransitionError, TransitionOutcome};
