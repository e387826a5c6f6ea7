pub mod approval;
pub mod context;
pub mod decision;
pub mod snapshot;

pub use approval::{
    ApprovalActionType, ApprovalId, ApprovalObject, ApprovalRequestInput, ApprovalStatus,
    RiskLevel,
};
pub use context::{
    ActionContext, ActionMetadata, ActionType, Environment, Jurisdiction, PiiLevel, PurposeTag,
    Role,
};
pub use decision::{DecisionMetadata, MaskingRule, MaskingStrategy, PolicyDecision};
pub use snapshot::{RollbackResult, Snapshot, SnapshotState};
