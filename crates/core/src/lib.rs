pub mod approvals;
pub mod audit;
pub mod budget;
pub mod config;
pub mod domain;
pub mod errors;
pub mod evidence;
pub mod guard;
pub mod guardrails;
pub mod masking;
pub mod metrics;
pub mod policy;
pub mod rate_limit;
pub mod store;

pub use approvals::{ApprovalError, ApprovalExecutionResult, ApprovalWorkflow};
pub use audit::{AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use budget::{BudgetAccountant, BudgetCheck, BudgetLimits, BudgetUsage};
pub use config::{AppConfig, ConfigError, LoadOptions};
pub use domain::{
    ActionContext, ActionMetadata, ActionType, ApprovalId, ApprovalObject, ApprovalStatus,
    Environment, PolicyDecision, Role, Snapshot,
};
pub use errors::{ApplicationError, GovernanceError, InterfaceError};
pub use evidence::{EvidenceBundle, EvidenceKey, EvidenceStore, EvidenceVerification};
pub use guard::{ExecutionRequest, ExecutionResult, GoalState, Guard, GuardConfig, GuardError};
pub use guardrails::{validate_generated_sql, validate_user_input, ThreatLevel, ValidationReport};
pub use masking::{apply_pii_masking, MaskingResult};
pub use metrics::{MetricOperation, MetricRecord, MetricsService, MetricsSummary, PeriodBudget};
pub use policy::{Evaluation, PolicyEvaluator, PolicyRule};
pub use rate_limit::{RateLimitConfig, RateLimitDecision, RateLimiter, RateLimiters};
pub use store::{InMemoryKvStore, KvStore, StoreError};
