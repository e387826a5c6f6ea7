use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::audit::{AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
use crate::budget::{BudgetAccountant, BudgetCheck, BudgetLimits, BudgetUsage};
use crate::domain::context::{ActionContext, ActionType, Environment};
use crate::domain::snapshot::{RollbackResult, Snapshot, SnapshotState};
use crate::errors::GovernanceError;
use crate::guard::states::{transition, GoalState, GuardEvent};
use crate::policy::{Evaluation, PolicyEvaluator};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardConfig {
    pub environment: Environment,
    pub budget_limits: BudgetLimits,
    pub enable_audit: bool,
    pub enable_snapshots: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            budget_limits: BudgetLimits::default(),
            enable_audit: true,
            enable_snapshots: true,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("Snapshot {snapshot_id} not found")]
    SnapshotNotFound { snapshot_id: String },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub context: ActionContext,
    #[serde(default)]
    pub payload: Value,
}

impl ExecutionRequest {
    pub fn new(context: ActionContext, payload: Value) -> Self {
        Self { context, payload }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub audit_event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub failure: Option<GovernanceError>,
}

impl ExecutionResult {
    fn succeeded(audit_event_id: String, snapshot_id: String, data: Value) -> Self {
        Self {
            success: true,
            audit_event_id,
            snapshot_id: Some(snapshot_id),
            data: Some(data),
            error: None,
            failure: None,
        }
    }

    fn failed(audit_event_id: String, failure: GovernanceError) -> Self {
        Self {
            success: false,
            audit_event_id,
            snapshot_id: None,
            data: None,
            error: Some(failure.to_string()),
            failure: Some(failure),
        }
    }

    /// Payload on success, the typed refusal otherwise.
    pub fn into_result(self) -> Result<Value, GovernanceError> {
        match (self.success, self.failure) {
            (true, _) => Ok(self.data.unwrap_or(Value::Null)),
            (false, Some(failure)) => Err(failure),
            (false, None) => Err(GovernanceError::PolicyBlocked {
                reason: self.error.unwrap_or_default(),
            }),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyCheck {
    pub allow: bool,
    pub requires_approval: bool,
    pub reason: String,
    pub evaluation: Evaluation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceArtifact {
    pub path: PathBuf,
    pub data: Value,
}

impl EvidenceArtifact {
    pub fn write(&self) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let rendered = serde_json::to_string_pretty(&self.data)?;
        fs::write(&self.path, rendered)
    }
}

#[derive(Debug, Default)]
struct GuardInner {
    state: GoalState,
    budget: BudgetAccountant,
    snapshots: Vec<Snapshot>,
}

impl GuardInner {
    fn advance(&mut self, event: GuardEvent) {
        match transition(self.state, event) {
            Ok(outcome) => {
                tracing::debug!(
                    event_name = "guard.transition",
                    from = %outcome.from,
                    to = %outcome.to,
                    "guard state transition"
                );
                self.state = outcome.to;
            }
            Err(error) => {
                tracing::warn!(
                    event_name = "guard.transition_rejected",
                    state = %self.state,
                    error = %error,
                    "guard transition rejected"
                );
            }
        }
    }
}

/// Single entry point for every state-changing action. Policy, budget,
/// snapshot and audit bookkeeping for one action run under one lock.
pub struct Guard {
    config: GuardConfig,
    evaluator: PolicyEvaluator,
    audit: Arc<dyn AuditSink>,
    inner: Mutex<GuardInner>,
}

impl Guard {
    pub fn new(config: GuardConfig, evaluator: PolicyEvaluator) -> Self {
        Self::with_audit_sink(config, evaluator, Arc::new(InMemoryAuditSink::default()))
    }

    pub fn with_audit_sink(
        config: GuardConfig,
        evaluator: PolicyEvaluator,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let inner = GuardInner {
            state: GoalState::Idle,
            budget: BudgetAccountant::new(config.budget_limits.clone()),
            snapshots: Vec::new(),
        };
        Self { config, evaluator, audit, inner: Mutex::new(inner) }
    }

    fn lock(&self) -> MutexGuard<'_, GuardInner> {
        match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn evaluator(&self) -> &PolicyEvaluator {
        &self.evaluator
    }

    pub fn state(&self) -> GoalState {
        self.lock().state
    }

    pub fn audit_log(&self) -> Vec<AuditEvent> {
        self.audit.events()
    }

    pub fn snapshots(&self) -> Vec<Snapshot> {
        self.lock().snapshots.clone()
    }

    pub fn snapshot(&self, snapshot_id: &str) -> Option<Snapshot> {
        self.lock().snapshots.iter().find(|snapshot| snapshot.id == snapshot_id).cloned()
    }

    pub fn budget_usage(&self) -> BudgetUsage {
        self.lock().budget.usage()
    }

    pub fn reset_budget(&self) {
        self.lock().budget.reset();
    }

    pub fn check_budget(&self, token_cost: u64, query_cost: Decimal) -> BudgetCheck {
        self.lock().budget.check(token_cost, query_cost)
    }

    pub fn check_policy(&self, context: &ActionContext) -> PolicyCheck {
        let mut inner = self.lock();
        self.check_policy_locked(&mut inner, context, false)
    }

    pub fn execute(&self, request: ExecutionRequest) -> ExecutionResult {
        self.run(request, false)
    }

    /// Runs an action a human has signed off. Current policy is re-evaluated:
    /// approval-required verdicts are satisfied by the grant, blocks still
    /// veto.
    pub fn execute_approved(&self, request: ExecutionRequest) -> ExecutionResult {
        self.run(request, true)
    }

    /// Captures a chained snapshot outside the execute protocol.
    pub fn record_snapshot(&self, context: &ActionContext, state: SnapshotState) -> Snapshot {
        let mut inner = self.lock();
        self.capture_snapshot(&mut inner, context, state)
    }

    pub fn rollback(&self, snapshot_id: &str) -> Result<RollbackResult, GuardError> {
        let mut inner = self.lock();
        let Some(snapshot) =
            inner.snapshots.iter().find(|snapshot| snapshot.id == snapshot_id).cloned()
        else {
            tracing::warn!(
                event_name = "guard.rollback_missing",
                snapshot_id,
                "rollback target not found"
            );
            return Err(GuardError::SnapshotNotFound { snapshot_id: snapshot_id.to_string() });
        };

        inner.advance(GuardEvent::RolledBack);
        tracing::info!(event_name = "guard.rolled_back", snapshot_id, "rolled back to snapshot");
        Ok(RollbackResult {
            snapshot_id: snapshot.id,
            restored_state: snapshot.state,
            message: format!("Successfully rolled back to snapshot {snapshot_id}"),
        })
    }

    fn check_policy_locked(
        &self,
        inner: &mut GuardInner,
        context: &ActionContext,
        approval_granted: bool,
    ) -> PolicyCheck {
        inner.advance(GuardEvent::ValidationStarted);
        let evaluation = self.evaluator.evaluate_all(context);
        let cleared = evaluation.allow || (approval_granted && !evaluation.blocked);

        if !cleared {
            inner.advance(GuardEvent::PolicyBlocked);
            return PolicyCheck {
                allow: false,
                requires_approval: evaluation.requires_approval && !evaluation.blocked,
                reason: evaluation.violation_reason(),
                evaluation,
            };
        }

        inner.advance(GuardEvent::PolicyCleared);
        let reason = if evaluation.allow {
            "All policies passed".to_string()
        } else {
            format!("Approval granted for: {}", evaluation.violation_reason())
        };
        PolicyCheck { allow: true, requires_approval: false, reason, evaluation }
    }

    fn run(&self, request: ExecutionRequest, approval_granted: bool) -> ExecutionResult {
        let ExecutionRequest { context, payload } = request;
        let mut inner = self.lock();

        let check = self.check_policy_locked(&mut inner, &context, approval_granted);
        let primary = check.evaluation.primary_decision().cloned();

        if !check.allow {
            let (outcome, failure) = if check.requires_approval {
                (
                    AuditOutcome::RequiresApproval,
                    GovernanceError::PolicyRequiresApproval { reason: check.reason },
                )
            } else {
                (AuditOutcome::Blocked, GovernanceError::PolicyBlocked { reason: check.reason })
            };
            let audit_event_id = self.record_audit(AuditEvent::new(&context, outcome, primary));
            return ExecutionResult::failed(audit_event_id, failure);
        }

        let token_cost = context.metadata.token_cost();
        let query_cost = context.metadata.query_cost();
        let budget = inner.budget.check(token_cost, query_cost);
        if !budget.within_budget {
            inner.advance(GuardEvent::BudgetExceeded);
            let audit_event_id =
                self.record_audit(AuditEvent::new(&context, AuditOutcome::Blocked, primary));
            return ExecutionResult::failed(
                audit_event_id,
                GovernanceError::BudgetExceeded { reason: budget.reason.unwrap_or_default() },
            );
        }

        inner.advance(GuardEvent::ExecutionStarted);
        let snapshot = self.capture_snapshot(
            &mut inner,
            &context,
            SnapshotState { metadata: context.metadata.to_value(), specs: payload.clone() },
        );
        inner.budget.charge(token_cost, query_cost);
        let audit_event_id = self.record_audit(
            AuditEvent::new(&context, AuditOutcome::Success, primary).with_snapshot(&snapshot.id),
        );
        inner.advance(GuardEvent::ExecutionFinished);

        ExecutionResult::succeeded(audit_event_id, snapshot.id, payload)
    }

    fn capture_snapshot(
        &self,
        inner: &mut GuardInner,
        context: &ActionContext,
        state: SnapshotState,
    ) -> Snapshot {
        let snapshot = Snapshot {
            id: format!("snap-{}", Uuid::new_v4()),
            timestamp: Utc::now(),
            actor: context.actor.clone(),
            action: context.action_type,
            environment: context.environment,
            state,
            parent_snapshot_id: inner.snapshots.last().map(|parent| parent.id.clone()),
        };

        if self.config.enable_snapshots {
            inner.snapshots.push(snapshot.clone());
            tracing::info!(
                event_name = "guard.snapshot_created",
                snapshot_id = %snapshot.id,
                action = %snapshot.action,
                parent_snapshot_id = snapshot.parent_snapshot_id.as_deref().unwrap_or(""),
                "snapshot created"
            );
        }
        snapshot
    }

    fn record_audit(&self, event: AuditEvent) -> String {
        let id = event.id.clone();
        if self.config.enable_audit {
            tracing::info!(
                event_name = "guard.audit_recorded",
                audit_event_id = %event.id,
                actor = %event.actor,
                action = %event.action,
                outcome = %event.outcome,
                "audit event recorded"
            );
            self.audit.emit(event);
        }
        id
    }

    /// Builds the four evidence artifacts for the current guard state. Paths
    /// share one filesystem-safe timestamp.
    pub fn export_evidence(&self, output_dir: impl AsRef<Path>) -> Vec<EvidenceArtifact> {
        let output_dir = output_dir.as_ref();
        let timestamp =
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true).replace([':', '.'], "-");
        let events = self.audit.events();
        let inner = self.lock();
        let environment = self.config.environment;

        let count = |outcome: AuditOutcome| events.iter().filter(|e| e.outcome == outcome).count();
        let mut by_action: BTreeMap<ActionType, usize> = BTreeMap::new();
        for snapshot in &inner.snapshots {
            *by_action.entry(snapshot.action).or_default() += 1;
        }
        let usage = inner.budget.usage();

        let artifacts = vec![
            EvidenceArtifact {
                path: output_dir.join(format!("audit_log_{timestamp}.json")),
                data: json!({
                    "timestamp": timestamp,
                    "environment": environment,
                    "events": events,
                    "summary": {
                        "total": events.len(),
                        "success": count(AuditOutcome::Success),
                        "blocked": count(AuditOutcome::Blocked),
                        "requiresApproval": count(AuditOutcome::RequiresApproval),
                    },
                }),
            },
            EvidenceArtifact {
                path: output_dir.join(format!("snapshots_{timestamp}.json")),
                data: json!({
                    "timestamp": timestamp,
                    "environment": environment,
                    "snapshots": inner.snapshots,
                    "summary": {
                        "total": inner.snapshots.len(),
                        "byAction": by_action,
                    },
                }),
            },
            EvidenceArtifact {
                path: output_dir.join(format!("budget_usage_{timestamp}.json")),
                data: json!({
                    "timestamp": timestamp,
                    "environment": environment,
                    "limits": inner.budget.limits(),
                    "usage": usage,
                    "utilization": inner.budget.utilization(),
                }),
            },
            EvidenceArtifact {
                path: output_dir.join(format!("guard_summary_{timestamp}.json")),
                data: json!({
                    "timestamp": timestamp,
                    "environment": environment,
                    "state": inner.state,
                    "config": self.config,
                    "statistics": {
                        "auditEvents": events.len(),
                        "snapshots": inner.snapshots.len(),
                        "budgetUsage": usage,
                    },
                }),
            },
        ];

        tracing::info!(
            event_name = "guard.evidence_exported",
            output_dir = %output_dir.display(),
            artifacts = artifacts.len(),
            "evidence exported"
        );
        artifacts
    }
}

impl Default for Guard {
    fn default() -> Self {
        Self::new(GuardConfig::default(), PolicyEvaluator::default())
    }
}

impl std::fmt::Debug for Guard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("config", &self.config)
            .field("evaluator", &self.evaluator)
            .field("state", &self.state())
            .finish()
    }
}
