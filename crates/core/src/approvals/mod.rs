//! Two-phase human approval for actions the guard will not auto-execute.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::approval::{
    ApprovalActionType, ApprovalId, ApprovalObject, ApprovalRequestInput, ApprovalStatus,
    RiskLevel,
};
use crate::domain::context::{
    ActionContext, ActionMetadata, ActionType, Environment, PiiLevel, Role,
};
use crate::domain::snapshot::SnapshotState;
use crate::evidence::{ApprovalEvidenceStage, EvidenceKey, EvidenceStore};
use crate::guard::{ExecutionRequest, ExecutionResult, Guard};
use crate::store::{KvStore, StoreError};

pub const APPROVAL_QUEUE_KEY: &str = "approval_queue";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("Approval {id} not found")]
    NotFound { id: ApprovalId },
    #[error("Approval {id} is not pending (status: {status})")]
    InvalidState { id: ApprovalId, status: ApprovalStatus },
    #[error("User role '{role}' is not authorized to {action}. Must be 'approver' or 'admin'.")]
    Unauthorized { role: Role, action: &'static str },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedExecution {
    pub execution_result: ExecutionResult,
    pub timestamp: DateTime<Utc>,
    pub action_type: ApprovalActionType,
    pub payload: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalExecutionResult {
    pub success: bool,
    pub approval_id: ApprovalId,
    pub snapshot_id: String,
    pub audit_event_id: String,
    pub execution: ApprovedExecution,
}

/// High for production deploys to prod, every policy change, and high-PII
/// access to high-PII data; medium otherwise.
pub fn risk_level(action_type: ApprovalActionType, context: &ActionContext) -> RiskLevel {
    let high = match action_type {
        ApprovalActionType::ProdDeploy => context.environment == Environment::Prod,
        ApprovalActionType::PolicyChange => true,
        ApprovalActionType::PiiAccessHigh => context.metadata.pii_level == Some(PiiLevel::High),
    };
    if high {
        RiskLevel::High
    } else {
        RiskLevel::Medium
    }
}

fn can_decide(role: Role) -> bool {
    matches!(role, Role::Approver | Role::Admin)
}

pub struct ApprovalWorkflow {
    guard: Arc<Guard>,
    evidence: EvidenceStore,
    store: Arc<dyn KvStore>,
    approvals: Mutex<Vec<ApprovalObject>>,
}

impl ApprovalWorkflow {
    pub fn new(guard: Arc<Guard>, evidence: EvidenceStore, store: Arc<dyn KvStore>) -> Self {
        Self { guard, evidence, store, approvals: Mutex::new(Vec::new()) }
    }

    pub fn guard(&self) -> &Arc<Guard> {
        &self.guard
    }

    pub async fn request_approval(
        &self,
        input: ApprovalRequestInput,
    ) -> Result<ApprovalObject, ApprovalError> {
        let id = ApprovalId(format!("apr-{}", Uuid::new_v4()));
        let evidence_pack_id = format!("evd-apr-{}", Uuid::new_v4());
        let risk = risk_level(input.action_type, &input.action_context);

        let mut metadata = input.action_context.metadata.clone();
        metadata.approval_id.get_or_insert_with(|| id.0.clone());
        metadata
            .extra
            .entry("originalActionType".to_string())
            .or_insert_with(|| json!(input.action_type.as_str()));
        metadata.extra.entry("riskLevel".to_string()).or_insert_with(|| json!(risk.as_str()));

        let audit_context = ActionContext {
            action_type: ActionType::ApprovalRequest,
            actor: input.requester.clone(),
            role: input.requester_role,
            environment: input.action_context.environment,
            metadata,
        };
        let audit = self.guard.execute(ExecutionRequest::new(
            audit_context,
            json!({
                "approvalId": id,
                "description": input.description,
                "actionPayload": input.action_payload,
            }),
        ));

        let approval = ApprovalObject {
            id: id.clone(),
            status: ApprovalStatus::Pending,
            action_type: input.action_type,
            requester: input.requester,
            requester_role: input.requester_role,
            timestamp: Utc::now(),
            description: input.description,
            risk_level: risk,
            action_payload: input.action_payload,
            action_context: input.action_context,
            evidence_pack_id,
            approver: None,
            approver_role: None,
            approval_timestamp: None,
            approval_comment: None,
            snapshot_id: None,
            audit_event_ids: vec![audit.audit_event_id],
        };

        self.approvals.lock().await.push(approval.clone());
        self.upsert_queue(&approval).await?;
        self.write_evidence(&approval, ApprovalEvidenceStage::Request, None).await?;

        tracing::info!(
            event_name = "approval.requested",
            approval_id = %approval.id,
            action_type = approval.action_type.as_str(),
            risk_level = approval.risk_level.as_str(),
            requester = %approval.requester,
            "approval requested"
        );
        Ok(approval)
    }

    pub async fn approve_and_execute(
        &self,
        id: &ApprovalId,
        approver: &str,
        approver_role: Role,
        comment: Option<String>,
    ) -> Result<ApprovalExecutionResult, ApprovalError> {
        let mut approvals = self.approvals.lock().await;
        let approval = decidable(&mut approvals, id, approver_role, "approve")?;

        approval.status = ApprovalStatus::Approved;
        approval.approver = Some(approver.to_string());
        approval.approver_role = Some(approver_role);
        approval.approval_timestamp = Some(Utc::now());
        approval.approval_comment = comment.clone();

        let mut grant_metadata = ActionMetadata {
            approval_id: Some(id.0.clone()),
            ..Default::default()
        };
        grant_metadata
            .extra
            .insert("originalActionType".into(), json!(approval.action_type.as_str()));
        grant_metadata.extra.insert("requester".into(), json!(approval.requester));
        let grant = self.guard.execute(ExecutionRequest::new(
            ActionContext::new(
                ActionType::ApprovalGrant,
                approver,
                approver_role,
                approval.action_context.environment,
            )
            .with_metadata(grant_metadata),
            json!({"approvalId": id, "comment": comment}),
        ));
        approval.audit_event_ids.push(grant.audit_event_id.clone());

        let snapshot = self.guard.record_snapshot(
            &ActionContext::new(
                approval.action_context.action_type,
                approver,
                approver_role,
                approval.action_context.environment,
            ),
            SnapshotState {
                metadata: json!({
                    "approvalId": approval.id,
                    "actionType": approval.action_type,
                    "requester": approval.requester,
                }),
                specs: approval.action_payload.clone(),
            },
        );
        approval.snapshot_id = Some(snapshot.id.clone());

        let mut execution_context = approval.action_context.clone();
        execution_context.metadata.approval_id = Some(id.0.clone());
        execution_context.metadata.approved_by = Some(approver.to_string());
        let execution_result = self.guard.execute_approved(ExecutionRequest::new(
            execution_context,
            approval.action_payload.clone(),
        ));
        approval.audit_event_ids.push(execution_result.audit_event_id.clone());

        let execution = ApprovedExecution {
            execution_result,
            timestamp: Utc::now(),
            action_type: approval.action_type,
            payload: approval.action_payload.clone(),
        };
        let approval = approval.clone();
        drop(approvals);

        self.upsert_queue(&approval).await?;
        self.write_evidence(
            &approval,
            ApprovalEvidenceStage::ApprovedAndExecuted,
            Some(serde_json::to_value(&execution).map_err(StoreError::from)?),
        )
        .await?;

        tracing::info!(
            event_name = "approval.approved",
            approval_id = %approval.id,
            approver,
            executed = execution.execution_result.success,
            "approval granted and action executed"
        );
        Ok(ApprovalExecutionResult {
            success: execution.execution_result.success,
            approval_id: approval.id,
            snapshot_id: snapshot.id,
            audit_event_id: grant.audit_event_id,
            execution,
        })
    }

    pub async fn reject(
        &self,
        id: &ApprovalId,
        approver: &str,
        approver_role: Role,
        comment: Option<String>,
    ) -> Result<ApprovalObject, ApprovalError> {
        let mut approvals = self.approvals.lock().await;
        let approval = decidable(&mut approvals, id, approver_role, "reject")?;

        approval.status = ApprovalStatus::Rejected;
        approval.approver = Some(approver.to_string());
        approval.approver_role = Some(approver_role);
        approval.approval_timestamp = Some(Utc::now());
        approval.approval_comment = comment.clone();

        let mut metadata = ActionMetadata {
            approval_id: Some(id.0.clone()),
            ..Default::default()
        };
        metadata.extra.insert("decision".into(), json!(ApprovalStatus::Rejected.as_str()));
        metadata.extra.insert("originalActionType".into(), json!(approval.action_type.as_str()));
        metadata.extra.insert("requester".into(), json!(approval.requester));
        let audit = self.guard.execute(ExecutionRequest::new(
            ActionContext::new(
                ActionType::ApprovalGrant,
                approver,
                approver_role,
                approval.action_context.environment,
            )
            .with_metadata(metadata),
            json!({
                "approvalId": id,
                "decision": ApprovalStatus::Rejected.as_str(),
                "comment": comment,
            }),
        ));
        approval.audit_event_ids.push(audit.audit_event_id);

        let approval = approval.clone();
        drop(approvals);

        self.upsert_queue(&approval).await?;
        self.write_evidence(&approval, ApprovalEvidenceStage::Rejected, None).await?;

        tracing::info!(
            event_name = "approval.rejected",
            approval_id = %approval.id,
            approver,
            "approval rejected"
        );
        Ok(approval)
    }

    pub async fn get(&self, id: &ApprovalId) -> Option<ApprovalObject> {
        self.approvals.lock().await.iter().find(|approval| &approval.id == id).cloned()
    }

    pub async fn all(&self) -> Vec<ApprovalObject> {
        self.approvals.lock().await.clone()
    }

    pub async fn pending(&self) -> Vec<ApprovalObject> {
        self.by_status(ApprovalStatus::Pending).await
    }

    pub async fn by_status(&self, status: ApprovalStatus) -> Vec<ApprovalObject> {
        self.approvals
            .lock()
            .await
            .iter()
            .filter(|approval| approval.status == status)
            .cloned()
            .collect()
    }

    /// Replaces the in-memory approvals with the persisted queue.
    pub async fn load(&self) -> Result<usize, ApprovalError> {
        let queue = self.read_queue().await?;
        let count = queue.len();
        *self.approvals.lock().await = queue;
        Ok(count)
    }

    pub async fn clear(&self) -> Result<(), ApprovalError> {
        self.approvals.lock().await.clear();
        self.store.set(APPROVAL_QUEUE_KEY, json!([])).await?;
        Ok(())
    }

    async fn read_queue(&self) -> Result<Vec<ApprovalObject>, ApprovalError> {
        match self.store.get(APPROVAL_QUEUE_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value).map_err(StoreError::from)?),
            None => Ok(Vec::new()),
        }
    }

    /// Newest entries first; existing entries are replaced in place.
    async fn upsert_queue(&self, approval: &ApprovalObject) -> Result<(), ApprovalError> {
        let mut queue = self.read_queue().await?;
        match queue.iter_mut().find(|item| item.id == approval.id) {
            Some(existing) => *existing = approval.clone(),
            None => queue.insert(0, approval.clone()),
        }
        let value = serde_json::to_value(&queue).map_err(StoreError::from)?;
        self.store.set(APPROVAL_QUEUE_KEY, value).await?;
        Ok(())
    }

    async fn write_evidence(
        &self,
        approval: &ApprovalObject,
        stage: ApprovalEvidenceStage,
        execution_result: Option<Value>,
    ) -> Result<(), ApprovalError> {
        let pack = json!({
            "approvalId": approval.id,
            "evidencePackId": approval.evidence_pack_id,
            "stage": stage,
            "timestamp": Utc::now(),
            "approval": {
                "id": approval.id,
                "status": approval.status,
                "actionType": approval.action_type,
                "requester": approval.requester,
                "requesterRole": approval.requester_role,
                "description": approval.description,
                "riskLevel": approval.risk_level,
                "requestedAt": approval.timestamp,
                "approver": approval.approver,
                "approverRole": approval.approver_role,
                "approvalTimestamp": approval.approval_timestamp,
                "approvalComment": approval.approval_comment,
                "snapshotId": approval.snapshot_id,
            },
            "actionContext": approval.action_context,
            "actionPayload": approval.action_payload,
            "auditEventIds": approval.audit_event_ids,
            "executionResult": execution_result,
        });

        let key = EvidenceKey::approval_pack(&approval.evidence_pack_id, stage);
        self.evidence.store_bundle(&key, pack).await?;
        Ok(())
    }
}

/// Looks up a pending approval the given role may decide on.
fn decidable<'a>(
    approvals: &'a mut [ApprovalObject],
    id: &ApprovalId,
    role: Role,
    action: &'static str,
) -> Result<&'a mut ApprovalObject, ApprovalError> {
    let approval = approvals
        .iter_mut()
        .find(|approval| &approval.id == id)
        .ok_or_else(|| ApprovalError::NotFound { id: id.clone() })?;

    if approval.status != ApprovalStatus::Pending {
        return Err(ApprovalError::InvalidState { id: id.clone(), status: approval.status });
    }
    if !can_decide(role) {
        return Err(ApprovalError::Unauthorized { role, action });
    }
    Ok(approval)
}
