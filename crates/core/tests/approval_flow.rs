use std::sync::Arc;

use aureus_core::approvals::{ApprovalError, ApprovalWorkflow};
use aureus_core::domain::{
    ActionContext, ActionMetadata, ActionType, ApprovalActionType, ApprovalRequestInput, ApprovalStatus,
    Environment, RiskLevel, Role,
};
use aureus_core::evidence::{ApprovalEvidenceStage, EvidenceBundle, EvidenceKey, EvidenceStore};
use aureus_core::guard::Guard;
use aureus_core::store::InMemoryKvStore;
use serde_json::{json, Value};

struct Harness {
    workflow: ApprovalWorkflow,
    store: Arc<InMemoryKvStore>,
}

fn harness() -> Harness {
    let store = Arc::new(InMemoryKvStore::new());
    let evidence = EvidenceStore::default().with_store(store.clone());
    let workflow = ApprovalWorkflow::new(Arc::new(Guard::default()), evidence, store.clone());
    Harness { workflow, store }
}

fn deploy_request(environment: Environment) -> ApprovalRequestInput {
    ApprovalRequestInput {
        action_type: ApprovalActionType::ProdDeploy,
        requester: "analyst-7".to_string(),
        requester_role: Role::Analyst,
        description: "Promote fraud scoring pipeline".to_string(),
        action_payload: json!({"pipeline": "fraud-scoring", "version": 3}),
        action_context: ActionContext::new(
            ActionType::PipelineDeploy,
            "analyst-7",
            Role::Analyst,
            environment,
        ),
    }
}

async fn load_pack(
    harness: &Harness,
    pack_id: &str,
    stage: ApprovalEvidenceStage,
) -> Option<EvidenceBundle<Value>> {
    EvidenceStore::default()
        .with_store(harness.store.clone())
        .load_bundle(&EvidenceKey::approval_pack(pack_id, stage))
        .await
        .ok()
        .flatten()
}

#[tokio::test]
async fn prod_deploy_is_high_risk_and_viewers_cannot_approve() {
    let harness = harness();
    let approval = harness
        .workflow
        .request_approval(deploy_request(Environment::Prod))
        .await
        .expect("request should succeed");
    assert_eq!(approval.risk_level, RiskLevel::High);

    let denied =
        harness.workflow.approve_and_execute(&approval.id, "viewer-2", Role::Viewer, None).await;
    match denied {
        Err(error @ ApprovalError::Unauthorized { .. }) => assert_eq!(
            error.to_string(),
            "User role 'viewer' is not authorized to approve. Must be 'approver' or 'admin'."
        ),
        other => panic!("expected unauthorized, got {other:?}"),
    }

    let current = harness.workflow.get(&approval.id).await.expect("approval should exist");
    assert_eq!(current.status, ApprovalStatus::Pending);
    assert!(current.approver.is_none());
    assert_eq!(current.audit_event_ids.len(), 1);
}

#[tokio::test]
async fn approval_executes_once_and_second_approval_is_rejected() {
    let harness = harness();
    let approval = harness
        .workflow
        .request_approval(deploy_request(Environment::Uat))
        .await
        .expect("request should succeed");

    let executed = harness
        .workflow
        .approve_and_execute(&approval.id, "approver-1", Role::Approver, Some("ship it".into()))
        .await
        .expect("approval should succeed");
    assert!(executed.success);
    assert_eq!(executed.execution.payload, json!({"pipeline": "fraud-scoring", "version": 3}));

    let guard: &Guard = harness.workflow.guard();
    let snapshots_after_first = guard.snapshots().len();
    let deploys = |guard: &Guard| {
        guard.audit_log().iter().filter(|event| event.action == ActionType::PipelineDeploy).count()
    };
    assert_eq!(deploys(guard), 1);
    let pre_execution = guard.snapshot(&executed.snapshot_id).expect("pre-execution snapshot");
    assert_eq!(pre_execution.state.specs, json!({"pipeline": "fraud-scoring", "version": 3}));

    let stored = harness.workflow.get(&approval.id).await.expect("approval should exist");
    assert_eq!(stored.status, ApprovalStatus::Approved);
    assert_eq!(stored.approval_comment.as_deref(), Some("ship it"));
    assert_eq!(stored.snapshot_id.as_deref(), Some(executed.snapshot_id.as_str()));
    assert_eq!(stored.audit_event_ids.len(), 3);
    assert_eq!(stored.audit_event_ids[1], executed.audit_event_id);

    let again =
        harness.workflow.approve_and_execute(&approval.id, "admin-1", Role::Admin, None).await;
    match again {
        Err(error @ ApprovalError::InvalidState { .. }) => {
            assert!(error.to_string().contains("APPROVED"));
        }
        other => panic!("expected invalid state, got {other:?}"),
    }
    assert_eq!(guard.snapshots().len(), snapshots_after_first);
    assert_eq!(deploys(guard), 1);

    let stage = ApprovalEvidenceStage::ApprovedAndExecuted;
    let pack = load_pack(&harness, &approval.evidence_pack_id, stage)
        .await
        .expect("execution evidence should be stored");
    assert_eq!(pack.payload["executionResult"]["executionResult"]["success"], json!(true));
    assert!(EvidenceStore::default().verify(&pack).is_valid());
}

#[tokio::test]
async fn approval_does_not_override_a_hard_block() {
    let harness = harness();
    let approval = harness
        .workflow
        .request_approval(deploy_request(Environment::Prod))
        .await
        .expect("request should succeed");

    let outcome = harness
        .workflow
        .approve_and_execute(&approval.id, "admin-1", Role::Admin, None)
        .await
        .expect("approval bookkeeping should succeed");

    assert!(!outcome.success);
    assert_eq!(
        outcome.execution.execution_result.error.as_deref(),
        Some("Production writes require admin role or approver review")
    );
    let stored = harness.workflow.get(&approval.id).await.expect("approval should exist");
    assert_eq!(stored.status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn rejection_writes_evidence_and_keeps_history() {
    let harness = harness();
    let approval = harness
        .workflow
        .request_approval(deploy_request(Environment::Uat))
        .await
        .expect("request should succeed");

    let rejected = harness
        .workflow
        .reject(&approval.id, "admin-1", Role::Admin, Some("missing runbook".into()))
        .await
        .expect("reject should succeed");
    assert_eq!(rejected.status, ApprovalStatus::Rejected);
    assert_eq!(rejected.audit_event_ids[0], approval.audit_event_ids[0]);

    let pack = load_pack(&harness, &approval.evidence_pack_id, ApprovalEvidenceStage::Rejected)
        .await
        .expect("rejection evidence should be stored");
    assert_eq!(pack.payload["approval"]["status"], json!("REJECTED"));
    assert_eq!(pack.payload["approval"]["approvalComment"], json!("missing runbook"));
    assert!(harness.workflow.pending().await.is_empty());
    assert_eq!(harness.workflow.by_status(ApprovalStatus::Rejected).await.len(), 1);
}

#[tokio::test]
async fn request_audit_and_approved_execution_each_charge_the_estimate() {
    let harness = harness();
    let mut input = deploy_request(Environment::Uat);
    input.action_context = input.action_context.with_metadata(ActionMetadata {
        token_cost_estimate: Some(250),
        ..Default::default()
    });

    let approval = harness.workflow.request_approval(input).await.expect("request should succeed");
    let guard: &Guard = harness.workflow.guard();
    assert_eq!(guard.budget_usage().tokens_used, 250);

    let executed = harness
        .workflow
        .approve_and_execute(&approval.id, "approver-1", Role::Approver, None)
        .await
        .expect("approval should succeed");
    assert!(executed.success);
    assert_eq!(guard.budget_usage().tokens_used, 500);
}
