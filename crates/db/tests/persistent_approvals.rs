use std::sync::Arc;

use aureus_core::approvals::ApprovalWorkflow;
use aureus_core::config::DatabaseConfig;
use aureus_core::domain::{
    ActionContext, ActionType, ApprovalActionType, ApprovalRequestInput, ApprovalStatus,
    Environment, Role,
};
use aureus_core::evidence::{ApprovalEvidenceStage, EvidenceBundle, EvidenceKey, EvidenceStore};
use aureus_core::guard::Guard;
use aureus_core::store::KvStore;
use aureus_db::SqliteKvStore;
use serde_json::{json, Value};
use tempfile::TempDir;

type PersistenceTestResult<T = ()> = Result<T, String>;

macro_rules! require {
    ($cond:expr) => {
        if !$cond {
            return Err(format!("assertion failed: `{}`", stringify!($cond)));
        }
    };
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err(format!($($arg)*));
        }
    };
}

macro_rules! require_eq {
    ($left:expr, $right:expr) => {
        if $left != $right {
            return Err(format!(
                "assertion failed: `left == right` (`{:?}` != `{:?}`)",
                $left,
                $right
            ));
        }
    };
}

async fn open_store(dir: &TempDir) -> PersistenceTestResult<Arc<SqliteKvStore>> {
    let database = DatabaseConfig {
        url: format!("sqlite://{}", dir.path().join("aureus.db").display()),
        max_connections: 1,
        timeout_secs: 30,
    };
    let store = aureus_db::open(&database).await.map_err(|err| err.to_string())?;
    Ok(Arc::new(store))
}

fn workflow(store: Arc<SqliteKvStore>) -> ApprovalWorkflow {
    let evidence = EvidenceStore::default().with_store(store.clone());
    ApprovalWorkflow::new(Arc::new(Guard::default()), evidence, store)
}

fn policy_change_request() -> ApprovalRequestInput {
    ApprovalRequestInput {
        action_type: ApprovalActionType::PolicyChange,
        requester: "analyst-3".to_string(),
        requester_role: Role::Analyst,
        description: "Widen retention policy to 90 days".to_string(),
        action_payload: json!({"retentionDays": 90}),
        action_context: ActionContext::new(
            ActionType::PolicyUpdate,
            "analyst-3",
            Role::Analyst,
            Environment::Uat,
        ),
    }
}

#[tokio::test]
async fn approval_queue_survives_reopening_the_database() -> PersistenceTestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;

    let requested = {
        let store = open_store(&dir).await?;
        let workflow = workflow(store.clone());
        let approval = workflow
            .request_approval(policy_change_request())
            .await
            .map_err(|err| err.to_string())?;
        store.pool().close().await;
        approval
    };

    let reopened = workflow(open_store(&dir).await?);
    require_eq!(reopened.load().await.map_err(|err| err.to_string())?, 1);
    let pending = reopened.pending().await;
    require_eq!(pending.len(), 1);
    require_eq!(pending[0].id, requested.id);
    require_eq!(pending[0].action_payload, json!({"retentionDays": 90}));

    let outcome = reopened
        .approve_and_execute(&requested.id, "approver-9", Role::Approver, None)
        .await
        .map_err(|err| err.to_string())?;
    require!(outcome.success, "approved policy change in uat should execute");
    require_eq!(reopened.by_status(ApprovalStatus::Approved).await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn stored_evidence_verifies_after_reload() -> PersistenceTestResult {
    let dir = TempDir::new().map_err(|err| err.to_string())?;
    let store = open_store(&dir).await?;
    let workflow = workflow(store.clone());

    let approval =
        workflow.request_approval(policy_change_request()).await.map_err(|err| err.to_string())?;

    let keys = store.list_keys("evidence/").await.map_err(|err| err.to_string())?;
    require_eq!(keys.len(), 1);

    let key =
        EvidenceKey::approval_pack(&approval.evidence_pack_id, ApprovalEvidenceStage::Request);
    let evidence = EvidenceStore::default().with_store(store.clone());
    let bundle: EvidenceBundle<Value> = evidence
        .load_bundle(&key)
        .await
        .map_err(|err| err.to_string())?
        .ok_or("request evidence should be stored")?;
    require!(evidence.verify(&bundle).is_valid(), "stored bundle should verify");
    require_eq!(bundle.payload["approval"]["status"], json!("PENDING"));
    Ok(())
}
