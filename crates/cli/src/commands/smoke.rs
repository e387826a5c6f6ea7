use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use aureus_core::approvals::ApprovalWorkflow;
use aureus_core::config::{AppConfig, LoadOptions};
use aureus_core::domain::{
    ActionContext, ActionType, ApprovalActionType, ApprovalRequestInput, Environment, Role,
};
use aureus_core::evidence::{ApprovalEvidenceStage, EvidenceBundle, EvidenceKey};
use aureus_core::guard::{ExecutionRequest, Guard};
use aureus_core::metrics::{EnforcementError, MetricOperation, MetricsService, PeriodBudgetUpdate};
use aureus_core::policy::PolicyEvaluator;
use aureus_core::store::{InMemoryKvStore, KvStore};
use serde::Serialize;
use serde_json::{json, Value};

use crate::commands::{current_thread_runtime, CommandResult};

const SENTINEL_KEY: &str = "smoke/sentinel";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

const LATER_CHECKS: [&str; 6] = [
    "database_readiness",
    "guard_enforcement",
    "rate_limiting",
    "approval_flow",
    "period_budget",
    "evidence_export",
];

pub fn run(output_dir: Option<PathBuf>) -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let config_started = Instant::now();
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(finished(
                "config_validation",
                config_started,
                Ok("configuration loaded and validated".to_string()),
            ));
            config
        }
        Err(error) => {
            checks.push(finished("config_validation", config_started, Err(error.to_string())));
            checks.extend(LATER_CHECKS.into_iter().map(skipped));
            return finalize_report(checks, elapsed_ms(started));
        }
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            checks.push(SmokeCheck {
                name: "database_readiness",
                status: SmokeStatus::Fail,
                elapsed_ms: 0,
                message: format!("failed to initialize async runtime: {error}"),
            });
            checks.extend(LATER_CHECKS[1..].iter().copied().map(skipped));
            return finalize_report(checks, elapsed_ms(started));
        }
    };

    let db_started = Instant::now();
    let db_result = runtime.block_on(check_database(&config));
    let db_failed = db_result.is_err();
    checks.push(finished("database_readiness", db_started, db_result));
    if db_failed {
        checks.extend(LATER_CHECKS[1..].iter().copied().map(skipped));
        return finalize_report(checks, elapsed_ms(started));
    }

    let guard =
        Arc::new(Guard::new(config.guard.clone(), PolicyEvaluator::with_security_policies()));

    let guard_started = Instant::now();
    checks.push(finished("guard_enforcement", guard_started, exercise_guard(&guard)));

    let rate_started = Instant::now();
    checks.push(finished("rate_limiting", rate_started, exercise_rate_limits(&config)));

    let approval_started = Instant::now();
    let approval_result = runtime.block_on(exercise_approval(&config, Arc::clone(&guard)));
    checks.push(finished("approval_flow", approval_started, approval_result));

    let budget_started = Instant::now();
    let budget_result = runtime.block_on(exercise_period_budget());
    checks.push(finished("period_budget", budget_started, budget_result));

    let export_started = Instant::now();
    let output_dir = output_dir.unwrap_or_else(|| config.evidence.output_dir.clone());
    checks.push(finished("evidence_export", export_started, export_evidence(&guard, output_dir)));

    finalize_report(checks, elapsed_ms(started))
}

async fn check_database(config: &AppConfig) -> Result<String, String> {
    let store = aureus_db::open(&config.database)
        .await
        .map_err(|error| format!("failed to open database: {error}"))?;

    let sentinel = json!({"sentinel": true});
    let outcome = async {
        store.set(SENTINEL_KEY, sentinel.clone()).await?;
        let read_back = store.get(SENTINEL_KEY).await?;
        store.delete(SENTINEL_KEY).await?;
        Ok::<_, aureus_core::store::StoreError>(read_back)
    }
    .await;
    store.pool().close().await;

    match outcome {
        Ok(Some(value)) if value == sentinel => {
            Ok(format!("kv store round trip succeeded on `{}`", config.database.url))
        }
        Ok(_) => Err("kv store round trip did not read back the written value".to_string()),
        Err(error) => Err(format!("kv store round trip failed: {error}")),
    }
}

fn exercise_guard(guard: &Guard) -> Result<String, String> {
    let allowed = guard.execute(ExecutionRequest::new(
        ActionContext::new(
            ActionType::DatasetCreate,
            "smoke-admin",
            Role::Admin,
            Environment::Dev,
        ),
        json!({"name": "smoke_dataset"}),
    ));
    if !allowed.success || allowed.snapshot_id.is_none() {
        return Err(format!(
            "admin dataset create in dev should succeed with a snapshot: {:?}",
            allowed.error
        ));
    }

    let blocked = guard.execute(ExecutionRequest::new(
        ActionContext::new(
            ActionType::DatasetDelete,
            "smoke-viewer",
            Role::Viewer,
            Environment::Prod,
        ),
        json!({"name": "smoke_dataset"}),
    ));
    if blocked.success || blocked.snapshot_id.is_some() {
        return Err("viewer dataset delete in prod should be refused without a snapshot".into());
    }

    Ok(format!("allowed write snapshotted, prod write refused ({})", blocked.audit_event_id))
}

fn exercise_rate_limits(config: &AppConfig) -> Result<String, String> {
    let limiters = config.rate_limits.build();
    let limiter = &limiters.query;
    let max_requests = limiter.config().max_requests;

    for attempt in 0..max_requests {
        if !limiter.check("smoke").allowed {
            return Err(format!("request {} of {max_requests} was refused", attempt + 1));
        }
    }
    let overflow = limiter.check("smoke");
    if overflow.allowed {
        return Err(format!("request {} exceeded the limit but was admitted", max_requests + 1));
    }

    Ok(format!("query limiter admitted {max_requests} and refused the next request"))
}

async fn exercise_approval(config: &AppConfig, guard: Arc<Guard>) -> Result<String, String> {
    let store = Arc::new(InMemoryKvStore::new());
    let evidence = config.evidence_store().with_store(store.clone());
    let workflow = ApprovalWorkflow::new(guard, evidence.clone(), store);

    let approval = workflow
        .request_approval(ApprovalRequestInput {
            action_type: ApprovalActionType::PolicyChange,
            requester: "smoke-analyst".to_string(),
            requester_role: Role::Analyst,
            description: "Smoke policy change".to_string(),
            action_payload: json!({"policy": "smoke-retention", "days": 30}),
            action_context: ActionContext::new(
                ActionType::PolicyUpdate,
                "smoke-analyst",
                Role::Analyst,
                Environment::Uat,
            ),
        })
        .await
        .map_err(|error| format!("approval request failed: {error}"))?;

    let outcome = workflow
        .approve_and_execute(&approval.id, "smoke-approver", Role::Approver, None)
        .await
        .map_err(|error| format!("approval failed: {error}"))?;
    if !outcome.success {
        return Err(format!(
            "approved action did not execute: {:?}",
            outcome.execution.execution_result.error
        ));
    }

    let key = EvidenceKey::approval_pack(
        &approval.evidence_pack_id,
        ApprovalEvidenceStage::ApprovedAndExecuted,
    );
    let bundle: EvidenceBundle<Value> = evidence
        .load_bundle(&key)
        .await
        .map_err(|error| format!("evidence load failed: {error}"))?
        .ok_or_else(|| format!("no evidence stored under `{key}`"))?;
    if let Some(reason) = evidence.verify(&bundle).failure_reason() {
        return Err(format!("approval evidence failed verification: {reason}"));
    }

    Ok(format!("approval {} executed and evidence verified", approval.id))
}

async fn exercise_period_budget() -> Result<String, String> {
    let metrics = MetricsService::new(Arc::new(InMemoryKvStore::new()));
    metrics
        .set_budget(PeriodBudgetUpdate { token_budget: Some(4), ..Default::default() })
        .await
        .map_err(|error| format!("failed to set period budget: {error}"))?;

    metrics
        .run_with_budget_enforcement(MetricOperation::Query, "SELECT 1", || async {
            Ok::<_, String>(json!({"rows": 1}))
        })
        .await
        .map_err(|error| format!("operation within budget was refused: {error}"))?;

    let refused = metrics
        .run_with_budget_enforcement(MetricOperation::Query, "SELECT 2", || async {
            Ok::<_, String>(json!({"rows": 1}))
        })
        .await;
    if !matches!(refused, Err(EnforcementError::BudgetExceeded { .. })) {
        return Err("operation over the period budget was admitted".to_string());
    }

    let summary =
        metrics.summary(None).await.map_err(|error| format!("summary failed: {error}"))?;
    if summary.total_requests != 2 || summary.blocked_count != 1 {
        return Err(format!(
            "expected one success and one blocked metric, got {} requests with {} blocked",
            summary.total_requests, summary.blocked_count
        ));
    }

    Ok(format!(
        "period budget admitted {} tokens then refused the next operation",
        summary.total_tokens_used
    ))
}

fn export_evidence(guard: &Guard, output_dir: PathBuf) -> Result<String, String> {
    let artifacts = guard.export_evidence(&output_dir);
    for artifact in &artifacts {
        artifact
            .write()
            .map_err(|error| format!("failed to write `{}`: {error}", artifact.path.display()))?;
    }
    Ok(format!("wrote {} evidence artifacts to `{}`", artifacts.len(), output_dir.display()))
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

fn finished(name: &'static str, started: Instant, result: Result<String, String>) -> SmokeCheck {
    let (status, message) = match result {
        Ok(message) => (SmokeStatus::Pass, message),
        Err(message) => (SmokeStatus::Fail, message),
    };
    SmokeCheck { name, status, elapsed_ms: elapsed_ms(started), message }
}

fn skipped(name: &'static str) -> SmokeCheck {
    SmokeCheck {
        name,
        status: SmokeStatus::Skipped,
        elapsed_ms: 0,
        message: "skipped due previous failure".to_string(),
    }
}

fn finalize_report(checks: Vec<SmokeCheck>, total_elapsed_ms: u64) -> CommandResult {
    let passed = checks.iter().filter(|check| check.status == SmokeStatus::Pass).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            crate::commands::escape_json(&error.to_string())
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}
