//! Operation metrics and the rolling-period budget enforced over them.
//!
//! Every recorded metric carries a token and cost estimate derived from the
//! operation's text. The period budget sums those estimates over the trailing
//! window and refuses new work once either ceiling is reached. Metrics, the
//! budget, and a change log of budget events share one [`KvStore`].

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::budget::{percentage, BudgetCheck};
use crate::store::{KvStore, StoreError};

pub const METRICS_KEY: &str = "observability_metrics";
pub const PERIOD_BUDGET_KEY: &str = "observability_budget";
pub const METRICS_AUDIT_KEY: &str = "observability_audit";

/// USD per estimated token.
pub fn token_cost_rate() -> Decimal {
    Decimal::new(1, 5)
}

/// Roughly four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = u64::try_from(text.chars().count()).unwrap_or(u64::MAX);
    chars.div_ceil(4)
}

pub fn estimate_cost(tokens: u64) -> Decimal {
    Decimal::from(tokens).checked_mul(token_cost_rate()).unwrap_or(Decimal::MAX)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricOperation {
    Query,
    ConfigCopilot,
    Pipeline,
    Approval,
}

impl MetricOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::ConfigCopilot => "config_copilot",
            Self::Pipeline => "pipeline",
            Self::Approval => "approval",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Success,
    Error,
    Blocked,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub operation: MetricOperation,
    pub token_usage_estimated: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_usage_actual: Option<u64>,
    pub query_cost_estimate: Decimal,
    pub latency_ms: u64,
    pub status: MetricStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// What the caller observed; estimates are derived when it is recorded.
#[derive(Clone, Debug)]
pub struct MetricSample {
    pub operation: MetricOperation,
    pub latency_ms: u64,
    pub status: MetricStatus,
    pub text_input: String,
    pub text_output: Option<String>,
    pub error_message: Option<String>,
    pub metadata: Option<Value>,
}

impl MetricSample {
    pub fn new(
        operation: MetricOperation,
        status: MetricStatus,
        latency_ms: u64,
        text_input: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            latency_ms,
            status,
            text_input: text_input.into(),
            text_output: None,
            error_message: None,
            metadata: None,
        }
    }

    pub fn with_output(mut self, text_output: impl Into<String>) -> Self {
        self.text_output = Some(text_output.into());
        self
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    fn into_record(self, now: DateTime<Utc>) -> MetricRecord {
        let output_tokens = self.text_output.as_deref().map(estimate_tokens);
        let estimated =
            estimate_tokens(&self.text_input).saturating_add(output_tokens.unwrap_or(0));
        MetricRecord {
            id: format!("metric-{}", Uuid::new_v4()),
            timestamp: now,
            operation: self.operation,
            token_usage_estimated: estimated,
            token_usage_actual: output_tokens,
            query_cost_estimate: estimate_cost(estimated),
            latency_ms: self.latency_ms,
            status: self.status,
            error_message: self.error_message,
            metadata: self.metadata,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodBudget {
    pub token_budget: u64,
    pub cost_budget: Decimal,
    pub period_secs: u64,
}

impl Default for PeriodBudget {
    fn default() -> Self {
        Self {
            token_budget: 1_000_000,
            cost_budget: Decimal::ONE_HUNDRED,
            period_secs: 24 * 60 * 60,
        }
    }
}

impl PeriodBudget {
    fn window(&self) -> chrono::Duration {
        i64::try_from(self.period_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

/// Partial update; unset fields keep their current value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodBudgetUpdate {
    pub token_budget: Option<u64>,
    pub cost_budget: Option<Decimal>,
    pub period_secs: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub total_tokens_used: u64,
    pub total_cost_estimate: Decimal,
    pub total_requests: usize,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub error_count: usize,
    pub blocked_count: usize,
    pub budget_utilization: PeriodUtilization,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodUtilization {
    pub token_percent: String,
    pub cost_percent: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodBudgetKind {
    Tokens,
    Cost,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "details", rename_all = "snake_case")]
pub enum MetricsAuditEvent {
    MetricRecorded {
        metric_id: String,
        operation: MetricOperation,
        status: MetricStatus,
    },
    BudgetUpdated {
        old_budget: PeriodBudget,
        new_budget: PeriodBudget,
    },
    BudgetExceeded {
        budget_type: PeriodBudgetKind,
        used: Decimal,
        limit: Decimal,
    },
    MetricsReset,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsAuditEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: MetricsAuditEvent,
}

#[derive(Debug, Error)]
pub enum EnforcementError<E> {
    #[error("{reason}")]
    BudgetExceeded { reason: String },
    #[error("{0}")]
    Operation(E),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct MetricsService {
    store: Arc<dyn KvStore>,
    writes: Mutex<()>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store, writes: Mutex::new(()) }
    }

    pub async fn record_metric(&self, sample: MetricSample) -> Result<MetricRecord, StoreError> {
        self.record_metric_at(sample, Utc::now()).await
    }

    pub async fn record_metric_at(
        &self,
        sample: MetricSample,
        now: DateTime<Utc>,
    ) -> Result<MetricRecord, StoreError> {
        let metric = sample.into_record(now);
        {
            let _writes = self.writes.lock().await;
            let mut metrics: Vec<MetricRecord> = self.read_list(METRICS_KEY).await?;
            metrics.push(metric.clone());
            self.store.set(METRICS_KEY, serde_json::to_value(&metrics)?).await?;
            self.append_audit(
                now,
                MetricsAuditEvent::MetricRecorded {
                    metric_id: metric.id.clone(),
                    operation: metric.operation,
                    status: metric.status,
                },
            )
            .await?;
        }

        tracing::debug!(
            event_name = "metrics.recorded",
            operation = metric.operation.as_str(),
            status = ?metric.status,
            tokens = metric.token_usage_estimated,
            latency_ms = metric.latency_ms,
            "metric recorded"
        );
        Ok(metric)
    }

    /// Newest first.
    pub async fn metrics(&self, limit: Option<usize>) -> Result<Vec<MetricRecord>, StoreError> {
        let mut metrics: Vec<MetricRecord> = self.read_list(METRICS_KEY).await?;
        metrics.reverse();
        metrics.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            metrics.truncate(limit);
        }
        Ok(metrics)
    }

    pub async fn summary(&self, period_secs: Option<u64>) -> Result<MetricsSummary, StoreError> {
        self.summary_at(Utc::now(), period_secs).await
    }

    /// Aggregates metrics newer than `now - period`. Without an explicit
    /// period the budget's own period is used.
    pub async fn summary_at(
        &self,
        now: DateTime<Utc>,
        period_secs: Option<u64>,
    ) -> Result<MetricsSummary, StoreError> {
        let mut budget = self.budget().await?;
        if let Some(period_secs) = period_secs {
            budget.period_secs = period_secs;
        }
        let cutoff = now.checked_sub_signed(budget.window()).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let metrics: Vec<MetricRecord> = self
            .read_list::<MetricRecord>(METRICS_KEY)
            .await?
            .into_iter()
            .filter(|metric| metric.timestamp >= cutoff)
            .collect();

        let count = |status: MetricStatus| metrics.iter().filter(|m| m.status == status).count();
        let total_tokens_used = metrics
            .iter()
            .fold(0u64, |sum, metric| sum.saturating_add(metric.token_usage_estimated));
        let total_cost_estimate = metrics.iter().fold(Decimal::ZERO, |sum, metric| {
            sum.checked_add(metric.query_cost_estimate).unwrap_or(Decimal::MAX)
        });
        let total_requests = metrics.len();
        let (success_rate, avg_latency_ms) = if total_requests == 0 {
            (0.0, 0.0)
        } else {
            let latency: f64 = metrics.iter().map(|metric| metric.latency_ms as f64).sum();
            (
                count(MetricStatus::Success) as f64 / total_requests as f64,
                latency / total_requests as f64,
            )
        };

        Ok(MetricsSummary {
            total_tokens_used,
            total_cost_estimate,
            total_requests,
            success_rate,
            avg_latency_ms,
            error_count: count(MetricStatus::Error),
            blocked_count: count(MetricStatus::Blocked),
            budget_utilization: PeriodUtilization {
                token_percent: percentage(
                    Decimal::from(total_tokens_used),
                    Decimal::from(budget.token_budget),
                ),
                cost_percent: percentage(total_cost_estimate, budget.cost_budget),
            },
        })
    }

    pub async fn budget(&self) -> Result<PeriodBudget, StoreError> {
        match self.store.get(PERIOD_BUDGET_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(PeriodBudget::default()),
        }
    }

    pub async fn set_budget(
        &self,
        update: PeriodBudgetUpdate,
    ) -> Result<PeriodBudget, StoreError> {
        let _writes = self.writes.lock().await;
        let current = self.budget().await?;
        let updated = PeriodBudget {
            token_budget: update.token_budget.unwrap_or(current.token_budget),
            cost_budget: update.cost_budget.unwrap_or(current.cost_budget),
            period_secs: update.period_secs.unwrap_or(current.period_secs),
        };
        self.store.set(PERIOD_BUDGET_KEY, serde_json::to_value(&updated)?).await?;
        self.append_audit(
            Utc::now(),
            MetricsAuditEvent::BudgetUpdated { old_budget: current, new_budget: updated.clone() },
        )
        .await?;

        tracing::info!(
            event_name = "metrics.budget_updated",
            token_budget = updated.token_budget,
            cost_budget = %updated.cost_budget,
            period_secs = updated.period_secs,
            "period budget updated"
        );
        Ok(updated)
    }

    pub async fn check_budget(&self) -> Result<BudgetCheck, StoreError> {
        self.check_budget_at(Utc::now()).await
    }

    /// Refuses once period usage has reached either ceiling.
    pub async fn check_budget_at(&self, now: DateTime<Utc>) -> Result<BudgetCheck, StoreError> {
        let budget = self.budget().await?;
        let summary = self.summary_at(now, Some(budget.period_secs)).await?;

        let exceeded = if summary.total_tokens_used >= budget.token_budget {
            Some((
                PeriodBudgetKind::Tokens,
                Decimal::from(summary.total_tokens_used),
                Decimal::from(budget.token_budget),
                format!(
                    "Token budget exceeded: {} / {}",
                    summary.total_tokens_used, budget.token_budget
                ),
            ))
        } else if summary.total_cost_estimate >= budget.cost_budget {
            Some((
                PeriodBudgetKind::Cost,
                summary.total_cost_estimate,
                budget.cost_budget,
                format!(
                    "Cost budget exceeded: ${:.2} / ${:.2}",
                    summary.total_cost_estimate.round_dp(2),
                    budget.cost_budget.round_dp(2)
                ),
            ))
        } else {
            None
        };

        let Some((budget_type, used, limit, reason)) = exceeded else {
            return Ok(BudgetCheck { within_budget: true, reason: None });
        };

        {
            let _writes = self.writes.lock().await;
            self.append_audit(now, MetricsAuditEvent::BudgetExceeded { budget_type, used, limit })
                .await?;
        }
        tracing::warn!(event_name = "metrics.budget_exceeded", %reason, "period budget exceeded");
        Ok(BudgetCheck { within_budget: false, reason: Some(reason) })
    }

    /// Checks the period budget, runs `operation`, and records the outcome as
    /// a success, error, or blocked metric. A failure to record the metric is
    /// logged and does not change the operation's result.
    pub async fn run_with_budget_enforcement<T, E, F, Fut>(
        &self,
        operation: MetricOperation,
        text_input: &str,
        run: F,
    ) -> Result<T, EnforcementError<E>>
    where
        T: Serialize,
        E: std::fmt::Display,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let check_started = Instant::now();
        let check = self.check_budget().await?;
        if !check.within_budget {
            let reason = check.reason.unwrap_or_else(|| "Budget exceeded".to_string());
            let latency_ms = elapsed_ms(check_started);
            let sample = enforced_sample(operation, MetricStatus::Blocked, latency_ms, text_input)
                .with_error(reason.clone());
            self.record_quietly(sample).await;
            return Err(EnforcementError::BudgetExceeded { reason });
        }

        let started = Instant::now();
        let outcome = run().await;
        let latency_ms = elapsed_ms(started);
        match outcome {
            Ok(value) => {
                let output = match serde_json::to_value(&value) {
                    Ok(Value::String(text)) => text,
                    Ok(other) => other.to_string(),
                    Err(_) => String::new(),
                };
                let sample =
                    enforced_sample(operation, MetricStatus::Success, latency_ms, text_input)
                        .with_output(output);
                self.record_quietly(sample).await;
                Ok(value)
            }
            Err(error) => {
                let sample = enforced_sample(operation, MetricStatus::Error, latency_ms, text_input)
                    .with_error(error.to_string());
                self.record_quietly(sample).await;
                Err(EnforcementError::Operation(error))
            }
        }
    }

    pub async fn reset_metrics(&self) -> Result<(), StoreError> {
        let _writes = self.writes.lock().await;
        self.store.delete(METRICS_KEY).await?;
        self.append_audit(Utc::now(), MetricsAuditEvent::MetricsReset).await?;
        tracing::info!(event_name = "metrics.reset", "metrics cleared");
        Ok(())
    }

    /// Newest first.
    pub async fn audit_log(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<MetricsAuditEntry>, StoreError> {
        let mut entries: Vec<MetricsAuditEntry> = self.read_list(METRICS_AUDIT_KEY).await?;
        entries.reverse();
        entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if let Some(limit) = limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }

    async fn record_quietly(&self, sample: MetricSample) {
        if let Err(error) = self.record_metric(sample).await {
            tracing::warn!(event_name = "metrics.record_failed", %error, "metric not recorded");
        }
    }

    /// Caller holds `writes`.
    async fn append_audit(
        &self,
        timestamp: DateTime<Utc>,
        event: MetricsAuditEvent,
    ) -> Result<(), StoreError> {
        let mut entries: Vec<MetricsAuditEntry> = self.read_list(METRICS_AUDIT_KEY).await?;
        entries.push(MetricsAuditEntry { timestamp, event });
        self.store.set(METRICS_AUDIT_KEY, serde_json::to_value(&entries)?).await
    }

    async fn read_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StoreError> {
        match self.store.get(key).await? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(Vec::new()),
        }
    }
}

fn enforced_sample(
    operation: MetricOperation,
    status: MetricStatus,
    latency_ms: u64,
    text_input: &str,
) -> MetricSample {
    MetricSample::new(operation, status, latency_ms, text_input)
        .with_metadata(serde_json::json!({"operation": "budget_enforced_execution"}))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{
        estimate_cost, estimate_tokens, EnforcementError, MetricOperation, MetricSample,
        MetricStatus, MetricsAuditEvent, MetricsService, PeriodBudgetKind, PeriodBudgetUpdate,
        METRICS_KEY,
    };
    use crate::store::{InMemoryKvStore, KvStore};

    fn service() -> (MetricsService, Arc<InMemoryKvStore>) {
        let store = Arc::new(InMemoryKvStore::new());
        (MetricsService::new(store.clone()), store)
    }

    fn sample(status: MetricStatus, latency_ms: u64, input: &str) -> MetricSample {
        MetricSample::new(MetricOperation::Query, status, latency_ms, input)
    }

    #[test]
    fn estimates_round_tokens_up_and_price_them() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_cost(100_000), Decimal::ONE);
    }

    #[tokio::test]
    async fn record_derives_estimates_and_persists() {
        let (metrics, store) = service();
        let record = metrics
            .record_metric(sample(MetricStatus::Success, 12, "12345678").with_output("1234"))
            .await
            .expect("record");

        assert_eq!(record.token_usage_estimated, 3);
        assert_eq!(record.token_usage_actual, Some(1));
        assert_eq!(record.query_cost_estimate, Decimal::new(3, 5));

        let stored = store.get(METRICS_KEY).await.expect("get").expect("metrics");
        assert_eq!(stored[0]["id"], json!(record.id));
        assert_eq!(stored[0]["operation"], json!("query"));
        assert_eq!(stored[0]["tokenUsageEstimated"], json!(3));
    }

    #[tokio::test]
    async fn summary_only_counts_the_trailing_period() {
        let (metrics, _) = service();
        let now = Utc.with_ymd_and_hms(2026, 3, 2, 12, 0, 0).single().expect("valid timestamp");
        let input = "x".repeat(400);

        metrics
            .record_metric_at(sample(MetricStatus::Success, 10, &input), now - Duration::days(2))
            .await
            .expect("old");
        metrics
            .record_metric_at(sample(MetricStatus::Success, 10, &input), now - Duration::hours(1))
            .await
            .expect("success");
        metrics
            .record_metric_at(sample(MetricStatus::Error, 30, &input), now)
            .await
            .expect("error");
        metrics
            .record_metric_at(sample(MetricStatus::Blocked, 20, &input), now)
            .await
            .expect("blocked");

        let summary = metrics.summary_at(now, None).await.expect("summary");
        assert_eq!(summary.total_requests, 3);
        assert_eq!(summary.total_tokens_used, 300);
        assert_eq!(summary.total_cost_estimate, Decimal::new(3, 3));
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.blocked_count, 1);
        assert!((summary.success_rate - 1.0 / 3.0).abs() < 1e-9);
        assert!((summary.avg_latency_ms - 20.0).abs() < 1e-9);
        assert_eq!(summary.budget_utilization.token_percent, "0.03%");

        let wide = metrics.summary_at(now, Some(3 * 24 * 60 * 60)).await.expect("summary");
        assert_eq!(wide.total_requests, 4);

        let newest = metrics.metrics(Some(1)).await.expect("metrics");
        assert_eq!(newest[0].timestamp, now);
    }

    #[tokio::test]
    async fn period_budget_blocks_at_the_ceiling_and_logs_it() {
        let (metrics, _) = service();
        metrics
            .set_budget(PeriodBudgetUpdate { token_budget: Some(100), ..Default::default() })
            .await
            .expect("set budget");
        assert!(metrics.check_budget().await.expect("check").within_budget);

        metrics
            .record_metric(sample(MetricStatus::Success, 1, &"x".repeat(400)))
            .await
            .expect("record");
        let check = metrics.check_budget().await.expect("check");
        assert!(!check.within_budget);
        assert_eq!(check.reason.as_deref(), Some("Token budget exceeded: 100 / 100"));

        let log = metrics.audit_log(None).await.expect("audit");
        assert!(log.iter().any(|entry| matches!(
            entry.event,
            MetricsAuditEvent::BudgetExceeded { budget_type: PeriodBudgetKind::Tokens, .. }
        )));
        assert!(log.iter().any(|entry| matches!(
            &entry.event,
            MetricsAuditEvent::BudgetUpdated { old_budget, new_budget }
                if old_budget.token_budget == 1_000_000 && new_budget.token_budget == 100
        )));
    }

    #[tokio::test]
    async fn cost_ceiling_reports_dollars() {
        let (metrics, _) = service();
        metrics
            .set_budget(PeriodBudgetUpdate {
                cost_budget: Some(Decimal::new(5, 1)),
                ..Default::default()
            })
            .await
            .expect("set budget");
        metrics
            .record_metric(sample(MetricStatus::Success, 1, &"x".repeat(200_000)))
            .await
            .expect("record");

        let check = metrics.check_budget().await.expect("check");
        assert_eq!(check.reason.as_deref(), Some("Cost budget exceeded: $0.50 / $0.50"));
    }

    #[tokio::test]
    async fn enforcement_records_success_error_and_blocked() {
        let (metrics, _) = service();

        let value = metrics
            .run_with_budget_enforcement(MetricOperation::Query, "select", || async {
                Ok::<_, String>("result".to_string())
            })
            .await
            .expect("allowed");
        assert_eq!(value, "result");

        let failed = metrics
            .run_with_budget_enforcement(MetricOperation::ConfigCopilot, "generate", || async {
                Err::<String, _>("Something went wrong".to_string())
            })
            .await;
        assert!(matches!(
            failed,
            Err(EnforcementError::Operation(ref message)) if message == "Something went wrong"
        ));

        metrics
            .set_budget(PeriodBudgetUpdate { token_budget: Some(1), ..Default::default() })
            .await
            .expect("set budget");
        let mut ran = false;
        let blocked = metrics
            .run_with_budget_enforcement(MetricOperation::Pipeline, "create pipeline", || {
                ran = true;
                async { Ok::<_, String>(json!({"id": 1})) }
            })
            .await;
        assert!(!ran);
        assert!(matches!(blocked, Err(EnforcementError::BudgetExceeded { .. })));

        let recorded = metrics.metrics(None).await.expect("metrics");
        let statuses: Vec<MetricStatus> = recorded.iter().rev().map(|m| m.status).collect();
        assert_eq!(
            statuses,
            vec![MetricStatus::Success, MetricStatus::Error, MetricStatus::Blocked]
        );
        assert!(recorded
            .iter()
            .all(|m| m.metadata == Some(json!({"operation": "budget_enforced_execution"}))));
        assert_eq!(recorded.last().and_then(|m| m.token_usage_actual), Some(2));
    }

    #[tokio::test]
    async fn reset_clears_metrics_but_keeps_the_log() {
        let (metrics, _) = service();
        metrics.record_metric(sample(MetricStatus::Success, 1, "a")).await.expect("record");
        metrics.reset_metrics().await.expect("reset");

        assert!(metrics.metrics(None).await.expect("metrics").is_empty());
        let log = metrics.audit_log(Some(1)).await.expect("audit");
        assert_eq!(log[0].event, MetricsAuditEvent::MetricsReset);
    }
}
