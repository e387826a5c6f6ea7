//! Cumulative token and query-cost accounting against configured ceilings.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetLimits {
    pub token_budget: u64,
    pub query_cost_budget: Decimal,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self { token_budget: 100_000, query_cost_budget: Decimal::from(1_000) }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetUsage {
    pub tokens_used: u64,
    pub query_cost_used: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetCheck {
    pub within_budget: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetUtilization {
    pub tokens: String,
    pub query_cost: String,
}

#[derive(Clone, Debug, Default)]
pub struct BudgetAccountant {
    limits: BudgetLimits,
    usage: BudgetUsage,
}

impl BudgetAccountant {
    pub fn new(limits: BudgetLimits) -> Self {
        Self { limits, usage: BudgetUsage::default() }
    }

    pub fn limits(&self) -> &BudgetLimits {
        &self.limits
    }

    pub fn usage(&self) -> BudgetUsage {
        self.usage.clone()
    }

    /// Tests the prospective totals without touching usage. Negative query
    /// costs and totals that overflow `Decimal` are refused.
    pub fn check(&self, token_cost: u64, query_cost: Decimal) -> BudgetCheck {
        if query_cost.is_sign_negative() && !query_cost.is_zero() {
            return failed_check(format!("Query cost estimate must not be negative: {query_cost}"));
        }

        let next_tokens = self.usage.tokens_used.saturating_add(token_cost);
        if next_tokens > self.limits.token_budget {
            return failed_check(format!(
                "Token budget exceeded: {next_tokens}/{}",
                self.limits.token_budget
            ));
        }

        let Some(next_query_cost) = self.usage.query_cost_used.checked_add(query_cost) else {
            return failed_check(format!(
                "Query cost budget exceeded: total overflows (limit {})",
                self.limits.query_cost_budget
            ));
        };
        if next_query_cost > self.limits.query_cost_budget {
            return failed_check(format!(
                "Query cost budget exceeded: {next_query_cost}/{}",
                self.limits.query_cost_budget
            ));
        }

        BudgetCheck { within_budget: true, reason: None }
    }

    /// Usage never decreases: negative query costs are ignored and both
    /// counters saturate.
    pub fn charge(&mut self, token_cost: u64, query_cost: Decimal) {
        self.usage.tokens_used = self.usage.tokens_used.saturating_add(token_cost);
        self.usage.query_cost_used = self
            .usage
            .query_cost_used
            .checked_add(query_cost.max(Decimal::ZERO))
            .unwrap_or(Decimal::MAX);
        tracing::debug!(
            event_name = "budget.charged",
            tokens_used = self.usage.tokens_used,
            token_budget = self.limits.token_budget,
            query_cost_used = %self.usage.query_cost_used,
            query_cost_budget = %self.limits.query_cost_budget,
            "budget usage updated"
        );
    }

    pub fn reset(&mut self) {
        self.usage = BudgetUsage::default();
        tracing::info!(event_name = "budget.reset", "budget usage reset");
    }

    pub fn utilization(&self) -> BudgetUtilization {
        BudgetUtilization {
            tokens: percentage(
                Decimal::from(self.usage.tokens_used),
                Decimal::from(self.limits.token_budget),
            ),
            query_cost: percentage(self.usage.query_cost_used, self.limits.query_cost_budget),
        }
    }
}

fn failed_check(reason: String) -> BudgetCheck {
    tracing::info!(event_name = "budget.check_failed", %reason, "budget check failed");
    BudgetCheck { within_budget: false, reason: Some(reason) }
}

pub(crate) fn percentage(used: Decimal, limit: Decimal) -> String {
    let ratio = used
        .checked_div(limit)
        .and_then(|fraction| fraction.checked_mul(Decimal::ONE_HUNDRED))
        .unwrap_or(Decimal::ZERO);
    format!("{:.2}%", ratio.round_dp(2))
}
