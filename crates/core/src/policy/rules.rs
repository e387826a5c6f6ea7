use std::sync::Arc;

use rust_decimal::Decimal;

use crate::domain::context::{ActionContext, ActionType, Environment, Jurisdiction, PiiLevel, Role};
use crate::domain::decision::PolicyDecision;
use crate::policy::PolicyRule;

/// Per-action token estimate above which the action needs sign-off.
pub const SINGLE_ACTION_TOKEN_CEILING: u64 = 10_000;

/// Per-action query cost estimate above which the action needs sign-off.
pub fn single_action_query_cost_ceiling() -> Decimal {
    Decimal::from(100)
}

/// The default rule set in evaluation order. The first entry is the decision
/// recorded on audit events.
pub fn builtin_rules() -> Vec<Arc<dyn PolicyRule>> {
    vec![
        Arc::new(ProdWriteAdminOnly),
        Arc::new(HighPiiApprovalRequired),
        Arc::new(CrossJurisdictionRestricted),
        Arc::new(PipelineDeployApproval),
        Arc::new(BudgetEnforcement),
    ]
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ProdWriteAdminOnly;

impl PolicyRule for ProdWriteAdminOnly {
    fn id(&self) -> &str {
        "prod-write-admin-only"
    }

    fn name(&self) -> &str {
        "Production Write - Admin Only"
    }

    fn description(&self) -> &str {
        "Only admins can write to production"
    }

    fn evaluate(&self, context: &ActionContext) -> PolicyDecision {
        let prod_write =
            context.environment == Environment::Prod && context.action_type.is_write();

        if prod_write && context.role != Role::Admin {
            return PolicyDecision::verdict(
                false,
                context.role == Role::Approver,
                self.id(),
                self.name(),
                "Production writes require admin role or approver review",
            );
        }

        PolicyDecision::allow(self.id(), self.name(), "Action permitted")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct HighPiiApprovalRequired;

impl PolicyRule for HighPiiApprovalRequired {
    fn id(&self) -> &str {
        "high-pii-approval-required"
    }

    fn name(&self) -> &str {
        "High PII - Approval Required"
    }

    fn description(&self) -> &str {
        "High PII operations require approval"
    }

    fn evaluate(&self, context: &ActionContext) -> PolicyDecision {
        if context.metadata.pii_level == Some(PiiLevel::High) && context.role != Role::Admin {
            return PolicyDecision::require_approval(
                self.id(),
                self.name(),
                "High PII access requires approval",
            );
        }

        PolicyDecision::allow(self.id(), self.name(), "No high PII involved")
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CrossJurisdictionRestricted;

impl PolicyRule for CrossJurisdictionRestricted {
    fn id(&self) -> &str {
        "cross-jurisdiction-restricted"
    }

    fn name(&self) -> &str {
        "Cross Jurisdiction Restricted"
    }

    fn description(&self) -> &str {
        "Multi-jurisdiction operations require approval"
    }

    fn evaluate(&self, context: &ActionContext) -> PolicyDecision {
        let multi = context.metadata.jurisdiction == Some(Jurisdiction::Multi);

        match (multi, context.role) {
            (true, Role::Viewer) => PolicyDecision::block(
                self.id(),
                self.name(),
                "Viewers cannot access multi-jurisdiction data",
            ),
            (true, Role::Analyst) => PolicyDecision::require_approval(
                self.id(),
                self.name(),
                "Multi-jurisdiction access requires approval for analysts",
            ),
            _ => PolicyDecision::allow(
                self.id(),
                self.name(),
                "Single jurisdiction or sufficient privileges",
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineDeployApproval;

impl PolicyRule for PipelineDeployApproval {
    fn id(&self) -> &str {
        "pipeline-deploy-approval"
    }

    fn name(&self) -> &str {
        "Pipeline Deploy - Approval Required"
    }

    fn description(&self) -> &str {
        "Pipeline deployments to UAT/Prod require approval"
    }

    fn evaluate(&self, context: &ActionContext) -> PolicyDecision {
        let gated_environment = matches!(context.environment, Environment::Uat | Environment::Prod);

        if context.action_type == ActionType::PipelineDeploy
            && gated_environment
            && context.role != Role::Admin
        {
            return PolicyDecision::require_approval(
                self.id(),
                self.name(),
                format!("Pipeline deployment to {} requires approval", context.environment),
            );
        }

        PolicyDecision::allow(self.id(), self.name(), "Dev environment or admin role")
    }
}

/// Flags a single oversized action. Cumulative spend is tracked separately by
/// the budget accountant.
#[derive(Clone, Copy, Debug, Default)]
pub struct BudgetEnforcement;

impl PolicyRule for BudgetEnforcement {
    fn id(&self) -> &str {
        "budget-enforcement"
    }

    fn name(&self) -> &str {
        "Budget Enforcement"
    }

    fn description(&self) -> &str {
        "Token and query cost budgets must not be exceeded"
    }

    fn evaluate(&self, context: &ActionContext) -> PolicyDecision {
        let token_estimate = context.metadata.token_cost();
        let query_estimate = context.metadata.query_cost();

        if token_estimate > SINGLE_ACTION_TOKEN_CEILING
            || query_estimate > single_action_query_cost_ceiling()
        {
            return PolicyDecision::require_approval(
                self.id(),
                self.name(),
                format!(
                    "Estimated cost exceeds budget (tokens: {token_estimate}, query cost: {query_estimate})"
                ),
            )
            .with_costs(token_estimate, query_estimate);
        }

        PolicyDecision::allow(self.id(), self.name(), "Within budget limits")
            .with_costs(token_estimate, query_estimate)
    }
}
