pub mod rules;
pub mod security;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::domain::context::ActionContext;
use crate::domain::decision::PolicyDecision;

pub use rules::builtin_rules;
pub use security::{CrossBorderRule, PiiMaskingRule, PurposeLimitationRule};

/// A single authorization rule. Implementations must be pure functions of the
/// context so that evaluation order never changes the verdict set.
pub trait PolicyRule: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn description(&self) -> &str {
        ""
    }
    fn evaluate(&self, context: &ActionContext) -> PolicyDecision;
}

type RuleFn = dyn Fn(&ActionContext) -> PolicyDecision + Send + Sync;

/// Closure-backed rule for ad-hoc registrations.
pub struct FnRule {
    id: String,
    name: String,
    description: String,
    evaluator: Box<RuleFn>,
}

impl FnRule {
    pub fn new<F>(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        evaluator: F,
    ) -> Self
    where
        F: Fn(&ActionContext) -> PolicyDecision + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            evaluator: Box::new(evaluator),
        }
    }
}

impl fmt::Debug for FnRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnRule").field("id", &self.id).field("name", &self.name).finish()
    }
}

impl PolicyRule for FnRule {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn evaluate(&self, context: &ActionContext) -> PolicyDecision {
        (self.evaluator)(context)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDescriptor {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Aggregate of one evaluation pass over every registered rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evaluation {
    pub allow: bool,
    pub requires_approval: bool,
    pub blocked: bool,
    pub decisions: Vec<PolicyDecision>,
}

impl Evaluation {
    pub fn from_decisions(decisions: Vec<PolicyDecision>) -> Self {
        let blocked = decisions.iter().any(PolicyDecision::is_blocking);
        let requires_approval = decisions.iter().any(|decision| decision.requires_approval);
        Self { allow: !blocked && !requires_approval, requires_approval, blocked, decisions }
    }

    /// The decision produced by the first registered rule.
    pub fn primary_decision(&self) -> Option<&PolicyDecision> {
        self.decisions.first()
    }

    pub fn blocking_decisions(&self) -> impl Iterator<Item = &PolicyDecision> {
        self.decisions.iter().filter(|decision| decision.is_blocking())
    }

    pub fn approval_decisions(&self) -> impl Iterator<Item = &PolicyDecision> {
        self.decisions.iter().filter(|decision| decision.requires_approval)
    }

    /// Reasons of the decisions that prevent auto-execution. Blocks win over
    /// approval requests; an empty string means nothing is in the way.
    pub fn violation_reason(&self) -> String {
        let reasons: Vec<&str> = if self.blocked {
            self.blocking_decisions().map(|decision| decision.reason.as_str()).collect()
        } else {
            self.approval_decisions().map(|decision| decision.reason.as_str()).collect()
        };
        reasons.join("; ")
    }
}

/// Ordered rule set. Rules are only ever appended so the audit trail can
/// always name the rule behind a recorded decision.
#[derive(Clone)]
pub struct PolicyEvaluator {
    rules: Vec<Arc<dyn PolicyRule>>,
}

impl fmt::Debug for PolicyEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.rules.iter().map(|rule| rule.id())).finish()
    }
}

impl Default for PolicyEvaluator {
    fn default() -> Self {
        Self::new(builtin_rules())
    }
}

impl PolicyEvaluator {
    pub fn new(rules: Vec<Arc<dyn PolicyRule>>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Built-in rules followed by the PII masking, cross-border and purpose
    /// limitation adapters.
    pub fn with_security_policies() -> Self {
        let mut evaluator = Self::default();
        evaluator.add_rule(PiiMaskingRule);
        evaluator.add_rule(CrossBorderRule);
        evaluator.add_rule(PurposeLimitationRule);
        evaluator
    }

    pub fn evaluate(&self, context: &ActionContext) -> Vec<PolicyDecision> {
        self.rules.iter().map(|rule| rule.evaluate(context)).collect()
    }

    pub fn evaluate_all(&self, context: &ActionContext) -> Evaluation {
        let evaluation = Evaluation::from_decisions(self.evaluate(context));
        tracing::debug!(
            event_name = "policy.evaluated",
            action = %context.action_type,
            actor = %context.actor,
            role = %context.role,
            environment = %context.environment,
            allow = evaluation.allow,
            requires_approval = evaluation.requires_approval,
            blocked = evaluation.blocked,
            rule_count = evaluation.decisions.len(),
            "policy evaluation completed"
        );
        evaluation
    }

    pub fn add_rule<R>(&mut self, rule: R)
    where
        R: PolicyRule + 'static,
    {
        self.rules.push(Arc::new(rule));
    }

    pub fn rules(&self) -> Vec<RuleDescriptor> {
        self.rules
            .iter()
            .map(|rule| RuleDescriptor {
                id: rule.id().to_string(),
                name: rule.name().to_string(),
                description: rule.description().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
