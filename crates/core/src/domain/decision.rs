use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MaskingStrategy {
    Full,
    Partial,
    Hash,
    Redact,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingRule {
    pub field_patterns: Vec<String>,
    pub masking_strategy: MaskingStrategy,
}

impl MaskingRule {
    pub fn new(field_patterns: &[&str], masking_strategy: MaskingStrategy) -> Self {
        Self {
            field_patterns: field_patterns.iter().map(|pattern| (*pattern).to_string()).collect(),
            masking_strategy,
        }
    }
}

/// Extra material a rule hands to downstream consumers (masking, transfer
/// agreements, retention).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionMetadata {
    Masking {
        #[serde(rename = "maskingRules")]
        masking_rules: Vec<MaskingRule>,
    },
    Transfer {
        #[serde(rename = "legalBasis")]
        legal_basis: String,
        restrictions: Vec<String>,
    },
    Retention {
        #[serde(rename = "maxRetentionDays")]
        max_retention_days: u32,
        #[serde(rename = "requiresConsent")]
        requires_consent: bool,
    },
}

/// One rule's verdict. `allow == false && requires_approval == false` is an
/// outright block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDecision {
    pub allow: bool,
    pub requires_approval: bool,
    pub reason: String,
    pub policy_id: String,
    pub policy_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cost_estimate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_cost_estimate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DecisionMetadata>,
}

impl PolicyDecision {
    pub fn allow(
        policy_id: impl Into<String>,
        policy_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::verdict(true, false, policy_id, policy_name, reason)
    }

    pub fn block(
        policy_id: impl Into<String>,
        policy_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::verdict(false, false, policy_id, policy_name, reason)
    }

    pub fn require_approval(
        policy_id: impl Into<String>,
        policy_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::verdict(false, true, policy_id, policy_name, reason)
    }

    pub fn verdict(
        allow: bool,
        requires_approval: bool,
        policy_id: impl Into<String>,
        policy_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            allow,
            requires_approval,
            reason: reason.into(),
            policy_id: policy_id.into(),
            policy_name: policy_name.into(),
            token_cost_estimate: None,
            query_cost_estimate: None,
            metadata: None,
        }
    }

    pub fn with_costs(mut self, token_cost: u64, query_cost: Decimal) -> Self {
        self.token_cost_estimate = Some(token_cost);
        self.query_cost_estimate = Some(query_cost);
        self
    }

    pub fn with_metadata(mut self, metadata: DecisionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn is_blocking(&self) -> bool {
        !self.allow && !self.requires_approval
    }

    pub fn masking_rules(&self) -> &[MaskingRule] {
        match &self.metadata {
            Some(DecisionMetadata::Masking { masking_rules }) => masking_rules,
            _ => &[],
        }
    }
}
