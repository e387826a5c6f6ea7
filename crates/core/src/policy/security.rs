//! Table-driven data protection lookups: PII masking by sensitivity level,
//! cross-border transfer routes and purpose limitation. Each lookup returns a
//! [`PolicyDecision`] carrying the metadata downstream masking needs.

use crate::domain::context::{ActionContext, ActionType, Jurisdiction, PiiLevel, PurposeTag, Role};
use crate::domain::decision::{DecisionMetadata, MaskingRule, MaskingStrategy, PolicyDecision};
use crate::policy::PolicyRule;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PiiMaskingPolicy {
    pub level: PiiLevel,
    pub masking_rules: Vec<MaskingRule>,
    pub allowed_roles: Vec<Role>,
    pub requires_justification: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CrossBorderPolicy {
    pub source: Jurisdiction,
    pub target: Jurisdiction,
    pub allowed: bool,
    pub requires_approval: bool,
    pub legal_basis: &'static str,
    pub restrictions: &'static [&'static str],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PurposeLimitationPolicy {
    pub purpose: PurposeTag,
    pub allowed_domains: &'static [&'static str],
    pub prohibited_domains: &'static [&'static str],
    pub max_retention_days: u32,
    pub requires_consent: bool,
}

pub fn pii_masking_policy(level: PiiLevel) -> Option<PiiMaskingPolicy> {
    use MaskingStrategy::{Hash, Partial, Redact};

    match level {
        PiiLevel::None => None,
        PiiLevel::Low => Some(PiiMaskingPolicy {
            level,
            masking_rules: Vec::new(),
            allowed_roles: vec![Role::Viewer, Role::Analyst, Role::Approver, Role::Admin],
            requires_justification: false,
        }),
        PiiLevel::Medium => Some(PiiMaskingPolicy {
            level,
            masking_rules: vec![
                MaskingRule::new(&["email", "phone", "address", "postal_code", "zip_code"], Partial),
                MaskingRule::new(&["ssn", "tax_id", "national_id"], Hash),
            ],
            allowed_roles: vec![Role::Analyst, Role::Approver, Role::Admin],
            requires_justification: true,
        }),
        PiiLevel::High => Some(PiiMaskingPolicy {
            level,
            masking_rules: vec![
                MaskingRule::new(
                    &["ssn", "tax_id", "national_id", "passport", "drivers_license"],
                    Redact,
                ),
                MaskingRule::new(
                    &["email", "phone", "address", "full_name", "dob", "date_of_birth"],
                    Hash,
                ),
                MaskingRule::new(&["account_number", "routing_number", "card_number", "cvv"], Redact),
            ],
            allowed_roles: vec![Role::Approver, Role::Admin],
            requires_justification: true,
        }),
    }
}

pub const CROSS_BORDER_POLICIES: &[CrossBorderPolicy] = &[
    CrossBorderPolicy {
        source: Jurisdiction::Eu,
        target: Jurisdiction::Us,
        allowed: true,
        requires_approval: true,
        legal_basis: "Standard Contractual Clauses (SCCs)",
        restrictions: &["PII must be minimized", "Data subject rights must be preserved"],
    },
    CrossBorderPolicy {
        source: Jurisdiction::Eu,
        target: Jurisdiction::Apac,
        allowed: false,
        requires_approval: true,
        legal_basis: "GDPR Article 46",
        restrictions: &["Prohibited without explicit legal mechanism"],
    },
    CrossBorderPolicy {
        source: Jurisdiction::Us,
        target: Jurisdiction::Eu,
        allowed: true,
        requires_approval: true,
        legal_basis: "EU-US Data Privacy Framework",
        restrictions: &["Must comply with GDPR requirements"],
    },
    CrossBorderPolicy {
        source: Jurisdiction::Uk,
        target: Jurisdiction::Us,
        allowed: true,
        requires_approval: true,
        legal_basis: "UK-US Data Bridge",
        restrictions: &["UK GDPR compliance required"],
    },
    CrossBorderPolicy {
        source: Jurisdiction::Apac,
        target: Jurisdiction::Eu,
        allowed: true,
        requires_approval: true,
        legal_basis: "Adequacy decision or SCCs",
        restrictions: &["Jurisdiction-specific requirements apply"],
    },
];

pub const PURPOSE_LIMITATION_POLICIES: &[PurposeLimitationPolicy] = &[
    PurposeLimitationPolicy {
        purpose: PurposeTag::CreditRiskAnalysis,
        allowed_domains: &["credit_risk", "finance_reporting", "treasury_markets"],
        prohibited_domains: &["aml_fcc", "customer_service"],
        max_retention_days: 2555,
        requires_consent: false,
    },
    PurposeLimitationPolicy {
        purpose: PurposeTag::AmlInvestigation,
        allowed_domains: &["aml_fcc", "credit_risk", "retail_channels"],
        prohibited_domains: &["marketing_analytics"],
        max_retention_days: 3650,
        requires_consent: false,
    },
    PurposeLimitationPolicy {
        purpose: PurposeTag::RegulatoryReporting,
        allowed_domains: &["finance_reporting", "credit_risk", "aml_fcc", "treasury_markets"],
        prohibited_domains: &[],
        max_retention_days: 2555,
        requires_consent: false,
    },
    PurposeLimitationPolicy {
        purpose: PurposeTag::FraudDetection,
        allowed_domains: &["aml_fcc", "retail_channels", "operations"],
        prohibited_domains: &["marketing_analytics"],
        max_retention_days: 2190,
        requires_consent: false,
    },
    PurposeLimitationPolicy {
        purpose: PurposeTag::CustomerService,
        allowed_domains: &["retail_channels", "operations"],
        prohibited_domains: &["credit_risk", "aml_fcc", "finance_reporting"],
        max_retention_days: 365,
        requires_consent: true,
    },
    PurposeLimitationPolicy {
        purpose: PurposeTag::MarketingAnalytics,
        allowed_domains: &["retail_channels"],
        prohibited_domains: &["credit_risk", "aml_fcc", "finance_reporting", "treasury_markets"],
        max_retention_days: 730,
        requires_consent: true,
    },
    PurposeLimitationPolicy {
        purpose: PurposeTag::ProductDevelopment,
        allowed_domains: &["retail_channels", "operations"],
        prohibited_domains: &["aml_fcc", "credit_risk"],
        max_retention_days: 1095,
        requires_consent: true,
    },
    PurposeLimitationPolicy {
        purpose: PurposeTag::Operations,
        allowed_domains: &["operations", "retail_channels"],
        prohibited_domains: &["aml_fcc", "credit_risk", "finance_reporting"],
        max_retention_days: 730,
        requires_consent: false,
    },
];

pub fn evaluate_pii_masking(level: PiiLevel, role: Role, has_justification: bool) -> PolicyDecision {
    let Some(policy) = pii_masking_policy(level) else {
        return PolicyDecision::allow(
            "pii-masking-unknown",
            "PII Masking - Unknown Level",
            "Unknown PII level, defaulting to allow",
        );
    };

    let label = level.as_str().to_ascii_uppercase();
    let policy_id = format!("pii-masking-{}", level.as_str());
    let policy_name = format!("PII Masking - {label}");

    if !policy.allowed_roles.contains(&role) {
        let allowed =
            policy.allowed_roles.iter().map(|role| role.as_str()).collect::<Vec<_>>().join(", ");
        return PolicyDecision::require_approval(
            policy_id,
            policy_name,
            format!(
                "User role '{role}' not permitted for {label} PII data. Allowed roles: {allowed}"
            ),
        );
    }

    if policy.requires_justification && !has_justification {
        return PolicyDecision::block(
            policy_id,
            policy_name,
            format!("Access to {label} PII data requires business justification"),
        );
    }

    PolicyDecision::allow(
        policy_id,
        policy_name,
        format!("Access granted with {label} PII masking applied"),
    )
    .with_metadata(DecisionMetadata::Masking { masking_rules: policy.masking_rules })
}

pub fn evaluate_cross_border(
    source: Jurisdiction,
    target: Jurisdiction,
    role: Role,
) -> PolicyDecision {
    if source == target {
        return PolicyDecision::allow(
            "cross-border-same-jurisdiction",
            "Cross-Border - Same Jurisdiction",
            "Same jurisdiction data access",
        );
    }

    let Some(policy) =
        CROSS_BORDER_POLICIES.iter().find(|policy| policy.source == source && policy.target == target)
    else {
        return PolicyDecision::require_approval(
            "cross-border-undefined",
            "Cross-Border - Undefined Route",
            format!(
                "No cross-border policy defined for {source} -> {target}. Default deny with approval required."
            ),
        );
    };

    let policy_id = format!("cross-border-{source}-{target}");
    let policy_name = format!("Cross-Border - {source} to {target}");
    let restrictions = policy.restrictions.join("; ");

    if !policy.allowed {
        return PolicyDecision::verdict(
            false,
            policy.requires_approval && role == Role::Admin,
            policy_id,
            policy_name,
            format!(
                "Cross-border data transfer from {source} to {target} is prohibited. {restrictions}"
            ),
        );
    }

    if policy.requires_approval && role != Role::Admin {
        return PolicyDecision::require_approval(
            policy_id,
            policy_name,
            format!(
                "Cross-border transfer requires approval. Legal basis: {}. Restrictions: {restrictions}",
                policy.legal_basis
            ),
        );
    }

    PolicyDecision::allow(
        policy_id,
        policy_name,
        format!("Cross-border transfer permitted under {}", policy.legal_basis),
    )
    .with_metadata(DecisionMetadata::Transfer {
        legal_basis: policy.legal_basis.to_string(),
        restrictions: policy.restrictions.iter().map(|item| (*item).to_string()).collect(),
    })
}

pub fn evaluate_purpose_limitation(purpose: Option<PurposeTag>, domain: &str) -> PolicyDecision {
    let Some(purpose) = purpose else {
        return PolicyDecision::block(
            "purpose-limitation-missing",
            "Purpose Limitation - Missing Tag",
            "Purpose tag is required for all data access requests",
        );
    };

    let policy_id = format!("purpose-limitation-{purpose}");
    let policy_name = format!("Purpose Limitation - {purpose}");

    let Some(policy) = PURPOSE_LIMITATION_POLICIES.iter().find(|policy| policy.purpose == purpose)
    else {
        return PolicyDecision::require_approval(
            "purpose-limitation-unknown",
            "Purpose Limitation - Unknown Purpose",
            format!("Unknown purpose tag: {purpose}. Approval required."),
        );
    };

    if policy.prohibited_domains.contains(&domain) {
        return PolicyDecision::block(
            policy_id,
            policy_name,
            format!("Data domain '{domain}' is prohibited for purpose '{purpose}'"),
        );
    }

    if !policy.allowed_domains.contains(&domain) {
        return PolicyDecision::require_approval(
            policy_id,
            policy_name,
            format!(
                "Data domain '{domain}' not explicitly allowed for purpose '{purpose}'. Approval required."
            ),
        );
    }

    let reason = if policy.requires_consent {
        format!("Access permitted for {purpose}. User consent verification required.")
    } else {
        format!("Access permitted for legitimate purpose: {purpose}")
    };

    PolicyDecision::allow(policy_id, policy_name, reason).with_metadata(
        DecisionMetadata::Retention {
            max_retention_days: policy.max_retention_days,
            requires_consent: policy.requires_consent,
        },
    )
}

/// Applies the PII masking table when the context carries a PII level.
#[derive(Clone, Copy, Debug, Default)]
pub struct PiiMaskingRule;

impl PolicyRule for PiiMaskingRule {
    fn id(&self) -> &str {
        "pii-masking"
    }

    fn name(&self) -> &str {
        "PII Masking"
    }

    fn description(&self) -> &str {
        "Role and justification requirements per PII sensitivity level"
    }

    fn evaluate(&self, context: &ActionContext) -> PolicyDecision {
        match context.metadata.pii_level {
            Some(level) => {
                evaluate_pii_masking(level, context.role, context.metadata.has_justification())
            }
            None => PolicyDecision::allow(self.id(), self.name(), "No PII classification supplied"),
        }
    }
}

/// Applies the transfer route table when both ends of a transfer are known.
#[derive(Clone, Copy, Debug, Default)]
pub struct CrossBorderRule;

impl PolicyRule for CrossBorderRule {
    fn id(&self) -> &str {
        "cross-border"
    }

    fn name(&self) -> &str {
        "Cross-Border Transfer"
    }

    fn description(&self) -> &str {
        "Jurisdiction-to-jurisdiction transfer restrictions"
    }

    fn evaluate(&self, context: &ActionContext) -> PolicyDecision {
        match (context.metadata.jurisdiction, context.metadata.target_jurisdiction) {
            (Some(source), Some(target)) => evaluate_cross_border(source, target, context.role),
            _ => PolicyDecision::allow(self.id(), self.name(), "No cross-border transfer requested"),
        }
    }
}

/// Requires a purpose tag compatible with the data domain on every query.
#[derive(Clone, Copy, Debug, Default)]
pub struct PurposeLimitationRule;

impl PolicyRule for PurposeLimitationRule {
    fn id(&self) -> &str {
        "purpose-limitation"
    }

    fn name(&self) -> &str {
        "Purpose Limitation"
    }

    fn description(&self) -> &str {
        "Data access must declare a purpose compatible with the data domain"
    }

    fn evaluate(&self, context: &ActionContext) -> PolicyDecision {
        if context.action_type != ActionType::QueryExecute {
            return PolicyDecision::allow(self.id(), self.name(), "Not a data access request");
        }

        evaluate_purpose_limitation(
            context.metadata.purpose_tag,
            context.metadata.domain.as_deref().unwrap_or_default(),
        )
    }
}
