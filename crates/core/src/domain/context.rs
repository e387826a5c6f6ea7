use std::collections::BTreeMap;
use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "query_execute")]
    QueryExecute,
    #[serde(rename = "dataset_create")]
    DatasetCreate,
    #[serde(rename = "dataset_update")]
    DatasetUpdate,
    #[serde(rename = "dataset_delete")]
    DatasetDelete,
    #[serde(rename = "pipeline_create")]
    PipelineCreate,
    #[serde(rename = "pipeline_deploy")]
    PipelineDeploy,
    #[serde(rename = "policy_create")]
    PolicyCreate,
    #[serde(rename = "policy_update")]
    PolicyUpdate,
    #[serde(rename = "approval_request")]
    ApprovalRequest,
    #[serde(rename = "approval_grant")]
    ApprovalGrant,
    #[serde(rename = "config.describe")]
    ConfigDescribe,
    #[serde(rename = "config.commit")]
    ConfigCommit,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::QueryExecute => "query_execute",
            Self::DatasetCreate => "dataset_create",
            Self::DatasetUpdate => "dataset_update",
            Self::DatasetDelete => "dataset_delete",
            Self::PipelineCreate => "pipeline_create",
            Self::PipelineDeploy => "pipeline_deploy",
            Self::PolicyCreate => "policy_create",
            Self::PolicyUpdate => "policy_update",
            Self::ApprovalRequest => "approval_request",
            Self::ApprovalGrant => "approval_grant",
            Self::ConfigDescribe => "config.describe",
            Self::ConfigCommit => "config.commit",
        }
    }

    /// Actions that mutate platform state and fall under the production write rule.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            Self::DatasetCreate
                | Self::DatasetUpdate
                | Self::DatasetDelete
                | Self::PipelineDeploy
                | Self::PolicyCreate
                | Self::PolicyUpdate
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Viewer,
    Analyst,
    Approver,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "viewer",
            Self::Analyst => "analyst",
            Self::Approver => "approver",
            Self::Admin => "admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "viewer" => Some(Self::Viewer),
            "analyst" => Some(Self::Analyst),
            "approver" => Some(Self::Approver),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Uat,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Uat => "uat",
            Self::Prod => "prod",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "uat" => Ok(Self::Uat),
            "prod" => Ok(Self::Prod),
            other => Err(format!("unsupported environment `{other}` (expected dev|uat|prod)")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiLevel {
    None,
    Low,
    Medium,
    High,
}

impl PiiLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Jurisdiction {
    #[serde(rename = "US", alias = "us")]
    Us,
    #[serde(rename = "EU", alias = "eu")]
    Eu,
    #[serde(rename = "UK", alias = "uk")]
    Uk,
    #[serde(rename = "APAC", alias = "apac")]
    Apac,
    #[serde(rename = "MULTI", alias = "multi")]
    Multi,
    #[serde(rename = "GLOBAL", alias = "global")]
    Global,
}

impl Jurisdiction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Us => "US",
            Self::Eu => "EU",
            Self::Uk => "UK",
            Self::Apac => "APAC",
            Self::Multi => "MULTI",
            Self::Global => "GLOBAL",
        }
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurposeTag {
    CreditRiskAnalysis,
    AmlInvestigation,
    RegulatoryReporting,
    FraudDetection,
    CustomerService,
    MarketingAnalytics,
    ProductDevelopment,
    Operations,
}

impl PurposeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditRiskAnalysis => "CREDIT_RISK_ANALYSIS",
            Self::AmlInvestigation => "AML_INVESTIGATION",
            Self::RegulatoryReporting => "REGULATORY_REPORTING",
            Self::FraudDetection => "FRAUD_DETECTION",
            Self::CustomerService => "CUSTOMER_SERVICE",
            Self::MarketingAnalytics => "MARKETING_ANALYTICS",
            Self::ProductDevelopment => "PRODUCT_DEVELOPMENT",
            Self::Operations => "OPERATIONS",
        }
    }
}

impl fmt::Display for PurposeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attributes attached to an action. Well-known keys are typed; anything else
/// lands in `extra` and is serialized inline next to them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_level: Option<PiiLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<Jurisdiction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_jurisdiction: Option<Jurisdiction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_environment: Option<Environment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_cost_estimate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_cost_estimate: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose_tag: Option<PurposeTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl ActionMetadata {
    pub fn token_cost(&self) -> u64 {
        self.token_cost_estimate.unwrap_or(0)
    }

    pub fn query_cost(&self) -> Decimal {
        self.query_cost_estimate.unwrap_or(Decimal::ZERO)
    }

    pub fn has_justification(&self) -> bool {
        self.justification.as_deref().map(|value| !value.trim().is_empty()).unwrap_or(false)
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContext {
    pub action_type: ActionType,
    pub actor: String,
    pub role: Role,
    pub environment: Environment,
    #[serde(default)]
    pub metadata: ActionMetadata,
}

impl ActionContext {
    pub fn new(
        action_type: ActionType,
        actor: impl Into<String>,
        role: Role,
        environment: Environment,
    ) -> Self {
        Self {
            action_type,
            actor: actor.into(),
            role,
            environment,
            metadata: ActionMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: ActionMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{ActionContext, ActionType, Environment, Jurisdiction, PiiLevel, Role};

    #[test]
    fn context_deserializes_known_and_open_metadata_fields() {
        let context: ActionContext = serde_json::from_value(json!({
            "actionType": "config.commit",
            "actor": "ops-1",
            "role": "admin",
            "environment": "uat",
            "metadata": {
                "piiLevel": "high",
                "jurisdiction": "multi",
                "queryCostEstimate": "12.5",
                "ticket": "CHG-42"
            }
        }))
        .expect("context should deserialize");

        assert_eq!(context.action_type, ActionType::ConfigCommit);
        assert_eq!(context.role, Role::Admin);
        assert_eq!(context.environment, Environment::Uat);
        assert_eq!(context.metadata.pii_level, Some(PiiLevel::High));
        assert_eq!(context.metadata.jurisdiction, Some(Jurisdiction::Multi));
        assert_eq!(context.metadata.query_cost(), Decimal::new(125, 1));
        assert_eq!(context.metadata.extra.get("ticket"), Some(&json!("CHG-42")));
    }

    #[test]
    fn missing_cost_estimates_default_to_zero() {
        let context =
            ActionContext::new(ActionType::QueryExecute, "a-1", Role::Analyst, Environment::Dev);
        assert_eq!(context.metadata.token_cost(), 0);
        assert_eq!(context.metadata.query_cost(), Decimal::ZERO);
        assert!(!context.metadata.has_justification());
    }

    #[test]
    fn write_actions_are_classified() {
        assert!(ActionType::DatasetDelete.is_write());
        assert!(ActionType::PolicyUpdate.is_write());
        assert!(!ActionType::QueryExecute.is_write());
        assert!(!ActionType::PipelineCreate.is_write());
    }
}
