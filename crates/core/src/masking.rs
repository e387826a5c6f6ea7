//! Applies the masking rules carried by a PII decision to query result rows.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::domain::decision::{MaskingRule, MaskingStrategy, PolicyDecision};

pub const MASKED_PLACEHOLDER: &str = "[REDACTED]";
const MASK_CHAR: char = '•';

pub type Row = Map<String, Value>;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedField {
    pub field: String,
    pub strategy: MaskingStrategy,
    pub reason: String,
    pub policy_id: String,
    pub policy_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingPolicySummary {
    pub policy_id: String,
    pub policy_name: String,
    pub reason: String,
}

impl From<&PolicyDecision> for MaskingPolicySummary {
    fn from(decision: &PolicyDecision) -> Self {
        Self {
            policy_id: decision.policy_id.clone(),
            policy_name: decision.policy_name.clone(),
            reason: decision.reason.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskingResult {
    pub masked_results: Vec<Row>,
    pub masked_fields: Vec<MaskedField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_summary: Option<MaskingPolicySummary>,
}

fn normalize_key(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

fn fallback_strategy(policy_id: &str) -> Option<MaskingStrategy> {
    match policy_id.strip_prefix("pii-masking-")? {
        "high" => Some(MaskingStrategy::Redact),
        "medium" | "low" => Some(MaskingStrategy::Partial),
        _ => None,
    }
}

fn resolve_strategy(
    field: &str,
    rules: &[MaskingRule],
    fallback: Option<MaskingStrategy>,
) -> Option<MaskingStrategy> {
    let normalized = normalize_key(field);
    rules
        .iter()
        .find(|rule| {
            rule.field_patterns.iter().any(|pattern| normalized.contains(&normalize_key(pattern)))
        })
        .map(|rule| rule.masking_strategy)
        .or(fallback)
}

/// 32-bit rolling string hash rendered as `hash_<8 hex digits>`. Not a
/// cryptographic digest; it only hides the raw value while keeping equal
/// inputs equal.
fn hash_value(value: &str) -> String {
    let hash = value
        .encode_utf16()
        .fold(0_i32, |hash, unit| hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(i32::from(unit)));
    format!("hash_{:08x}", i64::from(hash).unsigned_abs())
}

pub fn mask_value(value: &Value, strategy: MaskingStrategy) -> Value {
    let text = match value {
        Value::Null => return Value::Null,
        Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    let length = text.chars().count();

    let masked = match strategy {
        MaskingStrategy::Full => MASK_CHAR.to_string().repeat(length.max(4)),
        MaskingStrategy::Partial if length <= 4 => MASK_CHAR.to_string().repeat(length.max(4)),
        MaskingStrategy::Partial => {
            let visible: String = text.chars().skip(length - 4).collect();
            format!("{}{visible}", MASK_CHAR.to_string().repeat((length - 4).max(4)))
        }
        MaskingStrategy::Hash => hash_value(&text),
        MaskingStrategy::Redact => MASKED_PLACEHOLDER.to_string(),
    };
    Value::String(masked)
}

/// Masks the PII columns of `rows` according to the first `pii-masking-*`
/// decision. Decisions that outright block leave rows untouched; the caller
/// is expected to have refused the query already.
pub fn apply_pii_masking(
    rows: Vec<Row>,
    pii_columns: &[&str],
    decisions: &[PolicyDecision],
) -> MaskingResult {
    let Some(decision) =
        decisions.iter().find(|decision| decision.policy_id.starts_with("pii-masking-"))
    else {
        return MaskingResult { masked_results: rows, masked_fields: Vec::new(), policy_summary: None };
    };

    let summary = Some(MaskingPolicySummary::from(decision));
    let pii: HashSet<String> = pii_columns.iter().map(|column| normalize_key(column)).collect();
    if decision.is_blocking() || pii.is_empty() {
        return MaskingResult { masked_results: rows, masked_fields: Vec::new(), policy_summary: summary };
    }

    let rules = decision.masking_rules();
    let fallback = fallback_strategy(&decision.policy_id);
    let mut masked_fields: BTreeMap<String, MaskedField> = BTreeMap::new();
    let mut first_seen: Vec<String> = Vec::new();

    let masked_results = rows
        .into_iter()
        .map(|mut row| {
            for (key, value) in row.iter_mut() {
                let normalized = normalize_key(key);
                if !pii.contains(&normalized) {
                    continue;
                }
                let Some(strategy) = resolve_strategy(key, rules, fallback) else {
                    continue;
                };
                *value = mask_value(value, strategy);
                if !masked_fields.contains_key(&normalized) {
                    first_seen.push(normalized.clone());
                    masked_fields.insert(
                        normalized,
                        MaskedField {
                            field: key.clone(),
                            strategy,
                            reason: decision.reason.clone(),
                            policy_id: decision.policy_id.clone(),
                            policy_name: decision.policy_name.clone(),
                        },
                    );
                }
            }
            row
        })
        .collect();

    let masked_fields =
        first_seen.iter().filter_map(|key| masked_fields.remove(key)).collect();
    MaskingResult { masked_results, masked_fields, policy_summary: summary }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{apply_pii_masking, mask_value, Row, MASKED_PLACEHOLDER};
    use crate::domain::{MaskingStrategy, PiiLevel, PolicyDecision, Role};
    use crate::policy::security::evaluate_pii_masking;

    fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    #[test]
    fn strategies_render_as_expected() {
        assert_eq!(mask_value(&json!("555-867-5309"), MaskingStrategy::Partial), json!("••••••••5309"));
        assert_eq!(mask_value(&json!("abc"), MaskingStrategy::Partial), json!("••••"));
        assert_eq!(mask_value(&json!("ab"), MaskingStrategy::Full), json!("••••"));
        assert_eq!(mask_value(&json!(123456), MaskingStrategy::Redact), json!(MASKED_PLACEHOLDER));
        assert_eq!(mask_value(&Value::Null, MaskingStrategy::Redact), Value::Null);
        assert_eq!(mask_value(&json!("a"), MaskingStrategy::Hash), json!("hash_00000061"));
        assert_eq!(
            mask_value(&json!("x@y.z"), MaskingStrategy::Hash),
            mask_value(&json!("x@y.z"), MaskingStrategy::Hash)
        );
    }

    #[test]
    fn medium_decision_masks_only_pii_columns_with_matching_rules() {
        let decision = evaluate_pii_masking(PiiLevel::Medium, Role::Analyst, true);
        let rows = vec![
            row(json!({"customer_email": "jane@example.com", "ssn": "123-45-6789", "balance": 10})),
            row(json!({"customer_email": "joe@example.com", "ssn": "987-65-4321", "balance": 20})),
        ];

        let result = apply_pii_masking(rows, &["customer_email", "SSN"], &[decision]);

        assert_eq!(result.masked_results[0]["balance"], json!(10));
        assert_eq!(result.masked_results[0]["customer_email"], json!("••••••••••••.com"));
        assert!(result.masked_results[1]["ssn"].as_str().unwrap_or_default().starts_with("hash_"));
        assert_eq!(result.masked_fields.len(), 2);
        assert!(result
            .masked_fields
            .iter()
            .any(|field| field.field == "ssn" && field.strategy == MaskingStrategy::Hash));
        assert_eq!(
            result.policy_summary.map(|summary| summary.policy_id),
            Some("pii-masking-medium".to_string())
        );
    }

    #[test]
    fn high_level_falls_back_to_redaction_for_unlisted_columns() {
        let decision = evaluate_pii_masking(PiiLevel::High, Role::Admin, true);
        let result = apply_pii_masking(
            vec![row(json!({"mothers_maiden_name": "Smith"}))],
            &["mothers_maiden_name"],
            &[decision],
        );
        assert_eq!(result.masked_results[0]["mothers_maiden_name"], json!(MASKED_PLACEHOLDER));
        assert_eq!(result.masked_fields[0].strategy, MaskingStrategy::Redact);
    }

    #[test]
    fn no_masking_decision_or_blocking_decision_passes_rows_through() {
        let rows = vec![row(json!({"email": "a@b.c"}))];
        let untouched = apply_pii_masking(
            rows.clone(),
            &["email"],
            &[PolicyDecision::allow("budget-enforcement", "Budget", "ok")],
        );
        assert_eq!(untouched.masked_results, rows);
        assert!(untouched.policy_summary.is_none());

        let blocked = evaluate_pii_masking(PiiLevel::High, Role::Admin, false);
        let result = apply_pii_masking(rows.clone(), &["email"], &[blocked]);
        assert_eq!(result.masked_results, rows);
        assert!(result.masked_fields.is_empty());
        assert!(result.policy_summary.is_some());
    }
}
