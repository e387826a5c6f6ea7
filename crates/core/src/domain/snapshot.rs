use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::context::{ActionType, Environment};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotState {
    pub metadata: serde_json::Value,
    pub specs: serde_json::Value,
}

impl SnapshotState {
    pub fn empty() -> Self {
        Self {
            metadata: serde_json::Value::Object(Default::default()),
            specs: serde_json::Value::Object(Default::default()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: ActionType,
    pub environment: Environment,
    pub state: SnapshotState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_snapshot_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub snapshot_id: String,
    pub restored_state: SnapshotState,
    pub message: String,
}
