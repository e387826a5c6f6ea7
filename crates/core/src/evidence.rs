//! Tamper-evident evidence bundles: canonical SHA-256 content hashes plus a
//! keyed signature over the hash, persisted through the [`KvStore`] seam.

use std::fmt;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::store::{KvStore, StoreError};

type HmacSha256 = Hmac<Sha256>;

pub const DEFAULT_SIGNING_KEY: &str = "SIGNING_KEY_PLACEHOLDER";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureScheme {
    /// `sha256(hash + ":" + key)`, readable by existing evidence consumers.
    #[default]
    Sha256Concat,
    HmacSha256,
}

impl SignatureScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256Concat => "sha256_concat",
            Self::HmacSha256 => "hmac_sha256",
        }
    }

    pub fn sign(&self, hash: &str, signing_key: &str) -> String {
        match self {
            Self::Sha256Concat => sign_hash(hash, signing_key),
            Self::HmacSha256 => hmac_hex(signing_key.as_bytes(), hash.as_bytes()),
        }
    }
}

impl std::str::FromStr for SignatureScheme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sha256_concat" => Ok(Self::Sha256Concat),
            "hmac_sha256" => Ok(Self::HmacSha256),
            other => Err(format!(
                "unsupported signature scheme `{other}` (expected sha256_concat|hmac_sha256)"
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalEvidenceStage {
    Request,
    ApprovedAndExecuted,
    Rejected,
}

impl ApprovalEvidenceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Request => "request",
            Self::ApprovedAndExecuted => "approved_and_executed",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvidenceKey {
    ConfigCopilotRun(String),
    ApprovalPack { pack_id: String, stage: ApprovalEvidenceStage },
    PipelinePack(String),
}

impl EvidenceKey {
    pub fn approval_pack(pack_id: impl Into<String>, stage: ApprovalEvidenceStage) -> Self {
        Self::ApprovalPack { pack_id: pack_id.into(), stage }
    }

    pub fn as_key(&self) -> String {
        match self {
            Self::ConfigCopilotRun(id) => format!("evidence/config_copilot_runs/{id}"),
            Self::ApprovalPack { pack_id, stage } => {
                format!("evidence/approval_runs/{pack_id}/{}", stage.as_str())
            }
            Self::PipelinePack(pack_id) => format!("evidence/pipeline_runs/{pack_id}"),
        }
    }
}

impl fmt::Display for EvidenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_key())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceBundle<T> {
    pub payload: T,
    pub hash: String,
    pub signature: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Valid,
    PayloadAltered,
    SignatureMismatch,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceVerification {
    pub hash_matches: bool,
    pub signature_matches: bool,
    pub expected_hash: String,
    pub expected_signature: String,
}

impl EvidenceVerification {
    pub fn is_valid(&self) -> bool {
        self.hash_matches && self.signature_matches
    }

    pub fn status(&self) -> VerificationStatus {
        match (self.hash_matches, self.signature_matches) {
            (true, true) => VerificationStatus::Valid,
            (false, _) => VerificationStatus::PayloadAltered,
            (true, false) => VerificationStatus::SignatureMismatch,
        }
    }

    pub fn failure_reason(&self) -> Option<String> {
        match self.status() {
            VerificationStatus::Valid => None,
            VerificationStatus::PayloadAltered => {
                Some(format!("payload hash mismatch (expected {})", self.expected_hash))
            }
            VerificationStatus::SignatureMismatch => Some("signature mismatch".to_string()),
        }
    }
}

/// Recursively sorts object keys; arrays keep their order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        Value::Object(entries) => {
            let mut keys: Vec<&String> = entries.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                if let Some(nested) = entries.get(key) {
                    sorted.insert(key.clone(), canonicalize(nested));
                }
            }
            Value::Object(sorted)
        }
        primitive => primitive.clone(),
    }
}

pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

pub fn hash_value(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

pub fn hash_payload<T: Serialize>(payload: &T) -> Result<String, StoreError> {
    Ok(hash_value(&serde_json::to_value(payload)?))
}

pub fn sign_hash(hash: &str, signing_key: &str) -> String {
    sha256_hex(format!("{hash}:{signing_key}").as_bytes())
}

#[derive(Clone)]
pub struct EvidenceStore {
    signing_key: SecretString,
    scheme: SignatureScheme,
    store: Option<Arc<dyn KvStore>>,
}

impl fmt::Debug for EvidenceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvidenceStore")
            .field("scheme", &self.scheme)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}

impl Default for EvidenceStore {
    fn default() -> Self {
        Self::new(DEFAULT_SIGNING_KEY.to_string().into(), SignatureScheme::default())
    }
}

impl EvidenceStore {
    pub fn new(signing_key: SecretString, scheme: SignatureScheme) -> Self {
        Self { signing_key, scheme, store: None }
    }

    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn scheme(&self) -> SignatureScheme {
        self.scheme
    }

    fn sign(&self, hash: &str) -> String {
        self.scheme.sign(hash, self.signing_key.expose_secret())
    }

    pub fn create_bundle<T: Serialize>(&self, payload: T) -> Result<EvidenceBundle<T>, StoreError> {
        let hash = hash_payload(&payload)?;
        let signature = self.sign(&hash);
        Ok(EvidenceBundle { payload, hash, signature })
    }

    /// Recomputes hash and signature from the payload. Never fails; a payload
    /// that cannot be serialized is hashed as `null` and reported as altered.
    pub fn verify<T: Serialize>(&self, bundle: &EvidenceBundle<T>) -> EvidenceVerification {
        let value = serde_json::to_value(&bundle.payload).unwrap_or(Value::Null);
        let expected_hash = hash_value(&value);
        let expected_signature = self.sign(&expected_hash);
        EvidenceVerification {
            hash_matches: expected_hash == bundle.hash,
            signature_matches: expected_signature == bundle.signature,
            expected_hash,
            expected_signature,
        }
    }

    /// Creates the bundle and writes it when a backing store is configured.
    pub async fn store_bundle<T: Serialize>(
        &self,
        key: &EvidenceKey,
        payload: T,
    ) -> Result<EvidenceBundle<T>, StoreError> {
        let bundle = self.create_bundle(payload)?;
        if let Some(store) = &self.store {
            store.set(&key.as_key(), serde_json::to_value(&bundle)?).await?;
            tracing::info!(
                event_name = "evidence.stored",
                key = %key,
                hash = %bundle.hash,
                "evidence bundle stored"
            );
        }
        Ok(bundle)
    }

    pub async fn load_bundle<T: DeserializeOwned>(
        &self,
        key: &EvidenceKey,
    ) -> Result<Option<EvidenceBundle<T>>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.get(&key.as_key()).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }
}

fn hmac_hex(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => return sha256_hex(payload),
    };
    mac.update(payload);
    encode_hex(mac.finalize().into_bytes().as_slice())
}

pub fn sha256_hex(payload: &[u8]) -> String {
    encode_hex(Sha256::digest(payload).as_slice())
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{byte:02x}")).collect()
}
