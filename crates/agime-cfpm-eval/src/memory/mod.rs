//! CFPM memory records and the API-side snapshot reader.

pub mod cross_check;
pub mod storage;

use crate::client::ApiClient;
use crate::error::{EvalError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

pub const DEFAULT_CANDIDATE_LIMIT: u32 = 200;
pub const DEFAULT_TOOL_GATE_LIMIT: u32 = 200;

const STATUS_ACTIVE: &str = "active";
const DECISION_ACCEPTED: &str = "accepted";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryFact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl MemoryFact {
    pub fn is_active(&self) -> bool {
        self.status.trim().eq_ignore_ascii_case(STATUS_ACTIVE)
    }

    fn category_contains(&self, needle: &str) -> bool {
        self.category.to_ascii_lowercase().contains(needle)
    }

    /// Categories such as `artifact`, `artifact_path`.
    pub fn is_artifact(&self) -> bool {
        self.category_contains("artifact")
    }

    /// Categories such as `invalid_path`, `artifact_invalid_path`.
    pub fn is_invalid_path_marker(&self) -> bool {
        self.category_contains("invalid_path")
    }

    /// Identity used to reconcile API-reported facts with stored rows.
    pub fn identity_key(&self) -> FactKey {
        FactKey(
            self.category.clone(),
            self.content.clone(),
            self.status.clone(),
            self.source.clone(),
        )
    }
}

/// `(category, content, status, source)`; serializes as a 4-element array.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct FactKey(pub String, pub String, pub String, pub String);

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCandidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub decision: String,
    #[serde(default)]
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

impl MemoryCandidate {
    pub fn is_accepted(&self) -> bool {
        self.decision.trim().eq_ignore_ascii_case(DECISION_ACCEPTED)
    }
}

/// Cached decision keyed by the path a tool invocation targeted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolGate {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub tool: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub original_command: String,
    #[serde(default)]
    pub rewritten_command: String,
    #[serde(default)]
    pub verbosity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub struct SnapshotLimits {
    pub candidates: u32,
    pub tool_gates: u32,
}

impl Default for SnapshotLimits {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_CANDIDATE_LIMIT,
            tool_gates: DEFAULT_TOOL_GATE_LIMIT,
        }
    }
}

/// The service's own view of a session's memory.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    pub facts: Vec<MemoryFact>,
    pub candidates: Vec<MemoryCandidate>,
    pub tool_gates: Vec<ToolGate>,
}

pub fn session_path(session_id: &str) -> String {
    format!("/sessions/{}", urlencoding::encode(session_id))
}

/// Fetch facts, candidates and tool gates for a session. An empty or `null`
/// body reads as an empty list.
pub async fn fetch_api_snapshot(
    client: &ApiClient,
    session_id: &str,
    limits: SnapshotLimits,
) -> Result<MemorySnapshot> {
    let base = session_path(session_id);
    let facts = fetch_list(client, &format!("{}/memory/facts", base)).await?;
    let candidates = fetch_list(
        client,
        &format!("{}/memory/candidates?limit={}", base, limits.candidates),
    )
    .await?;
    let tool_gates = fetch_list(
        client,
        &format!("{}/memory/tool-gates?limit={}", base, limits.tool_gates),
    )
    .await?;

    info!(
        "API memory snapshot: {} facts, {} candidates, {} tool gates",
        facts.len(),
        candidates.len(),
        tool_gates.len()
    );
    Ok(MemorySnapshot {
        facts,
        candidates,
        tool_gates,
    })
}

async fn fetch_list<T: DeserializeOwned>(client: &ApiClient, path: &str) -> Result<Vec<T>> {
    match client.get_json(path).await? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(value) => serde_json::from_value(value).map_err(|e| EvalError::InvalidResponse {
            url: format!("{}{}", client.base_url(), path),
            reason: e.to_string(),
        }),
    }
}
