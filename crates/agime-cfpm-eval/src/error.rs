//! Error types for the evaluation harness

use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, EvalError>;

/// Harness error types.
///
/// Every variant is fatal for the run that raised it. Conditions the harness
/// is expected to survive (a reply stream hitting its deadline, a session
/// store that cannot be found) are modelled as degraded outcomes instead.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error("server /status did not become ready within {}s", .waited.as_secs())]
    ReadinessTimeout { waited: Duration },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned HTTP {status}: {body}")]
    Http {
        url: String,
        status: u16,
        body: String,
    },

    #[error("server executable not found: {}", .path.display())]
    MissingExecutable { path: PathBuf },

    #[error("provider/model not resolved; pass --provider and --model explicitly or configure them")]
    ProviderUnresolved,

    #[error("unexpected response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("session store error at {}: {source}", .path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: sqlx::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EvalError {
    /// Stable snake_case name used in the report's `error.kind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReadinessTimeout { .. } => "readiness_timeout",
            Self::Transport { .. } => "transport_error",
            Self::Http { .. } => "http_error",
            Self::MissingExecutable { .. } => "missing_executable",
            Self::ProviderUnresolved => "provider_unresolved",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::Storage { .. } => "storage_error",
            Self::Io(_) => "io_error",
            Self::Json(_) => "json_error",
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord {
            kind: self.kind().to_string(),
            message: self.to_string(),
        }
    }
}

/// Serialized form of a fatal error inside the report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
}
