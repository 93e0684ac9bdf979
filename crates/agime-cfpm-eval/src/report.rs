//! The JSON report artifact and its console summary.

use crate::error::{EvalError, ErrorRecord, Result};
use crate::memory::storage::StorageSnapshot;
use crate::memory::{MemoryCandidate, MemoryFact};
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn now_ts() -> i64 {
    Utc::now().timestamp()
}

/// Fields every report carries; `details` holds the flow-specific sections.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report<T> {
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    pub base_url: String,
    pub steps: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub details: T,
    pub success: bool,
    pub error: Option<ErrorRecord>,
}

impl<T: Serialize + Default> Report<T> {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            started_at: now_ts(),
            finished_at: None,
            base_url: base_url.into(),
            steps: Vec::new(),
            session_id: None,
            details: T::default(),
            success: false,
            error: None,
        }
    }

    /// Record a milestone.
    pub fn step(&mut self, name: &str) {
        info!("step: {}", name);
        self.steps.push(name.to_string());
    }

    /// Close the report with the flow's outcome.
    pub fn finish(&mut self, outcome: Result<()>) {
        self.finished_at = Some(now_ts());
        match outcome {
            Ok(()) => {
                self.success = true;
                self.error = None;
            }
            Err(e) => {
                tracing::error!("Evaluation failed: {}", e);
                self.success = false;
                self.error = Some(e.to_record());
            }
        }
    }

    /// Pretty-print to `path`, creating parent directories.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)?;
        info!("Report written to {}", path.display());
        Ok(())
    }
}

/// `<dir>/<prefix>_<unix seconds>.json`
pub fn timestamped_path(dir: &Path, prefix: &str) -> PathBuf {
    dir.join(format!("{}_{}.json", prefix, now_ts()))
}

/// Storage section of a report. Row lists are only embedded on request.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DbSnapshotReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fact_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub facts: Option<Vec<MemoryFact>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<MemoryCandidate>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tried: Vec<PathBuf>,
}

impl DbSnapshotReport {
    pub fn from_snapshot(snapshot: &StorageSnapshot, include_rows: bool) -> Self {
        match snapshot {
            StorageSnapshot::Available {
                facts, candidates, ..
            } => Self {
                fact_rows: Some(facts.len()),
                candidate_rows: Some(candidates.len()),
                facts: include_rows.then(|| facts.clone()),
                candidates: include_rows.then(|| candidates.clone()),
                ..Default::default()
            },
            StorageSnapshot::Unavailable { reason, tried, .. } => Self {
                warning: Some(reason.clone()),
                tried: tried.clone(),
                ..Default::default()
            },
        }
    }
}

/// The condensed view printed to stdout.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleSummary {
    pub success: bool,
    pub output: String,
    pub session_id: Option<String>,
    pub issues: Vec<String>,
    pub error: Option<ErrorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_request_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_count: Option<usize>,
}

impl ConsoleSummary {
    pub fn print(&self) -> Result<()> {
        let text = serde_json::to_string_pretty(self).map_err(EvalError::from)?;
        println!("{}", text);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tempfile::TempDir;

    #[derive(Debug, Default, Serialize)]
    #[serde(rename_all = "camelCase")]
    struct Details {
        #[serde(skip_serializing_if = "Option::is_none")]
        provider: Option<String>,
    }

    #[test]
    fn test_failed_report_records_error_and_flattens_details() {
        let mut report: Report<Details> = Report::new("http://127.0.0.1:31337");
        report.step("server_reused");
        report.details.provider = Some("openai".to_string());
        report.finish(Err(EvalError::ProviderUnresolved));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "provider_unresolved");
        assert_eq!(json["provider"], "openai");
        assert_eq!(json["steps"], serde_json::json!(["server_reused"]));
        assert!(json["finishedAt"].as_i64().unwrap() >= json["startedAt"].as_i64().unwrap());
        assert!(json.get("sessionId").is_none());
    }

    #[test]
    fn test_write_creates_parent_dirs_and_keeps_unicode() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/dir/report.json");

        let mut report: Report<Details> = Report::new("http://h:1");
        report.step("桌面");
        report.finish(Ok(()));
        report.write(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("桌面"));
        let json: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(json["success"], true);
        assert!(json["error"].is_null());
    }

    #[test]
    fn test_timestamped_path() {
        let path = timestamped_path(Path::new("data"), "cfpm_eval_report");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("cfpm_eval_report_"));
        assert!(name.ends_with(".json"));
        assert_eq!(path.parent(), Some(Path::new("data")));
    }

    #[test]
    fn test_db_snapshot_report_shapes() {
        let available = StorageSnapshot::Available {
            path: PathBuf::from("/db"),
            facts: vec![MemoryFact::default()],
            candidates: Vec::new(),
        };
        let counts = serde_json::to_value(DbSnapshotReport::from_snapshot(&available, false)).unwrap();
        assert_eq!(counts, serde_json::json!({ "factRows": 1, "candidateRows": 0 }));

        let with_rows = DbSnapshotReport::from_snapshot(&available, true);
        assert_eq!(with_rows.facts.as_ref().map(Vec::len), Some(1));

        let missing = StorageSnapshot::Unavailable {
            path: None,
            reason: "sessions.db not found".to_string(),
            tried: vec![PathBuf::from("/a/sessions.db")],
        };
        let json = serde_json::to_value(DbSnapshotReport::from_snapshot(&missing, true)).unwrap();
        assert_eq!(json["warning"], "sessions.db not found");
        assert_eq!(json["tried"][0], "/a/sessions.db");
    }
}
