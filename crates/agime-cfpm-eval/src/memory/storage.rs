//! Read-only access to the service's session store.
//!
//! The store is located by a fixed discovery order:
//! 1. an explicit database file
//! 2. an explicit path root (`<root>/data/sessions/sessions.db`)
//! 3. an environment path root (`AGIME_PATH_ROOT`, `GOOSE_PATH_ROOT`, `PATH_ROOT`)
//! 4. the platform data directory for the `AGIME/agime` application
//!    (`<data_dir>/sessions/sessions.db`)
//!
//! The first existing file wins. When none exists, storage cross-validation
//! is skipped and reported rather than failed.

use super::{MemoryCandidate, MemoryFact};
use crate::error::{EvalError, Result};
use etcetera::{choose_app_strategy, AppStrategy, AppStrategyArgs};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DATA_FOLDER: &str = "data";
pub const SESSIONS_FOLDER: &str = "sessions";
pub const DB_NAME: &str = "sessions.db";

const PATH_ROOT_ENV_KEYS: [&str; 3] = ["AGIME_PATH_ROOT", "GOOSE_PATH_ROOT", "PATH_ROOT"];

type StoredFactRow = (String, String, String, String, f64, i64, Option<String>);
type StoredCandidateRow = (String, String, String, String, String);

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreOrigin {
    ExplicitFile,
    ExplicitRoot,
    EnvironmentRoot,
    PlatformDataDir,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoreCandidate {
    pub origin: StoreOrigin,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct StorageLocator {
    explicit_file: Option<PathBuf>,
    explicit_root: Option<PathBuf>,
    environment_root: Option<PathBuf>,
    platform_data_dir: Option<PathBuf>,
}

impl StorageLocator {
    /// Locator seeded from the process environment and the platform
    /// conventions, with the caller's explicit overrides on top.
    pub fn from_environment(explicit_file: Option<PathBuf>, explicit_root: Option<PathBuf>) -> Self {
        Self {
            explicit_file,
            explicit_root,
            environment_root: environment_path_root(),
            platform_data_dir: platform_data_dir(),
        }
    }

    pub fn with_explicit_file(mut self, path: Option<PathBuf>) -> Self {
        self.explicit_file = path;
        self
    }

    pub fn with_explicit_root(mut self, root: Option<PathBuf>) -> Self {
        self.explicit_root = root;
        self
    }

    pub fn with_environment_root(mut self, root: Option<PathBuf>) -> Self {
        self.environment_root = root;
        self
    }

    pub fn with_platform_data_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.platform_data_dir = dir;
        self
    }

    /// Every candidate location, in discovery order.
    pub fn candidates(&self) -> Vec<StoreCandidate> {
        let rooted = |root: &PathBuf| root.join(DATA_FOLDER).join(SESSIONS_FOLDER).join(DB_NAME);
        let mut candidates = Vec::new();
        if let Some(file) = &self.explicit_file {
            candidates.push(StoreCandidate {
                origin: StoreOrigin::ExplicitFile,
                path: file.clone(),
            });
        }
        if let Some(root) = &self.explicit_root {
            candidates.push(StoreCandidate {
                origin: StoreOrigin::ExplicitRoot,
                path: rooted(root),
            });
        }
        if let Some(root) = &self.environment_root {
            candidates.push(StoreCandidate {
                origin: StoreOrigin::EnvironmentRoot,
                path: rooted(root),
            });
        }
        if let Some(dir) = &self.platform_data_dir {
            candidates.push(StoreCandidate {
                origin: StoreOrigin::PlatformDataDir,
                path: dir.join(SESSIONS_FOLDER).join(DB_NAME),
            });
        }
        candidates
    }

    /// First candidate that exists as a file.
    pub fn locate(&self) -> Option<StoreCandidate> {
        self.candidates()
            .into_iter()
            .find(|candidate| candidate.path.is_file())
    }
}

fn environment_path_root() -> Option<PathBuf> {
    PATH_ROOT_ENV_KEYS.iter().find_map(|key| {
        std::env::var(key)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    })
}

fn platform_data_dir() -> Option<PathBuf> {
    choose_app_strategy(AppStrategyArgs {
        top_level_domain: "AGIME".to_string(),
        author: "AGIME".to_string(),
        app_name: "agime".to_string(),
    })
    .ok()
    .map(|strategy| strategy.data_dir())
}

/// A read-only handle on the session store.
pub struct SessionStore {
    pool: Pool<Sqlite>,
    path: PathBuf,
}

impl SessionStore {
    pub async fn open_read_only(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true)
            .create_if_missing(false)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|source| EvalError::Storage {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(Self {
            pool,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn storage_error(&self, source: sqlx::Error) -> EvalError {
        EvalError::Storage {
            path: self.path.clone(),
            source,
        }
    }

    /// All fact rows of a session, most recently updated first.
    pub async fn memory_facts(&self, session_id: &str) -> Result<Vec<MemoryFact>> {
        let rows = sqlx::query_as::<_, StoredFactRow>(
            r#"
            SELECT category, content, status, source, confidence, evidence_count, validation_command
            FROM memory_facts
            WHERE session_id = ?
            ORDER BY updated_at DESC, created_at DESC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.storage_error(e))?;

        Ok(rows
            .into_iter()
            .map(|row| MemoryFact {
                category: row.0,
                content: row.1,
                status: row.2,
                source: row.3,
                confidence: Some(row.4),
                evidence_count: Some(row.5),
                validation_command: row.6,
                ..Default::default()
            })
            .collect())
    }

    /// The newest `limit` candidate rows of a session.
    pub async fn memory_candidates(&self, session_id: &str, limit: u32) -> Result<Vec<MemoryCandidate>> {
        let rows = sqlx::query_as::<_, StoredCandidateRow>(
            r#"
            SELECT category, content, source, decision, reason
            FROM memory_candidates
            WHERE session_id = ?
            ORDER BY created_at DESC
            LIMIT ?
            "#,
        )
        .bind(session_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| self.storage_error(e))?;

        Ok(rows
            .into_iter()
            .map(|row| MemoryCandidate {
                category: row.0,
                content: row.1,
                source: row.2,
                decision: row.3,
                reason: row.4,
                ..Default::default()
            })
            .collect())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

/// Outcome of the best-effort storage read.
#[derive(Debug, Clone)]
pub enum StorageSnapshot {
    Available {
        path: PathBuf,
        facts: Vec<MemoryFact>,
        candidates: Vec<MemoryCandidate>,
    },
    Unavailable {
        path: Option<PathBuf>,
        reason: String,
        tried: Vec<PathBuf>,
    },
}

impl StorageSnapshot {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Available { path, .. } => Some(path),
            Self::Unavailable { path, .. } => path.as_deref(),
        }
    }
}

/// Locate the store and read the session's fact and candidate rows. Never
/// fails: a missing or unreadable store yields [`StorageSnapshot::Unavailable`].
pub async fn fetch_storage_snapshot(
    locator: &StorageLocator,
    session_id: &str,
    candidate_limit: u32,
) -> StorageSnapshot {
    let tried: Vec<PathBuf> = locator
        .candidates()
        .into_iter()
        .map(|candidate| candidate.path)
        .collect();

    let Some(found) = locator.locate() else {
        warn!("No session store found; skipping storage cross-validation");
        return StorageSnapshot::Unavailable {
            path: None,
            reason: format!("{} not found", DB_NAME),
            tried,
        };
    };
    info!("Reading session store at {}", found.path.display());

    match read_rows(&found.path, session_id, candidate_limit).await {
        Ok((facts, candidates)) => StorageSnapshot::Available {
            path: found.path,
            facts,
            candidates,
        },
        Err(e) => {
            warn!("Session store unreadable: {}", e);
            StorageSnapshot::Unavailable {
                path: Some(found.path),
                reason: e.to_string(),
                tried,
            }
        }
    }
}

async fn read_rows(
    path: &Path,
    session_id: &str,
    candidate_limit: u32,
) -> Result<(Vec<MemoryFact>, Vec<MemoryCandidate>)> {
    let store = SessionStore::open_read_only(path).await?;
    let facts = store.memory_facts(session_id).await;
    let candidates = store.memory_candidates(session_id, candidate_limit).await;
    store.close().await;
    Ok((facts?, candidates?))
}
