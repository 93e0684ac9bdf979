pub mod resume;
pub mod run;

use crate::client::ApiClient;
use crate::error::Result;
use crate::memory::cross_check::{compare_facts, FactDelta};
use crate::memory::storage::{StorageLocator, StorageSnapshot};
use crate::memory::{MemoryFact, SnapshotLimits, DEFAULT_CANDIDATE_LIMIT, DEFAULT_TOOL_GATE_LIMIT};
use crate::report::{ConsoleSummary, DbSnapshotReport, Report};
use crate::supervisor::{ServerLaunch, ServerProcess};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[cfg(windows)]
pub const DEFAULT_SERVER_EXE: &str = "target\\release\\agimed.exe";
#[cfg(not(windows))]
pub const DEFAULT_SERVER_EXE: &str = "target/release/agimed";

pub const DEFAULT_SECRET: &str = "cfpm-eval-secret";
pub const DEFAULT_OUTPUT_DIR: &str = "data";

const SPAWNED_READY_TIMEOUT: Duration = Duration::from_secs(45);
const REUSED_READY_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Path to the agimed executable
    #[arg(long, env = "AGIME_SERVER_EXE", default_value = DEFAULT_SERVER_EXE)]
    pub server_exe: PathBuf,

    #[arg(long, env = "CFPM_EVAL_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind (or reach) the server on [default: 31337 for run, 31350 for resume]
    #[arg(long, env = "CFPM_EVAL_PORT")]
    pub port: Option<u16>,

    /// Shared secret sent as X-Secret-Key
    #[arg(long, env = "CFPM_EVAL_SECRET", default_value = DEFAULT_SECRET, hide_env_values = true)]
    pub secret: String,

    /// Talk to an already running server instead of launching one
    #[arg(long, env = "CFPM_EVAL_NO_START_SERVER")]
    pub no_start_server: bool,

    /// Seconds to wait for /status [default: 45 when launching, 15 when reusing]
    #[arg(long, env = "CFPM_EVAL_READY_TIMEOUT_SECS")]
    pub ready_timeout_secs: Option<u64>,
}

impl ServerArgs {
    pub fn launch(&self, default_port: u16) -> ServerLaunch {
        ServerLaunch {
            exe: self.server_exe.clone(),
            host: self.host.clone(),
            port: self.port.unwrap_or(default_port),
            secret: self.secret.clone(),
        }
    }

    fn ready_timeout(&self) -> Duration {
        match self.ready_timeout_secs {
            Some(secs) => Duration::from_secs(secs),
            None if self.no_start_server => REUSED_READY_TIMEOUT,
            None => SPAWNED_READY_TIMEOUT,
        }
    }
}

#[derive(Args, Debug, Clone, Default)]
pub struct StorageArgs {
    /// Service path root; the store is read from <root>/data/sessions/sessions.db
    #[arg(long, env = "CFPM_EVAL_PATH_ROOT")]
    pub path_root: Option<PathBuf>,

    /// Explicit sessions.db file, checked before any root
    #[arg(long, env = "CFPM_EVAL_SESSIONS_DB")]
    pub sessions_db: Option<PathBuf>,
}

impl StorageArgs {
    pub fn locator(&self) -> StorageLocator {
        StorageLocator::from_environment(self.sessions_db.clone(), self.path_root.clone())
    }
}

#[derive(Args, Debug, Clone)]
pub struct SnapshotArgs {
    #[arg(long, env = "CFPM_EVAL_CANDIDATE_LIMIT", default_value_t = DEFAULT_CANDIDATE_LIMIT)]
    pub candidate_limit: u32,

    #[arg(long, env = "CFPM_EVAL_TOOL_GATE_LIMIT", default_value_t = DEFAULT_TOOL_GATE_LIMIT)]
    pub tool_gate_limit: u32,
}

impl SnapshotArgs {
    pub fn limits(&self) -> SnapshotLimits {
        SnapshotLimits {
            candidates: self.candidate_limit,
            tool_gates: self.tool_gate_limit,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct OutputArgs {
    /// Report file; defaults to a timestamped file under --output-dir
    #[arg(long, env = "CFPM_EVAL_OUTPUT")]
    pub output: Option<PathBuf>,

    #[arg(long, env = "CFPM_EVAL_OUTPUT_DIR", default_value = DEFAULT_OUTPUT_DIR)]
    pub output_dir: PathBuf,
}

impl OutputArgs {
    pub fn path(&self, prefix: &str) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| crate::report::timestamped_path(&self.output_dir, prefix))
    }
}

/// Launch (or reuse) the server and wait for readiness. A launched process is
/// stored in `process` before waiting so the caller can always clean it up.
pub(crate) async fn connect<T: Serialize + Default>(
    args: &ServerArgs,
    launch: &ServerLaunch,
    client: &ApiClient,
    report: &mut Report<T>,
    process: &mut Option<ServerProcess>,
) -> Result<()> {
    if args.no_start_server {
        client.wait_until_ready(args.ready_timeout()).await?;
        report.step("server_reused");
    } else {
        *process = Some(ServerProcess::spawn(launch)?);
        client.wait_until_ready(args.ready_timeout()).await?;
        report.step("server_started");
    }
    Ok(())
}

/// Storage-derived report sections.
pub(crate) struct StorageSections {
    pub db_path: Option<PathBuf>,
    pub db_snapshot: DbSnapshotReport,
    pub fact_delta: Option<FactDelta>,
}

pub(crate) fn storage_sections(
    snapshot: &StorageSnapshot,
    api_facts: &[MemoryFact],
    include_rows: bool,
) -> StorageSections {
    let fact_delta = match snapshot {
        StorageSnapshot::Available { facts, .. } => Some(compare_facts(api_facts, facts)),
        StorageSnapshot::Unavailable { .. } => None,
    };
    StorageSections {
        db_path: snapshot.path().map(PathBuf::from),
        db_snapshot: DbSnapshotReport::from_snapshot(snapshot, include_rows),
        fact_delta,
    }
}

/// Write the report, print the summary, and map success to the exit status.
pub(crate) fn finalize<T: Serialize + Default>(
    report: &Report<T>,
    output: PathBuf,
    mut summary: ConsoleSummary,
) -> ExitCode {
    summary.output = output.display().to_string();
    if let Err(e) = report.write(&output) {
        tracing::error!("Failed to write report to {}: {}", output.display(), e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = summary.print() {
        tracing::error!("Failed to print summary: {}", e);
    }
    if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
