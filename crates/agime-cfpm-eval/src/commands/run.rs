//! Two-turn evaluation of a fresh session.
//!
//! Turn 1 asks the agent to find the real desktop and list it, which should
//! leave path facts in memory. Turn 2 asks again; a healthy memory subsystem
//! lets the agent reuse the confirmed path instead of probing for it.

use super::{connect, finalize, storage_sections, OutputArgs, ServerArgs, SnapshotArgs, StorageArgs};
use crate::client::ApiClient;
use crate::driver::{self, TurnSummary};
use crate::error::Result;
use crate::memory::cross_check::FactDelta;
use crate::memory::fetch_api_snapshot;
use crate::memory::storage::fetch_storage_snapshot;
use crate::quality::detectors::DetectorSet;
use crate::quality::{evaluate, recent_commands, QualityInput, QualityReport, DEFAULT_COMMAND_TAIL};
use crate::report::{ConsoleSummary, DbSnapshotReport, Report};
use crate::supervisor::{ServerLaunch, ServerProcess};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 31337;
pub const REPORT_PREFIX: &str = "cfpm_eval_report";

pub const DEFAULT_PROMPT_1: &str =
    "Use the command line to list the files on my desktop. Confirm the real desktop path first, then list the files.";
pub const DEFAULT_PROMPT_2: &str =
    "Look at my desktop files again, preferring the path you already confirmed.";

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub server: ServerArgs,

    /// Working directory for the new session [default: current directory]
    #[arg(long, env = "CFPM_EVAL_WORKING_DIR")]
    pub working_dir: Option<PathBuf>,

    #[arg(long, env = "CFPM_EVAL_PROVIDER")]
    pub provider: Option<String>,

    #[arg(long, env = "CFPM_EVAL_MODEL")]
    pub model: Option<String>,

    #[arg(long = "prompt-1", env = "CFPM_EVAL_PROMPT_1", default_value = DEFAULT_PROMPT_1)]
    pub prompt_1: String,

    #[arg(long = "prompt-2", env = "CFPM_EVAL_PROMPT_2", default_value = DEFAULT_PROMPT_2)]
    pub prompt_2: String,

    /// Wall-clock limit for each reply stream
    #[arg(long, env = "CFPM_EVAL_REPLY_TIMEOUT_SECS", default_value_t = 240)]
    pub reply_timeout_secs: u64,

    /// How many trailing session commands count as the second turn's
    #[arg(long, env = "CFPM_EVAL_COMMAND_TAIL", default_value_t = DEFAULT_COMMAND_TAIL)]
    pub command_tail: usize,

    #[command(flatten)]
    pub snapshot: SnapshotArgs,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiSnapshotCounts {
    pub facts_count: usize,
    pub candidates_count: usize,
    pub tool_gate_count: usize,
    pub tool_commands_captured: usize,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn1: Option<TurnSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn2: Option<TurnSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_snapshot: Option<ApiSnapshotCounts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_snapshot: Option<DbSnapshotReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_db_fact_delta: Option<FactDelta>,
}

pub async fn handle(args: RunArgs) -> ExitCode {
    let launch = args.server.launch(DEFAULT_PORT);
    let mut report: Report<RunDetails> = Report::new(launch.base_url());
    let mut process = None;

    let outcome = execute(&args, &launch, &mut report, &mut process).await;
    report.finish(outcome);
    if let Some(process) = process {
        process.shutdown().await;
    }

    let summary = ConsoleSummary {
        success: report.success,
        output: String::new(),
        session_id: report.session_id.clone(),
        issues: report
            .details
            .quality
            .as_ref()
            .map(|quality| quality.issues.clone())
            .unwrap_or_default(),
        error: report.error.clone(),
        tool_request_count: None,
        gate_count: None,
    };
    finalize(&report, args.output.path(REPORT_PREFIX), summary)
}

async fn execute(
    args: &RunArgs,
    launch: &ServerLaunch,
    report: &mut Report<RunDetails>,
    process: &mut Option<ServerProcess>,
) -> Result<()> {
    let client = ApiClient::new(launch.base_url(), &launch.secret)?;
    connect(&args.server, launch, &client, report, process).await?;

    let selection = driver::resolve_provider(&client, args.provider.clone(), args.model.clone()).await?;
    report.details.provider = Some(selection.provider.clone());
    report.details.model = Some(selection.model.clone());

    let working_dir = match &args.working_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let session = driver::start_session(&client, &working_dir.to_string_lossy()).await?;
    let session_id = session.id;
    report.session_id = Some(session_id.clone());
    report.step("session_started");

    driver::update_provider(&client, &session_id, &selection).await?;
    report.step("provider_updated");

    let reply_timeout = Duration::from_secs(args.reply_timeout_secs);
    let turn1 = driver::send_turn(&client, &session_id, &args.prompt_1, reply_timeout).await?;
    report.details.turn1 = Some(turn1.summary());
    report.step("turn1_completed");

    let turn2 = driver::send_turn(&client, &session_id, &args.prompt_2, reply_timeout).await?;
    report.details.turn2 = Some(turn2.summary());
    report.step("turn2_completed");

    let commands = driver::fetch_session_commands(&client, &session_id).await?;
    let snapshot = fetch_api_snapshot(&client, &session_id, args.snapshot.limits()).await?;
    report.details.api_snapshot = Some(ApiSnapshotCounts {
        facts_count: snapshot.facts.len(),
        candidates_count: snapshot.candidates.len(),
        tool_gate_count: snapshot.tool_gates.len(),
        tool_commands_captured: commands.len(),
    });
    report.step("memory_fetched");

    let quality = evaluate(
        QualityInput {
            facts: &snapshot.facts,
            candidates: &snapshot.candidates,
            tool_gates: &snapshot.tool_gates,
            recent_commands: recent_commands(&commands, args.command_tail),
        },
        &DetectorSet::default(),
    );
    report.details.quality = Some(quality);
    report.step("quality_evaluated");

    let stored = fetch_storage_snapshot(
        &args.storage.locator(),
        &session_id,
        args.snapshot.candidate_limit,
    )
    .await;
    let sections = storage_sections(&stored, &snapshot.facts, false);
    report.step(if sections.fact_delta.is_some() {
        "storage_checked"
    } else {
        "storage_skipped"
    });
    report.details.db_path = sections.db_path;
    report.details.db_snapshot = Some(sections.db_snapshot);
    report.details.api_db_fact_delta = sections.fact_delta;

    Ok(())
}
