//! Follow-up evaluation on an existing session.
//!
//! Resuming with `load_model_and_extensions` gives the agent the same tools it
//! had when the memory was built, so the reply shows whether that memory is
//! actually reused.

use super::{connect, finalize, storage_sections, OutputArgs, ServerArgs, SnapshotArgs, StorageArgs};
use crate::client::ApiClient;
use crate::driver::{self, ResumedSession, TurnSummary};
use crate::error::Result;
use crate::memory::cross_check::FactDelta;
use crate::memory::storage::fetch_storage_snapshot;
use crate::memory::{fetch_api_snapshot, MemoryCandidate, MemoryFact, ToolGate};
use crate::quality::detectors::DetectorSet;
use crate::quality::{evaluate, QualityInput, QualityReport};
use crate::report::{ConsoleSummary, DbSnapshotReport, Report};
use crate::supervisor::{ServerLaunch, ServerProcess};
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 31350;
pub const REPORT_PREFIX: &str = "cfpm_resume_eval";

pub const DEFAULT_PROMPT: &str =
    "Use the command line to list the files on my desktop, reusing a path you have already verified.";

#[derive(Args, Debug, Clone)]
pub struct ResumeArgs {
    /// Session to resume
    #[arg(long, env = "CFPM_EVAL_SESSION_ID")]
    pub session_id: String,

    #[arg(long, env = "CFPM_EVAL_PROMPT", default_value = DEFAULT_PROMPT)]
    pub prompt: String,

    /// Wall-clock limit for the reply stream
    #[arg(long, env = "CFPM_EVAL_REPLY_TIMEOUT_SECS", default_value_t = 300)]
    pub reply_timeout_secs: u64,

    #[command(flatten)]
    pub server: ServerArgs,

    #[command(flatten)]
    pub snapshot: SnapshotArgs,

    #[command(flatten)]
    pub storage: StorageArgs,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMemoryReport {
    pub fact_count: usize,
    pub candidate_count: usize,
    pub gate_count: usize,
    pub facts: Vec<MemoryFact>,
    pub candidates: Vec<MemoryCandidate>,
    pub gates: Vec<ToolGate>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed: Option<ResumedSession>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<TurnSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<ApiMemoryReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db: Option<DbSnapshotReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_db_fact_delta: Option<FactDelta>,
}

pub async fn handle(args: ResumeArgs) -> ExitCode {
    let launch = args.server.launch(DEFAULT_PORT);
    let mut report: Report<ResumeDetails> = Report::new(launch.base_url());
    report.session_id = Some(args.session_id.clone());
    let mut process = None;

    let outcome = execute(&args, &launch, &mut report, &mut process).await;
    report.finish(outcome);
    if let Some(process) = process {
        process.shutdown().await;
    }

    let details = &report.details;
    let summary = ConsoleSummary {
        success: report.success,
        output: String::new(),
        session_id: report.session_id.clone(),
        issues: details
            .quality
            .as_ref()
            .map(|quality| quality.issues.clone())
            .unwrap_or_default(),
        error: report.error.clone(),
        tool_request_count: details.reply.as_ref().map(|reply| reply.tool_request_count),
        gate_count: details.api.as_ref().map(|api| api.gate_count),
    };
    finalize(&report, args.output.path(REPORT_PREFIX), summary)
}

async fn execute(
    args: &ResumeArgs,
    launch: &ServerLaunch,
    report: &mut Report<ResumeDetails>,
    process: &mut Option<ServerProcess>,
) -> Result<()> {
    let client = ApiClient::new(launch.base_url(), &launch.secret)?;
    connect(&args.server, launch, &client, report, process).await?;

    let session_id = args.session_id.as_str();
    report.details.resumed = Some(driver::resume_session(&client, session_id).await?);
    report.step("session_resumed");

    let reply = driver::send_turn(
        &client,
        session_id,
        &args.prompt,
        Duration::from_secs(args.reply_timeout_secs),
    )
    .await?;
    report.details.reply = Some(reply.summary());
    report.step("reply_completed");

    let snapshot = fetch_api_snapshot(&client, session_id, args.snapshot.limits()).await?;
    report.step("memory_fetched");

    // The reply's own tool requests are exactly this turn's commands.
    let quality = evaluate(
        QualityInput {
            facts: &snapshot.facts,
            candidates: &snapshot.candidates,
            tool_gates: &snapshot.tool_gates,
            recent_commands: &reply.tool_commands,
        },
        &DetectorSet::default(),
    );
    report.details.quality = Some(quality);
    report.step("quality_evaluated");

    let stored = fetch_storage_snapshot(
        &args.storage.locator(),
        session_id,
        args.snapshot.candidate_limit,
    )
    .await;
    let sections = storage_sections(&stored, &snapshot.facts, true);
    report.step(if sections.fact_delta.is_some() {
        "storage_checked"
    } else {
        "storage_skipped"
    });
    report.details.db_path = sections.db_path;
    report.details.db = Some(sections.db_snapshot);
    report.details.api_db_fact_delta = sections.fact_delta;

    report.details.api = Some(ApiMemoryReport {
        fact_count: snapshot.facts.len(),
        candidate_count: snapshot.candidates.len(),
        gate_count: snapshot.tool_gates.len(),
        facts: snapshot.facts,
        candidates: snapshot.candidates,
        gates: snapshot.tool_gates,
    });

    Ok(())
}
