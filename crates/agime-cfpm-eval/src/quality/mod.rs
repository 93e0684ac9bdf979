//! Heuristic memory-quality checks.
//!
//! [`evaluate`] is a pure function over a memory snapshot and the commands the
//! agent issued most recently. Every check runs; the resulting `issues` list
//! holds one stable code per triggered check, always in this order:
//!
//! | code | triggers when |
//! |------|---------------|
//! | `date_noise_fact_active` | an active, non-invalid-path fact is a bare date |
//! | `date_noise_candidate_accepted` | an accepted candidate is a bare date |
//! | `wrong_desktop_without_invalid_marker` | an active artifact holds a plain desktop path with no active `invalid_path` twin |
//! | `second_turn_repeated_probe_despite_memory` | recent commands probe for folders while an active OneDrive desktop artifact exists |
//! | `tool_gate_reused_wrong_path` | a tool gate is keyed on a plain desktop path |

pub mod detectors;

use crate::memory::{MemoryCandidate, MemoryFact, ToolGate};
use detectors::{DetectorSet, DATE_ONLY, PLAIN_DESKTOP_PATH, PROBE_COMMAND};
use serde::Serialize;

pub const DATE_NOISE_FACT_ACTIVE: &str = "date_noise_fact_active";
pub const DATE_NOISE_CANDIDATE_ACCEPTED: &str = "date_noise_candidate_accepted";
pub const WRONG_DESKTOP_WITHOUT_INVALID_MARKER: &str = "wrong_desktop_without_invalid_marker";
pub const SECOND_TURN_REPEATED_PROBE: &str = "second_turn_repeated_probe_despite_memory";
pub const TOOL_GATE_REUSED_WRONG_PATH: &str = "tool_gate_reused_wrong_path";

/// Number of trailing session commands treated as "the most recent turn".
///
/// The session endpoint does not mark turn boundaries, so the window is a
/// fixed-size tail of every command issued in the session. A long first turn
/// can leak into it and a very long second turn can be truncated.
pub const DEFAULT_COMMAND_TAIL: usize = 30;

#[derive(Debug, Clone, Copy)]
pub struct QualityInput<'a> {
    pub facts: &'a [MemoryFact],
    pub candidates: &'a [MemoryCandidate],
    pub tool_gates: &'a [ToolGate],
    pub recent_commands: &'a [String],
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeStats {
    pub probe_count: usize,
    pub probe_commands: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QualityReport {
    pub active_fact_count: usize,
    pub active_artifact_count: usize,
    pub active_invalid_path_count: usize,
    pub date_noise_facts: Vec<MemoryFact>,
    pub accepted_date_candidates: Vec<MemoryCandidate>,
    pub wrong_desktop_artifacts: Vec<MemoryFact>,
    pub one_drive_desktop_artifacts: Vec<MemoryFact>,
    pub probe_stats_second_turn: ProbeStats,
    pub wrong_tool_gate_paths: Vec<ToolGate>,
    pub issues: Vec<String>,
}

impl QualityReport {
    pub fn has_issue(&self, code: &str) -> bool {
        self.issues.iter().any(|issue| issue == code)
    }
}

/// The last `tail` commands, oldest first.
pub fn recent_commands(commands: &[String], tail: usize) -> &[String] {
    &commands[commands.len().saturating_sub(tail)..]
}

fn same_path(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn is_one_drive_desktop(content: &str) -> bool {
    let lowered = content.trim().to_lowercase();
    lowered.contains("onedrive") && lowered.ends_with("desktop")
}

pub fn probe_stats(commands: &[String], detectors: &DetectorSet) -> ProbeStats {
    let probe_commands: Vec<String> = commands
        .iter()
        .filter(|command| detectors.matches(PROBE_COMMAND, command))
        .cloned()
        .collect();
    ProbeStats {
        probe_count: probe_commands.len(),
        probe_commands,
    }
}

pub fn evaluate(input: QualityInput<'_>, detectors: &DetectorSet) -> QualityReport {
    let active: Vec<&MemoryFact> = input.facts.iter().filter(|fact| fact.is_active()).collect();
    let artifacts: Vec<&MemoryFact> = active.iter().copied().filter(|fact| fact.is_artifact()).collect();
    let invalid_markers: Vec<&MemoryFact> = active
        .iter()
        .copied()
        .filter(|fact| fact.is_invalid_path_marker())
        .collect();

    let date_noise_facts: Vec<MemoryFact> = active
        .iter()
        .filter(|fact| !fact.is_invalid_path_marker() && detectors.matches(DATE_ONLY, &fact.content))
        .map(|fact| (*fact).clone())
        .collect();

    let accepted_date_candidates: Vec<MemoryCandidate> = input
        .candidates
        .iter()
        .filter(|candidate| candidate.is_accepted() && detectors.matches(DATE_ONLY, &candidate.content))
        .cloned()
        .collect();

    let wrong_desktop: Vec<&MemoryFact> = artifacts
        .iter()
        .copied()
        .filter(|fact| detectors.matches(PLAIN_DESKTOP_PATH, &fact.content))
        .collect();
    let unmarked_wrong_desktop = wrong_desktop.iter().any(|fact| {
        !invalid_markers
            .iter()
            .any(|marker| same_path(&marker.content, &fact.content))
    });

    let one_drive_desktop: Vec<MemoryFact> = artifacts
        .iter()
        .filter(|fact| is_one_drive_desktop(&fact.content))
        .map(|fact| (*fact).clone())
        .collect();

    let probes = probe_stats(input.recent_commands, detectors);

    let wrong_tool_gate_paths: Vec<ToolGate> = input
        .tool_gates
        .iter()
        .filter(|gate| detectors.matches(PLAIN_DESKTOP_PATH, &gate.path))
        .cloned()
        .collect();

    let checks = [
        (DATE_NOISE_FACT_ACTIVE, !date_noise_facts.is_empty()),
        (DATE_NOISE_CANDIDATE_ACCEPTED, !accepted_date_candidates.is_empty()),
        (WRONG_DESKTOP_WITHOUT_INVALID_MARKER, unmarked_wrong_desktop),
        (
            SECOND_TURN_REPEATED_PROBE,
            probes.probe_count > 0 && !one_drive_desktop.is_empty(),
        ),
        (TOOL_GATE_REUSED_WRONG_PATH, !wrong_tool_gate_paths.is_empty()),
    ];
    let issues = checks
        .iter()
        .filter(|(_, triggered)| *triggered)
        .map(|(code, _)| code.to_string())
        .collect();

    QualityReport {
        active_fact_count: active.len(),
        active_artifact_count: artifacts.len(),
        active_invalid_path_count: invalid_markers.len(),
        date_noise_facts,
        accepted_date_candidates,
        wrong_desktop_artifacts: wrong_desktop.into_iter().cloned().collect(),
        one_drive_desktop_artifacts: one_drive_desktop,
        probe_stats_second_turn: probes,
        wrong_tool_gate_paths,
        issues,
    }
}
