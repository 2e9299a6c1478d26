//! Run recovery: rebuild resumption state from gates and the registry.

use crate::gates::GateWriter;
use crate::manager::RunManager;
use maestro_core::{ArtifactRecord, MaestroResult, ReasoningRecord, RunRecord, ValidationStatus};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Per-step input requirements, derived from the workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRequirements {
    pub step: u32,
    pub agent: String,
    #[serde(default)]
    pub required_inputs: Vec<String>,
    #[serde(default)]
    pub optional_inputs: Vec<String>,
}

/// Outcome of a recovery scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    /// The next step has every non-optional input; execution can resume.
    Ready,
    /// Non-optional inputs are missing; they must be re-produced first.
    Blocked,
    /// Every workflow step already has a passing gate.
    WorkflowComplete,
}

/// Resumption package produced by [`recover`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryReport {
    pub status: RecoveryStatus,
    pub run: RunRecord,
    /// Highest step with a passing gate; `None` when nothing completed.
    pub last_completed_step: Option<u32>,
    pub next_step: Option<u32>,
    pub next_agent: Option<String>,
    pub required_inputs: Vec<String>,
    pub missing_inputs: Vec<String>,
    /// Passing artifacts at or below the last completed step.
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning: Vec<ReasoningRecord>,
}

/// Recover a run: find the highest passing gate, filter the artifact
/// registry to validated entries at or below it, and compute what the next
/// step still needs.
pub async fn recover(
    manager: &RunManager,
    run_id: &str,
    steps: &[StepRequirements],
    include_reasoning: bool,
) -> MaestroResult<RecoveryReport> {
    let run = manager.read_run(run_id).await?;
    let paths = manager.run_paths(run_id);
    let writer = GateWriter::new(&paths);

    // Highest step whose gate passed; scan descending.
    let mut gates = writer.read_gates().await?;
    gates.sort_by_key(|g| std::cmp::Reverse(g.step));
    let last_completed_step = gates.iter().find(|g| g.passed()).map(|g| g.step);

    let registry = manager.read_artifact_registry(run_id).await?;
    let artifacts: Vec<ArtifactRecord> = match last_completed_step {
        Some(last) => registry
            .artifacts
            .values()
            .filter(|a| a.step <= last && a.validation_status == ValidationStatus::Pass)
            .cloned()
            .collect(),
        None => Vec::new(),
    };

    let reasoning = if include_reasoning {
        writer.read_reasoning().await?
    } else {
        Vec::new()
    };

    let next_step_index = last_completed_step.map_or(0, |l| l + 1);
    let next = steps.iter().find(|s| s.step == next_step_index);

    let report = match next {
        None => RecoveryReport {
            status: RecoveryStatus::WorkflowComplete,
            run,
            last_completed_step,
            next_step: None,
            next_agent: None,
            required_inputs: Vec::new(),
            missing_inputs: Vec::new(),
            artifacts,
            reasoning,
        },
        Some(step) => {
            let available: std::collections::HashSet<&str> =
                artifacts.iter().map(|a| a.name.as_str()).collect();
            let missing: Vec<String> = step
                .required_inputs
                .iter()
                .filter(|name| !available.contains(name.as_str()))
                .cloned()
                .collect();
            let status = if missing.is_empty() {
                RecoveryStatus::Ready
            } else {
                RecoveryStatus::Blocked
            };
            RecoveryReport {
                status,
                run,
                last_completed_step,
                next_step: Some(step.step),
                next_agent: Some(step.agent.clone()),
                required_inputs: step.required_inputs.clone(),
                missing_inputs: missing,
                artifacts,
                reasoning,
            }
        }
    };

    info!(
        run_id = %run_id,
        status = ?report.status,
        last_completed_step = ?report.last_completed_step,
        "Recovery scan complete"
    );
    Ok(report)
}
