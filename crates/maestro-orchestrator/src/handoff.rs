//! Context monitoring and the handoff package (Phoenix Reset).
//!
//! The monitor estimates token usage per agent session. At 70% of the
//! configured budget a warning handoff is prepared; at 90% a reset is
//! recommended: the live run is serialized into `handoff.json` and a fresh
//! session resumes from that package. The runtime recommends the reset and
//! writes the package; it never restarts itself.

use chrono::{DateTime, Utc};
use maestro_core::{
    ArtifactRecord, GateRecord, MaestroResult, MasterPlan, ReasoningRecord, RunRecord,
};
use maestro_run::{GateWriter, RunManager};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

/// Warning threshold (fraction of `max_context_tokens`).
pub const WARNING_FRACTION: f64 = 0.70;
/// Phoenix Reset threshold, strict.
pub const RESET_FRACTION: f64 = 0.90;

/// Context pressure for one agent session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPressure {
    Normal,
    /// ≥ 70% used: prepare a warning handoff.
    Warning,
    /// ≥ 90% used: recommend Phoenix Reset.
    ResetRecommended,
}

/// Tracks token usage per agent session against a fixed budget.
#[derive(Debug, Clone)]
pub struct ContextMonitor {
    max_context_tokens: u64,
    used: HashMap<String, u64>,
}

impl ContextMonitor {
    pub fn new(max_context_tokens: u64) -> Self {
        Self {
            max_context_tokens,
            used: HashMap::new(),
        }
    }

    /// Add tokens to a session's tally and return its pressure.
    pub fn record(&mut self, session: &str, tokens: u64) -> ContextPressure {
        let entry = self.used.entry(session.to_string()).or_insert(0);
        *entry += tokens;
        let used = *entry;
        let pressure = self.pressure_of(session);
        if pressure != ContextPressure::Normal {
            warn!(
                session = %session,
                used = used,
                budget = self.max_context_tokens,
                pressure = ?pressure,
                "Context pressure"
            );
        }
        pressure
    }

    pub fn usage_fraction(&self, session: &str) -> f64 {
        if self.max_context_tokens == 0 {
            return 0.0;
        }
        *self.used.get(session).unwrap_or(&0) as f64 / self.max_context_tokens as f64
    }

    pub fn pressure_of(&self, session: &str) -> ContextPressure {
        let fraction = self.usage_fraction(session);
        if fraction >= RESET_FRACTION {
            ContextPressure::ResetRecommended
        } else if fraction >= WARNING_FRACTION {
            ContextPressure::Warning
        } else {
            ContextPressure::Normal
        }
    }

    /// Worst pressure across all sessions.
    pub fn worst_pressure(&self) -> ContextPressure {
        let mut worst = ContextPressure::Normal;
        for session in self.used.keys() {
            let p = self.pressure_of(session);
            if p == ContextPressure::ResetRecommended {
                return p;
            }
            if p == ContextPressure::Warning {
                worst = p;
            }
        }
        worst
    }

    /// Persist a usage sample under the run's `context-snapshots/`.
    pub async fn write_sample(&self, manager: &RunManager, run_id: &str) -> MaestroResult<()> {
        let paths = manager.run_paths(run_id);
        let ts = Utc::now().timestamp_millis();
        let path = paths
            .context_snapshots_dir()
            .join(format!("snapshot-{ts}.json"));
        let sample = serde_json::json!({
            "timestamp": Utc::now(),
            "max_context_tokens": self.max_context_tokens,
            "sessions": self.used,
        });
        tokio::fs::create_dir_all(paths.context_snapshots_dir()).await?;
        tokio::fs::write(&path, serde_json::to_vec_pretty(&sample)?).await?;
        Ok(())
    }
}

/// Everything a fresh session needs to resume a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoffContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<MasterPlan>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(default)]
    pub gates: Vec<GateRecord>,
    #[serde(default)]
    pub reasoning: Vec<ReasoningRecord>,
    #[serde(default)]
    pub open_questions: Vec<String>,
    #[serde(default)]
    pub next_actions: Vec<String>,
}

impl HandoffContext {
    fn is_empty(&self) -> bool {
        self.plan.is_none()
            && self.artifacts.is_empty()
            && self.gates.is_empty()
            && self.reasoning.is_empty()
            && self.open_questions.is_empty()
            && self.next_actions.is_empty()
    }
}

/// Counts recorded at serialization time, checked on resume.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffCounts {
    pub artifacts: usize,
    pub gates: usize,
    pub reasoning: usize,
}

/// The serialized live run (`handoff.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffPackage {
    pub workflow_id: String,
    pub current_step: u32,
    pub run: RunRecord,
    pub context: HandoffContext,
    pub counts: HandoffCounts,
    pub created_at: DateTime<Utc>,
}

/// Validation outcome: errors block resumption, warnings do not.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandoffValidation {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl HandoffValidation {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Serialize the live run into a handoff package and write `handoff.json`.
pub async fn build_handoff(
    manager: &RunManager,
    run_id: &str,
    plan: Option<MasterPlan>,
    open_questions: Vec<String>,
    next_actions: Vec<String>,
) -> MaestroResult<HandoffPackage> {
    let run = manager.read_run(run_id).await?;
    let registry = manager.read_artifact_registry(run_id).await?;
    let paths = manager.run_paths(run_id);
    let writer = GateWriter::new(&paths);
    let gates = writer.read_gates().await?;
    let reasoning = writer.read_reasoning().await?;

    let artifacts: Vec<ArtifactRecord> = registry.artifacts.values().cloned().collect();
    let package = HandoffPackage {
        workflow_id: run.selected_workflow.clone().unwrap_or_default(),
        current_step: run.current_step,
        counts: HandoffCounts {
            artifacts: artifacts.len(),
            gates: gates.len(),
            reasoning: reasoning.len(),
        },
        context: HandoffContext {
            plan,
            artifacts,
            gates,
            reasoning,
            open_questions,
            next_actions,
        },
        run,
        created_at: Utc::now(),
    };

    let json = serde_json::to_vec_pretty(&package)?;
    tokio::fs::write(paths.handoff_file(), json).await?;
    info!(
        run_id = %run_id,
        artifacts = package.counts.artifacts,
        gates = package.counts.gates,
        "Handoff package written"
    );
    Ok(package)
}

/// Validate a handoff package for resumption. Missing identity fields are
/// errors; a missing plan or empty artifact list is only a warning.
pub fn validate_handoff(package: &HandoffPackage) -> HandoffValidation {
    let mut validation = HandoffValidation::default();

    if package.workflow_id.is_empty() {
        validation.errors.push("workflow_id is missing".to_string());
    }
    if package.run.run_id.is_empty() {
        validation.errors.push("run identity is missing".to_string());
    }
    if package.context.is_empty() {
        validation.errors.push("context is empty".to_string());
    }

    if package.context.plan.is_none() {
        validation.warnings.push("no plan in context".to_string());
    }
    if package.context.artifacts.is_empty() {
        validation.warnings.push("no artifacts in context".to_string());
    }
    if package.context.artifacts.len() != package.counts.artifacts {
        validation.warnings.push(format!(
            "artifact count mismatch: recorded {} found {}",
            package.counts.artifacts,
            package.context.artifacts.len()
        ));
    }

    validation
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use maestro_core::{RunPatch, RunStatus, ValidationStatus};
    use maestro_run::CreateRunOptions;

    #[test]
    fn test_pressure_thresholds_strict() {
        let mut monitor = ContextMonitor::new(1000);
        assert_eq!(monitor.record("planner", 699), ContextPressure::Normal);
        assert_eq!(monitor.record("planner", 1), ContextPressure::Warning);
        assert_eq!(monitor.record("planner", 199), ContextPressure::Warning);
        // Exactly 90.0% triggers the reset recommendation.
        assert_eq!(monitor.record("planner", 1), ContextPressure::ResetRecommended);
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut monitor = ContextMonitor::new(1000);
        monitor.record("planner", 950);
        monitor.record("qa", 100);
        assert_eq!(monitor.pressure_of("planner"), ContextPressure::ResetRecommended);
        assert_eq!(monitor.pressure_of("qa"), ContextPressure::Normal);
        assert_eq!(monitor.worst_pressure(), ContextPressure::ResetRecommended);
    }

    #[test]
    fn test_zero_budget_never_pressures() {
        let mut monitor = ContextMonitor::new(0);
        assert_eq!(monitor.record("x", 10_000), ContextPressure::Normal);
    }

    async fn seeded_run(manager: &RunManager) -> String {
        let run_id = manager
            .create_run("build it", CreateRunOptions::default())
            .await
            .unwrap();
        manager
            .update_run(&run_id, RunPatch::status(RunStatus::Routing))
            .await
            .unwrap();
        manager
            .update_run(
                &run_id,
                RunPatch {
                    status: Some(RunStatus::Running),
                    selected_workflow: Some("greenfield-frontend".into()),
                    current_step: Some(2),
                    ..RunPatch::default()
                },
            )
            .await
            .unwrap();
        manager
            .register_artifact(
                &run_id,
                ArtifactRecord::new("plan.json", "plans/plan-wf.json", 1, "planner")
                    .with_status(ValidationStatus::Pass),
            )
            .await
            .unwrap();
        let paths = manager.run_paths(&run_id);
        GateWriter::new(&paths)
            .write_gate(&GateRecord::pass(1, "planner"), false)
            .await
            .unwrap();
        run_id
    }

    #[tokio::test]
    async fn test_build_handoff_enumerates_run_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RunManager::new(dir.path());
        let run_id = seeded_run(&manager).await;

        let package = build_handoff(
            &manager,
            &run_id,
            Some(MasterPlan::new("plan-1", "greenfield-frontend")),
            vec!["should qa own e2e tests?".into()],
            vec!["resume at step 2".into()],
        )
        .await
        .unwrap();

        assert_eq!(package.workflow_id, "greenfield-frontend");
        assert_eq!(package.current_step, 2);
        assert_eq!(package.counts.artifacts, 1);
        assert_eq!(package.counts.gates, 1);
        assert!(manager.run_paths(&run_id).handoff_file().exists());

        // Round-trips from disk.
        let raw = tokio::fs::read_to_string(manager.run_paths(&run_id).handoff_file())
            .await
            .unwrap();
        let loaded: HandoffPackage = serde_json::from_str(&raw).unwrap();
        assert!(validate_handoff(&loaded).is_valid());
    }

    #[tokio::test]
    async fn test_validate_flags_missing_identity() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RunManager::new(dir.path());
        let run_id = seeded_run(&manager).await;
        let mut package = build_handoff(&manager, &run_id, None, vec![], vec![])
            .await
            .unwrap();

        package.workflow_id.clear();
        let validation = validate_handoff(&package);
        assert!(!validation.is_valid());
        assert!(validation.errors.iter().any(|e| e.contains("workflow_id")));
    }

    #[tokio::test]
    async fn test_validate_warns_on_missing_plan_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RunManager::new(dir.path());
        let run_id = manager
            .create_run("bare", CreateRunOptions::default())
            .await
            .unwrap();
        manager
            .update_run(&run_id, RunPatch::status(RunStatus::Routing))
            .await
            .unwrap();
        manager
            .update_run(
                &run_id,
                RunPatch {
                    status: Some(RunStatus::Running),
                    selected_workflow: Some("wf".into()),
                    ..RunPatch::default()
                },
            )
            .await
            .unwrap();

        let package = build_handoff(
            &manager,
            &run_id,
            None,
            vec![],
            vec!["start from scratch".into()],
        )
        .await
        .unwrap();
        let validation = validate_handoff(&package);
        assert!(validation.is_valid());
        assert!(validation.warnings.iter().any(|w| w.contains("no plan")));
        assert!(validation.warnings.iter().any(|w| w.contains("no artifacts")));
    }

    #[tokio::test]
    async fn test_write_sample_creates_snapshot_file() {
        let dir = tempfile::tempdir().unwrap();
        let manager = RunManager::new(dir.path());
        let run_id = manager
            .create_run("x", CreateRunOptions::default())
            .await
            .unwrap();

        let mut monitor = ContextMonitor::new(100_000);
        monitor.record("developer", 42_000);
        monitor.write_sample(&manager, &run_id).await.unwrap();

        let mut entries =
            tokio::fs::read_dir(manager.run_paths(&run_id).context_snapshots_dir())
                .await
                .unwrap();
        let entry = entries.next_entry().await.unwrap().unwrap();
        assert!(entry
            .file_name()
            .to_string_lossy()
            .starts_with("snapshot-"));
    }
}
