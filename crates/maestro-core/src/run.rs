use crate::error::{MaestroError, MaestroResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lifecycle status of a run.
///
/// Transitions form the state machine
/// `created → routing → running ↔ paused → {completed, failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Created,
    Routing,
    Running,
    Paused,
    Completed,
    Failed,
}

impl RunStatus {
    /// Whether a transition to `next` is allowed by the state machine.
    pub fn can_transition(self, next: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (self, next),
            (Created, Routing)
                | (Routing, Running)
                | (Routing, Failed)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Failed)
        )
    }

    /// Validate a transition, producing `ErrInvalidTransition` on violation.
    pub fn transition(self, next: RunStatus) -> MaestroResult<RunStatus> {
        if self == next || self.can_transition(next) {
            Ok(next)
        } else {
            Err(MaestroError::InvalidTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }

    /// Whether the run has reached a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Created => "created",
            RunStatus::Routing => "routing",
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Routing and failure metadata attached to a run record.
///
/// Unknown keys are preserved across read-modify-write cycles so older
/// records survive newer runtimes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at_step: Option<u32>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RunMetadata {
    /// Shallow-merge `patch` into `self`: present fields overwrite, absent
    /// fields are kept.
    pub fn merge(&mut self, patch: RunMetadata) {
        if patch.confidence.is_some() {
            self.confidence = patch.confidence;
        }
        if patch.routing_method.is_some() {
            self.routing_method = patch.routing_method;
        }
        if patch.error.is_some() {
            self.error = patch.error;
        }
        if patch.failed_at_step.is_some() {
            self.failed_at_step = patch.failed_at_step;
        }
        for (k, v) in patch.extra {
            self.extra.insert(k, v);
        }
    }
}

/// Persistent record of a single end-to-end execution (`run.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub user_request: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_workflow: Option<String>,
    #[serde(default)]
    pub current_step: u32,
    #[serde(default)]
    pub task_queue: Vec<String>,
    #[serde(default)]
    pub metadata: RunMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunRecord {
    pub fn new(run_id: impl Into<String>, user_request: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            user_request: user_request.into(),
            status: RunStatus::Created,
            selected_workflow: None,
            current_step: 0,
            task_queue: Vec::new(),
            metadata: RunMetadata::default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A partial update applied to a run record by the Run Manager.
///
/// Scalar fields overwrite; `metadata` merges shallowly. Applying the same
/// patch twice yields the same record (idempotent).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_queue: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RunMetadata>,
}

impl RunPatch {
    pub fn status(status: RunStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Apply this patch to a record, enforcing the status state machine.
    pub fn apply(self, record: &mut RunRecord) -> MaestroResult<()> {
        if let Some(next) = self.status {
            record.status = record.status.transition(next)?;
        }
        if let Some(workflow) = self.selected_workflow {
            record.selected_workflow = Some(workflow);
        }
        if let Some(step) = self.current_step {
            record.current_step = step;
        }
        if let Some(queue) = self.task_queue {
            record.task_queue = queue;
        }
        if let Some(metadata) = self.metadata {
            record.metadata.merge(metadata);
        }
        record.updated_at = Utc::now();
        Ok(())
    }
}
