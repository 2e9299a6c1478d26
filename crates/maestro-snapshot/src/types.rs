use chrono::{DateTime, Utc};
use maestro_core::ArtifactRecord;
use serde::{Deserialize, Serialize};

/// Why a snapshot was taken; milestones are pinned by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotType {
    Auto,
    Manual,
    Checkpoint,
    Milestone,
    Recovery,
}

impl std::fmt::Display for SnapshotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SnapshotType::Auto => "auto",
            SnapshotType::Manual => "manual",
            SnapshotType::Checkpoint => "checkpoint",
            SnapshotType::Milestone => "milestone",
            SnapshotType::Recovery => "recovery",
        };
        write!(f, "{s}")
    }
}

/// Project-level context captured best-effort (git may be absent).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectState {
    pub root_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_head: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_dirty: Option<bool>,
}

/// Condensed view of one active run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: String,
    pub current_step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_workflow: Option<String>,
}

/// The captured state; the checksum is computed over exactly this value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotState {
    #[serde(default)]
    pub project: ProjectState,
    #[serde(default)]
    pub workflows: Vec<RunSummary>,
    /// Most recent artifacts, capped at capture time.
    #[serde(default)]
    pub artifacts: Vec<ArtifactRecord>,
    /// Context usage counters (tokens per session and similar).
    #[serde(default)]
    pub context: serde_json::Value,
}

/// Checksum block verified on every read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotValidation {
    /// SHA-256 over the serialized `state` field, hex-encoded.
    pub checksum: String,
    pub is_valid: bool,
}

/// Retention policy attached to a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRetention {
    pub policy: String,
    pub priority: u32,
    pub pinned: bool,
}

impl Default for SnapshotRetention {
    fn default() -> Self {
        Self {
            policy: "default".to_string(),
            priority: 0,
            pinned: false,
        }
    }
}

/// Storage metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
}

/// A persisted snapshot record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot_id: String,
    #[serde(rename = "type")]
    pub snapshot_type: SnapshotType,
    pub created_at: DateTime<Utc>,
    pub state: SnapshotState,
    pub validation: SnapshotValidation,
    #[serde(default)]
    pub retention: SnapshotRetention,
    #[serde(default)]
    pub metadata: SnapshotMetadata,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_type_display_matches_id_segment() {
        assert_eq!(SnapshotType::Manual.to_string(), "manual");
        assert_eq!(SnapshotType::Milestone.to_string(), "milestone");
    }

    #[test]
    fn test_record_wire_shape() {
        let record = SnapshotRecord {
            snapshot_id: "snap-manual-1700000000-abc123".into(),
            snapshot_type: SnapshotType::Manual,
            created_at: Utc::now(),
            state: SnapshotState::default(),
            validation: SnapshotValidation {
                checksum: "00".into(),
                is_valid: true,
            },
            retention: SnapshotRetention::default(),
            metadata: SnapshotMetadata::default(),
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"manual\""));
        assert!(json.contains("\"checksum\""));
    }
}
