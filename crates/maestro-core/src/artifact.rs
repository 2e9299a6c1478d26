use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Validation verdict attached to a registered artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pass,
    Fail,
    Unknown,
}

impl Default for ValidationStatus {
    fn default() -> Self {
        ValidationStatus::Unknown
    }
}

/// Kind of a registered artifact.
///
/// Persisted records may carry kinds this runtime does not know about;
/// those deserialize to [`ArtifactKind::Unknown`] with the raw value kept
/// intact rather than being dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactKind {
    File,
    TestResult,
    Plan,
    Snapshot,
    RouteDecision,
    Unknown(serde_json::Value),
}

impl ArtifactKind {
    fn as_known_str(&self) -> Option<&'static str> {
        match self {
            ArtifactKind::File => Some("file"),
            ArtifactKind::TestResult => Some("test_result"),
            ArtifactKind::Plan => Some("plan"),
            ArtifactKind::Snapshot => Some("snapshot"),
            ArtifactKind::RouteDecision => Some("route_decision"),
            ArtifactKind::Unknown(_) => None,
        }
    }
}

impl Default for ArtifactKind {
    fn default() -> Self {
        ArtifactKind::File
    }
}

impl Serialize for ArtifactKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_known_str() {
            Some(s) => serializer.serialize_str(s),
            None => match self {
                ArtifactKind::Unknown(raw) => raw.serialize(serializer),
                _ => unreachable!("known kinds always have a string form"),
            },
        }
    }
}

impl<'de> Deserialize<'de> for ArtifactKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = serde_json::Value::deserialize(deserializer)?;
        if let Some(s) = raw.as_str() {
            let kind = match s {
                "file" => Some(ArtifactKind::File),
                "test_result" => Some(ArtifactKind::TestResult),
                "plan" => Some(ArtifactKind::Plan),
                "snapshot" => Some(ArtifactKind::Snapshot),
                "route_decision" => Some(ArtifactKind::RouteDecision),
                _ => None,
            };
            if let Some(kind) = kind {
                return Ok(kind);
            }
        }
        if raw.is_null() {
            return Err(D::Error::custom("artifact kind must not be null"));
        }
        Ok(ArtifactKind::Unknown(raw))
    }
}

/// A produced output of a step, registered by name within a run.
///
/// The registry entry is the single source of truth for cross-step handoff;
/// scanning the filesystem is advisory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    /// Path relative to the run directory.
    pub path: String,
    pub step: u32,
    pub agent: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(rename = "type", default)]
    pub kind: ArtifactKind,
    #[serde(rename = "validationStatus", default)]
    pub validation_status: ValidationStatus,
    #[serde(default)]
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ArtifactRecord {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        step: u32,
        agent: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            step,
            agent: agent.into(),
            dependencies: Vec::new(),
            kind: ArtifactKind::File,
            validation_status: ValidationStatus::Unknown,
            size: 0,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_kind(mut self, kind: ArtifactKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_status(mut self, status: ValidationStatus) -> Self {
        self.validation_status = status;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }
}
