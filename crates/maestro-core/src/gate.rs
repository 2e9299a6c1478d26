use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Verdict recorded in a step's gate file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateStatus {
    Pass,
    Fail,
    Warn,
}

/// Quality gate for one step: `gates/NN-<agent>.json`, write-once.
///
/// Later steps must not execute until the preceding gate is `pass` or was
/// explicitly skipped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateRecord {
    pub step: u32,
    pub agent: String,
    pub validation_status: GateStatus,
    pub allowed: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub checks: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl GateRecord {
    pub fn pass(step: u32, agent: impl Into<String>) -> Self {
        Self {
            step,
            agent: agent.into(),
            validation_status: GateStatus::Pass,
            allowed: true,
            errors: Vec::new(),
            checks: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn fail(step: u32, agent: impl Into<String>, errors: Vec<String>) -> Self {
        Self {
            step,
            agent: agent.into(),
            validation_status: GateStatus::Fail,
            allowed: false,
            errors,
            checks: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_check(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.checks.insert(name.into(), value);
        self
    }

    /// Whether this gate permits downstream steps to proceed.
    pub fn passed(&self) -> bool {
        self.allowed || self.validation_status == GateStatus::Pass
    }

    /// Payload equality ignoring the write timestamp, used for idempotent
    /// re-writes.
    pub fn same_payload(&self, other: &GateRecord) -> bool {
        self.step == other.step
            && self.agent == other.agent
            && self.validation_status == other.validation_status
            && self.allowed == other.allowed
            && self.errors == other.errors
            && self.checks == other.checks
    }
}

/// Non-authoritative rationale emitted alongside a gate:
/// `reasoning/NN-<agent>.json`. Used for recovery context and audit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningRecord {
    pub step: u32,
    pub agent: String,
    pub reasoning: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ReasoningRecord {
    pub fn new(step: u32, agent: impl Into<String>, reasoning: serde_json::Value) -> Self {
        Self {
            step,
            agent: agent.into(),
            reasoning,
            timestamp: Utc::now(),
        }
    }
}

/// Canonical gate/reasoning filename: `NN-<agent>.json`, zero-padded step.
pub fn step_file_name(step: u32, agent: &str) -> String {
    format!("{step:02}-{agent}.json")
}

/// Parse a canonical `NN-<agent>.json` filename back into step and agent.
pub fn parse_step_file_name(name: &str) -> Option<(u32, String)> {
    let stem = name.strip_suffix(".json")?;
    let (step, agent) = stem.split_once('-')?;
    if agent.is_empty() {
        return None;
    }
    Some((step.parse().ok()?, agent.to_string()))
}
