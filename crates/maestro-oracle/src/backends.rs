//! Backend table for external agent CLIs.
//!
//! Platform capability tables live here in the adapter layer; the core
//! never inspects them.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported external agent backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    Claude,
    Gemini,
    Codex,
    CursorAgent,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackendKind::Claude => "claude",
            BackendKind::Gemini => "gemini",
            BackendKind::Codex => "codex",
            BackendKind::CursorAgent => "cursor-agent",
        };
        write!(f, "{s}")
    }
}

/// How to invoke one backend in headless mode. The prompt is always passed
/// as a standalone argv element, never interpolated into a shell string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendProfile {
    pub kind: BackendKind,
    pub program: String,
    /// Arguments placed before the prompt.
    pub base_args: Vec<String>,
    /// Extra environment for the child.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_string()).collect()
}

/// Built-in headless invocation profiles.
pub fn default_profiles() -> HashMap<BackendKind, BackendProfile> {
    let mut profiles = HashMap::new();
    profiles.insert(
        BackendKind::Claude,
        BackendProfile {
            kind: BackendKind::Claude,
            program: "claude".into(),
            base_args: args(&["-p", "--output-format", "json"]),
            env: HashMap::new(),
        },
    );
    profiles.insert(
        BackendKind::Gemini,
        BackendProfile {
            kind: BackendKind::Gemini,
            program: "gemini".into(),
            base_args: args(&["-p"]),
            env: HashMap::new(),
        },
    );
    profiles.insert(
        BackendKind::Codex,
        BackendProfile {
            kind: BackendKind::Codex,
            program: "codex".into(),
            base_args: args(&["exec", "--json"]),
            env: HashMap::new(),
        },
    );
    profiles.insert(
        BackendKind::CursorAgent,
        BackendProfile {
            kind: BackendKind::CursorAgent,
            program: "cursor-agent".into(),
            base_args: args(&["--print"]),
            env: HashMap::new(),
        },
    );
    profiles
}

/// Maps agent names to backends; unmapped agents use the default backend.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    profiles: HashMap<BackendKind, BackendProfile>,
    by_agent: HashMap<String, BackendKind>,
    default_kind: BackendKind,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            profiles: default_profiles(),
            by_agent: HashMap::new(),
            default_kind: BackendKind::Claude,
        }
    }

    pub fn with_default(mut self, kind: BackendKind) -> Self {
        self.default_kind = kind;
        self
    }

    pub fn assign(&mut self, agent: impl Into<String>, kind: BackendKind) {
        self.by_agent.insert(agent.into(), kind);
    }

    /// Override an invocation profile (custom binary path or flags).
    pub fn set_profile(&mut self, profile: BackendProfile) {
        self.profiles.insert(profile.kind, profile);
    }

    pub fn profile_for(&self, agent: &str) -> &BackendProfile {
        let kind = self
            .by_agent
            .get(agent)
            .copied()
            .unwrap_or(self.default_kind);
        self.profiles
            .get(&kind)
            .unwrap_or_else(|| &self.profiles[&BackendKind::Claude])
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
