//! `maestro.toml` configuration with environment overrides.

use maestro_core::{MaestroError, MaestroResult};
use maestro_memory::MemoryConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct MaestroConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_workflows_dir")]
    pub workflows_dir: PathBuf,
    #[serde(default)]
    pub skills_dir: Option<PathBuf>,
    /// Markdown document carrying the `## Run CUJ Mapping` table.
    #[serde(default)]
    pub cuj_index: Option<PathBuf>,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: u64,
    #[serde(default = "default_retention_days")]
    pub telemetry_retention_days: u32,
}

impl Default for MaestroConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            workflows_dir: default_workflows_dir(),
            skills_dir: None,
            cuj_index: None,
            memory: MemoryConfig::default(),
            max_context_tokens: default_max_context_tokens(),
            telemetry_retention_days: default_retention_days(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_workflows_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_context_tokens() -> u64 {
    200_000
}

fn default_retention_days() -> u32 {
    90
}

impl MaestroConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub async fn load(path: &Path) -> MaestroResult<Self> {
        let mut config = match tokio::fs::read_to_string(path).await {
            Ok(raw) => toml::from_str(&raw)
                .map_err(|e| MaestroError::Config(format!("invalid {}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => return Err(e.into()),
        };

        // The project dir env roots relative paths; the legacy name is
        // honored as a fallback.
        let base = std::env::var_os("MAESTRO_PROJECT_DIR")
            .or_else(|| std::env::var_os("CLAUDE_PROJECT_DIR"))
            .map(PathBuf::from);
        if let Some(base) = base {
            if config.data_dir.is_relative() {
                config.data_dir = base.join(&config.data_dir);
            }
            if config.workflows_dir.is_relative() {
                config.workflows_dir = base.join(&config.workflows_dir);
            }
        }
        Ok(config)
    }

    /// Runtime session tag from the environment, when present.
    pub fn session_tag() -> Option<String> {
        std::env::var("CLAUDE_CODE_SESSION_ID")
            .or_else(|_| std::env::var("CURSOR_SESSION_ID"))
            .ok()
    }
}
