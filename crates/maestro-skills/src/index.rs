use crate::summary::{content_hash, SkillSummary};
use maestro_core::{MaestroError, MaestroResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Pre-built summary index, persisted as one JSON document so process
/// startup does not re-parse every skill file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SummaryIndex {
    #[serde(default)]
    pub summaries: BTreeMap<String, SkillSummary>,
}

impl SummaryIndex {
    pub fn get(&self, name: &str) -> Option<&SkillSummary> {
        self.summaries.get(name)
    }

    pub fn len(&self) -> usize {
        self.summaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.summaries.is_empty()
    }

    pub async fn load(path: &Path) -> MaestroResult<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => Ok(serde_json::from_str(&data)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> MaestroResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// Scans a skills directory and keeps the summary index in sync.
pub struct SummaryBuilder {
    skills_dir: PathBuf,
}

impl SummaryBuilder {
    pub fn new(skills_dir: impl Into<PathBuf>) -> Self {
        Self {
            skills_dir: skills_dir.into(),
        }
    }

    /// Refresh `index` from the skills directory. A summary is rebuilt
    /// only when the source content hash changed; stale entries for
    /// removed files are dropped. Returns the number of rebuilt skills.
    pub async fn refresh(&self, index: &mut SummaryIndex) -> MaestroResult<usize> {
        let mut seen = Vec::new();
        let mut rebuilt = 0;

        let mut entries = match tokio::fs::read_dir(&self.skills_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MaestroError::Config(format!(
                    "skills directory not found: {}",
                    self.skills_dir.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let raw = tokio::fs::read_to_string(&path).await?;
            let hash = content_hash(&raw);

            let summary = match SkillSummary::build(&raw) {
                Ok(s) => s,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping unparseable skill");
                    continue;
                }
            };
            seen.push(summary.name.clone());

            let fresh = index
                .summaries
                .get(&summary.name)
                .map_or(true, |existing| existing.content_hash != hash);
            if fresh {
                debug!(skill = %summary.name, "Summary rebuilt");
                index.summaries.insert(summary.name.clone(), summary);
                rebuilt += 1;
            }
        }

        index.summaries.retain(|name, _| seen.contains(name));
        info!(
            total = index.summaries.len(),
            rebuilt = rebuilt,
            "Skill summary index refreshed"
        );
        Ok(rebuilt)
    }
}
