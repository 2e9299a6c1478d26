use crate::fsutil::{read_json, read_json_opt, write_json_atomic};
use crate::layout::RunPaths;
use chrono::{DateTime, Utc};
use maestro_core::{
    new_run_id, ArtifactRecord, MaestroError, MaestroResult, RunPatch, RunRecord, RunStatus,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Options for run creation.
#[derive(Debug, Clone, Default)]
pub struct CreateRunOptions {
    /// Reuse a caller-provided run id (resumption); a fresh one is minted
    /// otherwise.
    pub run_id: Option<String>,
}

/// The artifact index persisted as `artifact-registry.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArtifactRegistry {
    #[serde(default)]
    pub artifacts: BTreeMap<String, ArtifactRecord>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ArtifactRegistry {
    pub fn get(&self, name: &str) -> Option<&ArtifactRecord> {
        self.artifacts.get(name)
    }

    /// Entries usable as inputs for steps at or before `step`.
    pub fn passing_up_to_step(&self, step: u32) -> Vec<&ArtifactRecord> {
        self.artifacts
            .values()
            .filter(|a| {
                a.step <= step && a.validation_status == maestro_core::ValidationStatus::Pass
            })
            .collect()
    }
}

/// Owns every run's persistent state: `run.json`, the artifact registry,
/// and the run directory tree. All writes are atomic (temp + rename) and
/// serialized per-run in-process.
pub struct RunManager {
    base_dir: PathBuf,
    run_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl RunManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve the directory layout for a run.
    pub fn run_paths(&self, run_id: &str) -> RunPaths {
        RunPaths::new(&self.base_dir, run_id)
    }

    async fn lock_for(&self, run_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.run_locks.lock().await;
        locks
            .entry(run_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Create a run: mint the id, build the directory tree, persist the
    /// initial record. Directory creation is recursive and safe under
    /// concurrent callers.
    pub async fn create_run(
        &self,
        user_request: &str,
        opts: CreateRunOptions,
    ) -> MaestroResult<String> {
        let run_id = opts.run_id.unwrap_or_else(new_run_id);
        let paths = self.run_paths(&run_id);

        tokio::fs::create_dir_all(&paths.root).await?;
        for dir in paths.subdirectories() {
            tokio::fs::create_dir_all(&dir).await?;
        }

        let record = RunRecord::new(&run_id, user_request);
        let lock = self.lock_for(&run_id).await;
        let _guard = lock.lock().await;
        write_json_atomic(&paths.run_file(), &record).await?;
        write_json_atomic(&paths.registry_file(), &ArtifactRegistry::default()).await?;

        info!(run_id = %run_id, "Run created");
        Ok(run_id)
    }

    /// Load a run record.
    pub async fn read_run(&self, run_id: &str) -> MaestroResult<RunRecord> {
        read_json(&self.run_paths(run_id).run_file()).await
    }

    /// Apply a patch to the run record under the per-run lock. Scalar
    /// fields overwrite, metadata merges shallowly, status transitions are
    /// validated.
    pub async fn update_run(&self, run_id: &str, patch: RunPatch) -> MaestroResult<RunRecord> {
        let lock = self.lock_for(run_id).await;
        let _guard = lock.lock().await;

        let paths = self.run_paths(run_id);
        let mut record: RunRecord = read_json(&paths.run_file()).await?;
        patch.apply(&mut record)?;
        write_json_atomic(&paths.run_file(), &record).await?;
        debug!(run_id = %run_id, status = %record.status, "Run updated");
        Ok(record)
    }

    /// Mark a run failed, recording the cause and the step it failed at.
    pub async fn fail_run(
        &self,
        run_id: &str,
        error: impl Into<String>,
        failed_at_step: Option<u32>,
    ) -> MaestroResult<RunRecord> {
        let patch = RunPatch {
            status: Some(RunStatus::Failed),
            metadata: Some(maestro_core::RunMetadata {
                error: Some(error.into()),
                failed_at_step,
                ..Default::default()
            }),
            ..Default::default()
        };
        self.update_run(run_id, patch).await
    }

    /// Register an artifact, or upsert an existing entry with the same
    /// name and path. A name collision with a *different* path is refused:
    /// downstream steps resolve artifacts by name, so silently repointing
    /// one would corrupt the handoff chain.
    pub async fn register_artifact(
        &self,
        run_id: &str,
        artifact: ArtifactRecord,
    ) -> MaestroResult<()> {
        validate_artifact_path(&artifact.path)?;

        let lock = self.lock_for(run_id).await;
        let _guard = lock.lock().await;

        let paths = self.run_paths(run_id);
        let mut registry: ArtifactRegistry =
            read_json_opt(&paths.registry_file()).await?.unwrap_or_default();

        if let Some(existing) = registry.artifacts.get(&artifact.name) {
            if existing.path != artifact.path {
                return Err(MaestroError::Validation(format!(
                    "artifact '{}' already registered at '{}' (got '{}')",
                    artifact.name, existing.path, artifact.path
                )));
            }
        }

        debug!(
            run_id = %run_id,
            artifact = %artifact.name,
            step = artifact.step,
            "Artifact registered"
        );
        registry.artifacts.insert(artifact.name.clone(), artifact);
        registry.updated_at = Some(Utc::now());
        write_json_atomic(&paths.registry_file(), &registry).await
    }

    /// Load the artifact registry; an absent file is an empty registry.
    pub async fn read_artifact_registry(&self, run_id: &str) -> MaestroResult<ArtifactRegistry> {
        Ok(read_json_opt(&self.run_paths(run_id).registry_file())
            .await?
            .unwrap_or_default())
    }

    /// Mark all non-terminal artifacts `unknown`; used when a run is
    /// cancelled with work in flight.
    pub async fn invalidate_inflight_artifacts(&self, run_id: &str, from_step: u32) -> MaestroResult<()> {
        let lock = self.lock_for(run_id).await;
        let _guard = lock.lock().await;

        let paths = self.run_paths(run_id);
        let mut registry: ArtifactRegistry =
            read_json_opt(&paths.registry_file()).await?.unwrap_or_default();
        let mut touched = 0;
        for artifact in registry.artifacts.values_mut() {
            if artifact.step >= from_step {
                artifact.validation_status = maestro_core::ValidationStatus::Unknown;
                touched += 1;
            }
        }
        if touched > 0 {
            warn!(run_id = %run_id, count = touched, "In-flight artifacts invalidated");
            registry.updated_at = Some(Utc::now());
            write_json_atomic(&paths.registry_file(), &registry).await?;
        }
        Ok(())
    }

    /// List known run ids, newest first by directory name timestamp.
    pub async fn list_runs(&self) -> MaestroResult<Vec<String>> {
        let runs_dir = self.base_dir.join("runs");
        let mut ids = Vec::new();
        let mut entries = match tokio::fs::read_dir(&runs_dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if maestro_core::is_run_id(name) {
                    ids.push(name.to_string());
                }
            }
        }
        ids.sort();
        ids.reverse();
        Ok(ids)
    }
}

/// Artifact paths are stored relative to the run directory and must stay
/// inside it.
fn validate_artifact_path(path: &str) -> MaestroResult<()> {
    let p = Path::new(path);
    if p.is_absolute() {
        return Err(MaestroError::Validation(format!(
            "artifact path must be relative to the run directory: {path}"
        )));
    }
    for component in p.components() {
        if matches!(component, Component::ParentDir) {
            return Err(MaestroError::Validation(format!(
                "artifact path must not traverse outside the run directory: {path}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use maestro_core::{ArtifactKind, ValidationStatus};

    fn manager() -> (tempfile::TempDir, RunManager) {
        let dir = tempfile::tempdir().unwrap();
        let mgr = RunManager::new(dir.path());
        (dir, mgr)
    }

    #[tokio::test]
    async fn test_create_then_read_roundtrip() {
        let (_dir, mgr) = manager();
        let run_id = mgr
            .create_run("Build a login form", CreateRunOptions::default())
            .await
            .unwrap();

        let record = mgr.read_run(&run_id).await.unwrap();
        assert_eq!(record.run_id, run_id);
        assert_eq!(record.user_request, "Build a login form");
        assert_eq!(record.status, RunStatus::Created);

        let paths = mgr.run_paths(&run_id);
        for dir in paths.subdirectories() {
            assert!(dir.is_dir(), "missing {}", dir.display());
        }
    }

    #[tokio::test]
    async fn test_update_run_state_machine() {
        let (_dir, mgr) = manager();
        let run_id = mgr
            .create_run("x", CreateRunOptions::default())
            .await
            .unwrap();

        mgr.update_run(&run_id, RunPatch::status(RunStatus::Routing))
            .await
            .unwrap();
        mgr.update_run(&run_id, RunPatch::status(RunStatus::Running))
            .await
            .unwrap();

        let err = mgr
            .update_run(&run_id, RunPatch::status(RunStatus::Created))
            .await;
        assert!(matches!(err, Err(MaestroError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_register_artifact_and_collision() {
        let (_dir, mgr) = manager();
        let run_id = mgr
            .create_run("x", CreateRunOptions::default())
            .await
            .unwrap();

        let artifact = ArtifactRecord::new("plan.json", "plans/plan-wf.json", 1, "planner")
            .with_kind(ArtifactKind::Plan)
            .with_status(ValidationStatus::Pass);
        mgr.register_artifact(&run_id, artifact.clone()).await.unwrap();

        // Same name + same path upserts.
        mgr.register_artifact(&run_id, artifact.clone().with_size(100))
            .await
            .unwrap();
        let registry = mgr.read_artifact_registry(&run_id).await.unwrap();
        assert_eq!(registry.artifacts.len(), 1);
        assert_eq!(registry.get("plan.json").unwrap().size, 100);

        // Same name + different path refused.
        let conflicting = ArtifactRecord::new("plan.json", "artifacts/other.json", 2, "qa");
        assert!(mgr.register_artifact(&run_id, conflicting).await.is_err());
    }

    #[tokio::test]
    async fn test_artifact_path_containment() {
        let (_dir, mgr) = manager();
        let run_id = mgr
            .create_run("x", CreateRunOptions::default())
            .await
            .unwrap();

        let escape = ArtifactRecord::new("evil", "../outside.json", 0, "router");
        assert!(mgr.register_artifact(&run_id, escape).await.is_err());

        let absolute = ArtifactRecord::new("abs", "/etc/passwd", 0, "router");
        assert!(mgr.register_artifact(&run_id, absolute).await.is_err());
    }

    #[tokio::test]
    async fn test_fail_run_records_cause() {
        let (_dir, mgr) = manager();
        let run_id = mgr
            .create_run("x", CreateRunOptions::default())
            .await
            .unwrap();
        mgr.update_run(&run_id, RunPatch::status(RunStatus::Routing))
            .await
            .unwrap();
        mgr.update_run(&run_id, RunPatch::status(RunStatus::Running))
            .await
            .unwrap();

        let record = mgr.fail_run(&run_id, "oracle exploded", Some(3)).await.unwrap();
        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.metadata.error.as_deref(), Some("oracle exploded"));
        assert_eq!(record.metadata.failed_at_step, Some(3));
    }

    #[tokio::test]
    async fn test_invalidate_inflight() {
        let (_dir, mgr) = manager();
        let run_id = mgr
            .create_run("x", CreateRunOptions::default())
            .await
            .unwrap();

        for (name, step) in [("a", 1u32), ("b", 2), ("c", 3)] {
            mgr.register_artifact(
                &run_id,
                ArtifactRecord::new(name, format!("artifacts/{name}"), step, "dev")
                    .with_status(ValidationStatus::Pass),
            )
            .await
            .unwrap();
        }

        mgr.invalidate_inflight_artifacts(&run_id, 2).await.unwrap();
        let registry = mgr.read_artifact_registry(&run_id).await.unwrap();
        assert_eq!(
            registry.get("a").unwrap().validation_status,
            ValidationStatus::Pass
        );
        assert_eq!(
            registry.get("b").unwrap().validation_status,
            ValidationStatus::Unknown
        );
        assert_eq!(
            registry.get("c").unwrap().validation_status,
            ValidationStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_list_runs_newest_first() {
        let (_dir, mgr) = manager();
        let a = mgr
            .create_run(
                "first",
                CreateRunOptions {
                    run_id: Some("run-1000-aaaaaaaa".into()),
                },
            )
            .await
            .unwrap();
        let b = mgr
            .create_run(
                "second",
                CreateRunOptions {
                    run_id: Some("run-2000-bbbbbbbb".into()),
                },
            )
            .await
            .unwrap();

        let runs = mgr.list_runs().await.unwrap();
        assert_eq!(runs, vec![b, a]);
    }

    #[tokio::test]
    async fn test_concurrent_artifact_registration() {
        let (_dir, mgr) = manager();
        let mgr = Arc::new(mgr);
        let run_id = mgr
            .create_run("x", CreateRunOptions::default())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for i in 0..8u32 {
            let mgr = mgr.clone();
            let run_id = run_id.clone();
            handles.push(tokio::spawn(async move {
                mgr.register_artifact(
                    &run_id,
                    ArtifactRecord::new(
                        format!("artifact-{i}"),
                        format!("artifacts/artifact-{i}"),
                        i,
                        "dev",
                    ),
                )
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let registry = mgr.read_artifact_registry(&run_id).await.unwrap();
        assert_eq!(registry.artifacts.len(), 8);
    }
}
