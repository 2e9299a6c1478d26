use crate::types::{
    ProjectState, SnapshotMetadata, SnapshotRecord, SnapshotRetention, SnapshotState,
    SnapshotType, SnapshotValidation,
};
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use maestro_core::{new_snapshot_id, MaestroError, MaestroResult};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Newest artifacts kept per capture.
pub const MAX_CAPTURED_ARTIFACTS: usize = 20;

fn state_checksum(state: &SnapshotState) -> MaestroResult<String> {
    let bytes = serde_json::to_vec(state)?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// Owns the snapshot store: compressed, checksummed state captures with a
/// retention policy. Pinned snapshots survive pruning and require `force`
/// to delete.
pub struct SnapshotManager {
    dir: PathBuf,
    compress: bool,
}

impl SnapshotManager {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            compress: true,
        }
    }

    /// Disable gzip (plain `.json` files).
    pub fn without_compression(mut self) -> Self {
        self.compress = false;
        self
    }

    /// Capture a snapshot. Artifacts beyond the newest
    /// [`MAX_CAPTURED_ARTIFACTS`] are dropped before hashing. Milestones
    /// are pinned automatically.
    pub async fn create(
        &self,
        snapshot_type: SnapshotType,
        mut state: SnapshotState,
    ) -> MaestroResult<SnapshotRecord> {
        tokio::fs::create_dir_all(&self.dir).await?;

        if state.artifacts.len() > MAX_CAPTURED_ARTIFACTS {
            state
                .artifacts
                .sort_by(|a, b| b.created_at.cmp(&a.created_at));
            state.artifacts.truncate(MAX_CAPTURED_ARTIFACTS);
        }

        let snapshot_id = new_snapshot_id(&snapshot_type.to_string());
        let checksum = state_checksum(&state)?;
        let mut record = SnapshotRecord {
            snapshot_id: snapshot_id.clone(),
            snapshot_type,
            created_at: Utc::now(),
            state,
            validation: SnapshotValidation {
                checksum,
                is_valid: true,
            },
            retention: SnapshotRetention {
                pinned: snapshot_type == SnapshotType::Milestone,
                ..SnapshotRetention::default()
            },
            metadata: SnapshotMetadata {
                compression: self.compress.then(|| "gzip".to_string()),
                size_bytes: 0,
            },
        };

        // Two-pass serialization so the stored record carries its own
        // uncompressed payload size.
        record.metadata.size_bytes = serde_json::to_vec_pretty(&record)?.len() as u64;
        let json = serde_json::to_vec_pretty(&record)?;
        let (path, bytes) = if self.compress {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(&json)?;
            (self.path_for(&snapshot_id, true), encoder.finish()?)
        } else {
            (self.path_for(&snapshot_id, false), json)
        };
        tokio::fs::write(&path, &bytes).await?;

        info!(
            snapshot_id = %snapshot_id,
            r#type = %snapshot_type,
            size_bytes = record.metadata.size_bytes,
            "Snapshot created"
        );
        Ok(record)
    }

    /// Load a snapshot and verify its checksum; a mismatch is
    /// `ErrCorruptSnapshot` and non-recoverable for that snapshot.
    pub async fn get(&self, snapshot_id: &str) -> MaestroResult<SnapshotRecord> {
        let record = self.load_unverified(snapshot_id).await?;
        let actual = state_checksum(&record.state)?;
        if actual != record.validation.checksum {
            return Err(MaestroError::CorruptSnapshot {
                snapshot_id: snapshot_id.to_string(),
                detail: format!(
                    "checksum mismatch: stored {} computed {}",
                    record.validation.checksum, actual
                ),
            });
        }
        Ok(record)
    }

    /// List snapshots, newest first. Corrupt entries are marked
    /// `is_valid = false`; pass `include_invalid = false` to drop them.
    pub async fn list(&self, include_invalid: bool) -> MaestroResult<Vec<SnapshotRecord>> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(snapshot_id) = name
                .strip_suffix(".json.gz")
                .or_else(|| name.strip_suffix(".json"))
            else {
                continue;
            };
            match self.get(snapshot_id).await {
                Ok(record) => records.push(record),
                Err(MaestroError::CorruptSnapshot { .. }) => {
                    warn!(snapshot_id = %snapshot_id, "Corrupt snapshot in store");
                    if include_invalid {
                        if let Ok(mut record) = self.load_unverified(snapshot_id).await {
                            record.validation.is_valid = false;
                            records.push(record);
                        }
                    }
                }
                Err(e) => {
                    warn!(snapshot_id = %snapshot_id, error = %e, "Unreadable snapshot skipped");
                }
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    /// Delete a snapshot; pinned snapshots require `force`.
    pub async fn delete(&self, snapshot_id: &str, force: bool) -> MaestroResult<()> {
        let record = self.load_unverified(snapshot_id).await?;
        if record.retention.pinned && !force {
            return Err(MaestroError::Validation(format!(
                "snapshot {snapshot_id} is pinned; use --force to delete"
            )));
        }
        tokio::fs::remove_file(self.existing_path(snapshot_id).await?).await?;
        info!(snapshot_id = %snapshot_id, "Snapshot deleted");
        Ok(())
    }

    /// Delete the oldest snapshots until `keep_count` remain. With
    /// `respect_pinned` (the default policy) pinned snapshots are excluded
    /// from both the deletion set and the kept count.
    pub async fn prune(&self, keep_count: usize, respect_pinned: bool) -> MaestroResult<usize> {
        let records = self.list(true).await?;
        let candidates: Vec<&SnapshotRecord> = records
            .iter()
            .filter(|r| !(respect_pinned && r.retention.pinned))
            .collect();

        if candidates.len() <= keep_count {
            return Ok(0);
        }

        // list() is newest-first; prune from the tail.
        let mut pruned = 0;
        for record in &candidates[keep_count..] {
            tokio::fs::remove_file(self.existing_path(&record.snapshot_id).await?).await?;
            pruned += 1;
        }
        info!(pruned = pruned, keep_count = keep_count, "Snapshots pruned");
        Ok(pruned)
    }

    /// Capture git HEAD and dirty state, best-effort: a missing git binary
    /// or non-repo directory yields `None`s.
    pub async fn capture_project_state(root: &Path) -> ProjectState {
        let mut state = ProjectState {
            root_path: root.display().to_string(),
            git_head: None,
            git_dirty: None,
        };

        let head = tokio::process::Command::new("git")
            .arg("rev-parse")
            .arg("HEAD")
            .current_dir(root)
            .output()
            .await;
        if let Ok(out) = head {
            if out.status.success() {
                state.git_head = Some(String::from_utf8_lossy(&out.stdout).trim().to_string());
            }
        }

        let status = tokio::process::Command::new("git")
            .arg("status")
            .arg("--porcelain")
            .current_dir(root)
            .output()
            .await;
        if let Ok(out) = status {
            if out.status.success() {
                state.git_dirty = Some(!out.stdout.is_empty());
            }
        }

        state
    }

    fn path_for(&self, snapshot_id: &str, compressed: bool) -> PathBuf {
        if compressed {
            self.dir.join(format!("{snapshot_id}.json.gz"))
        } else {
            self.dir.join(format!("{snapshot_id}.json"))
        }
    }

    async fn existing_path(&self, snapshot_id: &str) -> MaestroResult<PathBuf> {
        for compressed in [true, false] {
            let path = self.path_for(snapshot_id, compressed);
            if tokio::fs::try_exists(&path).await? {
                return Ok(path);
            }
        }
        Err(MaestroError::Validation(format!(
            "snapshot not found: {snapshot_id}"
        )))
    }

    async fn load_unverified(&self, snapshot_id: &str) -> MaestroResult<SnapshotRecord> {
        let path = self.existing_path(snapshot_id).await?;
        let bytes = tokio::fs::read(&path).await?;
        let json = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
            let mut decoder = GzDecoder::new(&bytes[..]);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out)?;
            out
        } else {
            bytes
        };
        Ok(serde_json::from_slice(&json)?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use maestro_core::ArtifactRecord;

    fn state_with(root: &str) -> SnapshotState {
        SnapshotState {
            project: ProjectState {
                root_path: root.into(),
                git_head: Some("abc123".into()),
                git_dirty: Some(false),
            },
            workflows: Vec::new(),
            artifacts: Vec::new(),
            context: serde_json::json!({"tokens_used": 1200}),
        }
    }

    #[tokio::test]
    async fn test_create_then_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path());

        let created = manager
            .create(SnapshotType::Manual, state_with("/repo"))
            .await
            .unwrap();
        let loaded = manager.get(&created.snapshot_id).await.unwrap();
        assert_eq!(loaded.state.project, created.state.project);
        assert_eq!(loaded.state.context, created.state.context);
        assert!(loaded.validation.is_valid);
        assert_eq!(loaded.metadata.compression.as_deref(), Some("gzip"));
    }

    #[tokio::test]
    async fn test_uncompressed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path()).without_compression();

        let created = manager
            .create(SnapshotType::Auto, state_with("/repo"))
            .await
            .unwrap();
        assert!(dir
            .path()
            .join(format!("{}.json", created.snapshot_id))
            .exists());
        manager.get(&created.snapshot_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_tampered_snapshot_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path()).without_compression();

        let created = manager
            .create(SnapshotType::Manual, state_with("/repo"))
            .await
            .unwrap();
        let path = dir.path().join(format!("{}.json", created.snapshot_id));
        let tampered = tokio::fs::read_to_string(&path)
            .await
            .unwrap()
            .replace("/repo", "/rep0");
        tokio::fs::write(&path, tampered).await.unwrap();

        let err = manager.get(&created.snapshot_id).await;
        assert!(matches!(err, Err(MaestroError::CorruptSnapshot { .. })));
    }

    #[tokio::test]
    async fn test_list_marks_or_excludes_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path()).without_compression();

        let good = manager
            .create(SnapshotType::Manual, state_with("/a"))
            .await
            .unwrap();
        let bad = manager
            .create(SnapshotType::Manual, state_with("/b"))
            .await
            .unwrap();
        let bad_path = dir.path().join(format!("{}.json", bad.snapshot_id));
        let tampered = tokio::fs::read_to_string(&bad_path)
            .await
            .unwrap()
            .replace("/b", "/c");
        tokio::fs::write(&bad_path, tampered).await.unwrap();

        let all = manager.list(true).await.unwrap();
        assert_eq!(all.len(), 2);
        let invalid = all.iter().find(|r| r.snapshot_id == bad.snapshot_id).unwrap();
        assert!(!invalid.validation.is_valid);

        let valid_only = manager.list(false).await.unwrap();
        assert_eq!(valid_only.len(), 1);
        assert_eq!(valid_only[0].snapshot_id, good.snapshot_id);
    }

    #[tokio::test]
    async fn test_milestone_pinned_and_delete_needs_force() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path());

        let milestone = manager
            .create(SnapshotType::Milestone, state_with("/repo"))
            .await
            .unwrap();
        assert!(milestone.retention.pinned);

        assert!(manager.delete(&milestone.snapshot_id, false).await.is_err());
        manager.delete(&milestone.snapshot_id, true).await.unwrap();
        assert!(manager.get(&milestone.snapshot_id).await.is_err());
    }

    #[tokio::test]
    async fn test_prune_respects_pinned() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path());

        let _pinned = manager
            .create(SnapshotType::Milestone, state_with("/a"))
            .await
            .unwrap();
        for i in 0..4 {
            manager
                .create(SnapshotType::Auto, state_with(&format!("/auto-{i}")))
                .await
                .unwrap();
        }

        let pruned = manager.prune(2, true).await.unwrap();
        assert_eq!(pruned, 2);

        let remaining = manager.list(true).await.unwrap();
        assert_eq!(remaining.len(), 3);
        assert!(remaining
            .iter()
            .any(|r| r.snapshot_type == SnapshotType::Milestone));
    }

    #[tokio::test]
    async fn test_prune_noop_when_under_keep() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path());
        manager
            .create(SnapshotType::Auto, state_with("/a"))
            .await
            .unwrap();
        assert_eq!(manager.prune(5, true).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_artifact_cap_at_capture() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SnapshotManager::new(dir.path());

        let mut state = state_with("/repo");
        for i in 0..30 {
            state.artifacts.push(ArtifactRecord::new(
                format!("a{i}"),
                format!("artifacts/a{i}"),
                i,
                "dev",
            ));
        }
        let created = manager.create(SnapshotType::Manual, state).await.unwrap();
        assert_eq!(created.state.artifacts.len(), MAX_CAPTURED_ARTIFACTS);

        // And the stored checksum covers the capped state.
        manager.get(&created.snapshot_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_capture_project_state_outside_repo() {
        let dir = tempfile::tempdir().unwrap();
        let state = SnapshotManager::capture_project_state(dir.path()).await;
        assert_eq!(state.root_path, dir.path().display().to_string());
        assert!(state.git_head.is_none());
    }
}
