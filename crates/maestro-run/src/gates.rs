use crate::fsutil::{read_json, read_json_opt, write_json_atomic};
use crate::layout::RunPaths;
use maestro_core::{
    parse_step_file_name, step_file_name, GateRecord, MaestroError, MaestroResult, ReasoningRecord,
};
use tracing::{debug, warn};

/// Writes per-step gate and reasoning files with canonical names.
///
/// Gate files are write-once per `(run, step)`: a passing gate is never
/// overwritten except by an identical payload (idempotent re-write) or an
/// explicit re-run during recovery resumption.
pub struct GateWriter<'a> {
    paths: &'a RunPaths,
}

impl<'a> GateWriter<'a> {
    pub fn new(paths: &'a RunPaths) -> Self {
        Self { paths }
    }

    /// Write a gate record. `allow_rerun` is only set by recovery.
    pub async fn write_gate(&self, record: &GateRecord, allow_rerun: bool) -> MaestroResult<()> {
        let path = self
            .paths
            .gates_dir()
            .join(step_file_name(record.step, &record.agent));

        if let Some(existing) = read_json_opt::<GateRecord>(&path).await? {
            if existing.same_payload(record) {
                debug!(step = record.step, agent = %record.agent, "Gate unchanged, skipping write");
                return Ok(());
            }
            if existing.passed() && !allow_rerun {
                return Err(MaestroError::Validation(format!(
                    "gate for step {} ({}) already passed; re-run must be explicit",
                    record.step, record.agent
                )));
            }
            warn!(step = record.step, agent = %record.agent, "Overwriting gate record");
        }

        write_json_atomic(&path, record).await
    }

    pub async fn write_reasoning(&self, record: &ReasoningRecord) -> MaestroResult<()> {
        let path = self
            .paths
            .reasoning_dir()
            .join(step_file_name(record.step, &record.agent));
        write_json_atomic(&path, record).await
    }

    /// Load all gate records, ordered by step ascending.
    pub async fn read_gates(&self) -> MaestroResult<Vec<GateRecord>> {
        let mut gates = Vec::new();
        let dir = self.paths.gates_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(gates),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if parse_step_file_name(&name).is_none() {
                continue;
            }
            match read_json::<GateRecord>(&entry.path()).await {
                Ok(gate) => gates.push(gate),
                Err(e) => warn!(file = %name, error = %e, "Skipping unreadable gate file"),
            }
        }
        gates.sort_by_key(|g| g.step);
        Ok(gates)
    }

    /// Load reasoning records, ordered by step ascending.
    pub async fn read_reasoning(&self) -> MaestroResult<Vec<ReasoningRecord>> {
        let mut records = Vec::new();
        let dir = self.paths.reasoning_dir();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if parse_step_file_name(&name).is_none() {
                continue;
            }
            match read_json::<ReasoningRecord>(&entry.path()).await {
                Ok(record) => records.push(record),
                Err(e) => warn!(file = %name, error = %e, "Skipping unreadable reasoning file"),
            }
        }
        records.sort_by_key(|r| r.step);
        Ok(records)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use maestro_core::GateStatus;
    use std::path::Path;

    async fn setup() -> (tempfile::TempDir, RunPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = RunPaths::new(dir.path(), "run-1-aaaaaaaa");
        for sub in paths.subdirectories() {
            tokio::fs::create_dir_all(sub).await.unwrap();
        }
        (dir, paths)
    }

    #[tokio::test]
    async fn test_write_and_read_gate() {
        let (_dir, paths) = setup().await;
        let writer = GateWriter::new(&paths);

        writer
            .write_gate(&GateRecord::pass(0, "router"), false)
            .await
            .unwrap();
        writer
            .write_gate(&GateRecord::pass(1, "planner"), false)
            .await
            .unwrap();

        let gates = writer.read_gates().await.unwrap();
        assert_eq!(gates.len(), 2);
        assert_eq!(gates[0].step, 0);
        assert_eq!(gates[1].agent, "planner");
        assert!(Path::new(&paths.gates_dir().join("00-router.json")).exists());
    }

    #[tokio::test]
    async fn test_passing_gate_is_write_once() {
        let (_dir, paths) = setup().await;
        let writer = GateWriter::new(&paths);

        let pass = GateRecord::pass(2, "developer");
        writer.write_gate(&pass, false).await.unwrap();

        // Identical payload: idempotent.
        writer.write_gate(&pass, false).await.unwrap();

        // Conflicting payload: refused.
        let fail = GateRecord::fail(2, "developer", vec!["broke".into()]);
        assert!(writer.write_gate(&fail, false).await.is_err());

        // Explicit re-run allowed.
        writer.write_gate(&fail, true).await.unwrap();
        let gates = writer.read_gates().await.unwrap();
        assert_eq!(gates[0].validation_status, GateStatus::Fail);
    }

    #[tokio::test]
    async fn test_failing_gate_can_be_upgraded() {
        let (_dir, paths) = setup().await;
        let writer = GateWriter::new(&paths);

        writer
            .write_gate(&GateRecord::fail(1, "qa", vec!["flaky".into()]), false)
            .await
            .unwrap();
        // A retry that passes may replace a failed gate without a flag.
        writer
            .write_gate(&GateRecord::pass(1, "qa"), false)
            .await
            .unwrap();

        let gates = writer.read_gates().await.unwrap();
        assert!(gates[0].passed());
    }

    #[tokio::test]
    async fn test_reasoning_roundtrip() {
        let (_dir, paths) = setup().await;
        let writer = GateWriter::new(&paths);

        let record = ReasoningRecord::new(
            1,
            "planner",
            serde_json::json!({"approach": "split into two phases"}),
        );
        writer.write_reasoning(&record).await.unwrap();

        let records = writer.read_reasoning().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reasoning["approach"], "split into two phases");
    }

    #[tokio::test]
    async fn test_non_canonical_files_ignored() {
        let (_dir, paths) = setup().await;
        tokio::fs::write(paths.gates_dir().join("README.md"), "hi")
            .await
            .unwrap();
        let writer = GateWriter::new(&paths);
        assert!(writer.read_gates().await.unwrap().is_empty());
    }
}
