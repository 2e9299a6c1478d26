//! Atomic JSON persistence helpers.

use maestro_core::MaestroResult;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Write `value` as pretty JSON via a temp file in the same directory,
/// then rename into place. Rename is the atomicity boundary: readers see
/// either the old file or the new one, never a partial write.
pub async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> MaestroResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    write_bytes_atomic(path, json.as_bytes()).await
}

/// Atomically replace `path` with `bytes`.
pub async fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> MaestroResult<()> {
    let suffix: u32 = rand::thread_rng().gen();
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp-{suffix:08x}"));

    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Read and deserialize a JSON file.
pub async fn read_json<T: DeserializeOwned>(path: &Path) -> MaestroResult<T> {
    let data = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&data)?)
}

/// Read a JSON file, returning `None` when it does not exist.
pub async fn read_json_opt<T: DeserializeOwned>(path: &Path) -> MaestroResult<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[tokio::test]
    async fn test_atomic_write_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            name: "a".into(),
            count: 2,
        };

        write_json_atomic(&path, &doc).await.unwrap();
        let loaded: Doc = read_json(&path).await.unwrap();
        assert_eq!(loaded, doc);

        // No temp files left behind.
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["doc.json".to_string()]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        write_json_atomic(&path, &Doc { name: "a".into(), count: 1 })
            .await
            .unwrap();
        write_json_atomic(&path, &Doc { name: "b".into(), count: 2 })
            .await
            .unwrap();
        let loaded: Doc = read_json(&path).await.unwrap();
        assert_eq!(loaded.name, "b");
    }

    #[tokio::test]
    async fn test_read_json_opt_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing: Option<Doc> = read_json_opt(&dir.path().join("nope.json")).await.unwrap();
        assert!(missing.is_none());
    }
}
