//! Advisory cross-process file locking.
//!
//! The lock is an exclusive-create sidecar file carrying the holder's
//! identity. Waiters back off exponentially (50 ms doubling to a 500 ms
//! cap) for at most 5 s, then proceed without the lock: availability wins
//! over strict exclusion because the in-process hot map stays
//! authoritative and TTL bounds staleness. Locks older than 10 s are
//! treated as abandoned by a dead process and removed.

use chrono::{DateTime, Utc};
use maestro_core::MaestroResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

pub const BACKOFF_INITIAL_MS: u64 = 50;
pub const BACKOFF_CAP_MS: u64 = 500;
pub const MAX_LOCK_WAIT_MS: u64 = 5_000;
pub const STALE_LOCK_AGE_MS: i64 = 10_000;

/// Identity written into the lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub host: String,
}

impl LockInfo {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string()),
        }
    }

    fn age_ms(&self) -> i64 {
        (Utc::now() - self.timestamp).num_milliseconds()
    }
}

/// A held advisory lock; the sidecar file is removed on drop.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "Failed to release lock");
            }
        }
    }
}

/// Try to acquire the lock at `path` within the bounded wait.
///
/// Returns `Ok(Some(guard))` on success and `Ok(None)` when the wait
/// budget is exhausted — the caller proceeds lock-free (graceful
/// degradation). I/O errors other than contention propagate.
pub async fn acquire(path: &Path) -> MaestroResult<Option<LockGuard>> {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(MAX_LOCK_WAIT_MS);
    let mut backoff_ms = BACKOFF_INITIAL_MS;

    loop {
        match try_create(path).await {
            Ok(true) => {
                debug!(path = %path.display(), "Lock acquired");
                return Ok(Some(LockGuard { path: path.to_path_buf() }));
            }
            Ok(false) => {
                remove_if_stale(path).await;
            }
            Err(e) => return Err(e),
        }

        if tokio::time::Instant::now() + Duration::from_millis(backoff_ms) > deadline {
            warn!(
                path = %path.display(),
                waited_ms = MAX_LOCK_WAIT_MS,
                "Lock wait exhausted, proceeding without lock"
            );
            return Ok(None);
        }
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
        backoff_ms = (backoff_ms * 2).min(BACKOFF_CAP_MS);
    }
}

/// Exclusive create; `Ok(false)` means another holder exists.
async fn try_create(path: &Path) -> MaestroResult<bool> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let info = serde_json::to_vec(&LockInfo::current())?;
    let path = path.to_path_buf();
    let result = tokio::task::spawn_blocking(move || {
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(mut file) => {
                use std::io::Write;
                file.write_all(&info)?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e),
        }
    })
    .await
    .map_err(|e| std::io::Error::other(e.to_string()))??;
    Ok(result)
}

/// Remove a lock whose holder timestamp is older than the stale age.
/// A missing or unreadable lock file is treated as already released.
async fn remove_if_stale(path: &Path) {
    let Ok(data) = tokio::fs::read_to_string(path).await else {
        return;
    };
    let stale = match serde_json::from_str::<LockInfo>(&data) {
        Ok(info) => info.age_ms() > STALE_LOCK_AGE_MS,
        // Unparseable lock files count as stale.
        Err(_) => true,
    };
    if stale {
        warn!(path = %path.display(), "Removing stale lock");
        let _ = tokio::fs::remove_file(path).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.lock");

        let guard = acquire(&path).await.unwrap();
        assert!(guard.is_some());
        assert!(path.exists());

        drop(guard);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_lock_info_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.lock");

        let _guard = acquire(&path).await.unwrap();
        let info: LockInfo =
            serde_json::from_str(&tokio::fs::read_to_string(&path).await.unwrap()).unwrap();
        assert_eq!(info.pid, std::process::id());
    }

    #[tokio::test]
    async fn test_stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.lock");

        // A lock from a long-dead process.
        let stale = LockInfo {
            pid: 1,
            timestamp: Utc::now() - chrono::Duration::seconds(60),
            host: "ghost".into(),
        };
        tokio::fs::write(&path, serde_json::to_vec(&stale).unwrap())
            .await
            .unwrap();

        let guard = acquire(&path).await.unwrap();
        assert!(guard.is_some(), "stale lock must be broken");
    }

    #[tokio::test]
    async fn test_garbage_lock_counts_as_stale() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.lock");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let guard = acquire(&path).await.unwrap();
        assert!(guard.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_contended_lock_degrades() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.lock");

        // A fresh (non-stale) lock held by someone else. Auto-advanced
        // tokio time sleeps instantly while the wall-clock staleness check
        // keeps seeing a fresh holder.
        let _guard = acquire(&path).await.unwrap().unwrap();
        let second = acquire(&path).await.unwrap();
        assert!(second.is_none(), "contended acquire must degrade to None");
        assert!(path.exists(), "holder's lock must survive");
    }
}
