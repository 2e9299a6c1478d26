use crate::lock;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use maestro_core::MaestroResult;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Total size bound for the shared cache file.
pub const MAX_CACHE_MB: f64 = 50.0;
/// Default entry TTL.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
/// Minimum interval between disk flushes.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_secs(5);

const CACHE_FILE: &str = "skill-cache-shared.json";
const LOCK_FILE: &str = "skill-cache.lock";

/// One cached entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content: String,
    #[serde(rename = "expiresAt")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "sizeMB")]
    pub size_mb: f64,
    pub hash: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl CacheEntry {
    fn new(content: String, ttl: Duration) -> Self {
        let size_mb = content.len() as f64 / (1024.0 * 1024.0);
        let hash = format!("{:016x}", fnv1a(content.as_bytes()));
        Self {
            content,
            expires_at: Utc::now()
                + ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::minutes(30)),
            size_mb,
            hash,
            created_at: Utc::now(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

// Cheap non-cryptographic content fingerprint; collisions only cost a
// redundant rewrite.
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    entries: HashMap<String, CacheEntry>,
    #[serde(default, rename = "lastModified")]
    last_modified: Option<DateTime<Utc>>,
}

struct HotState {
    entries: HashMap<String, CacheEntry>,
    dirty: bool,
    last_flush: Option<Instant>,
}

/// Cross-process shared cache for expensive skill content.
///
/// Backed by a single JSON file plus an advisory lock sidecar. Writes land
/// in an in-process hot map and are flushed atomically at most every 5 s;
/// `get` prefers the hot map and falls back to disk, so cross-process
/// visibility is eventually consistent within the debounce window.
pub struct SharedCache {
    cache_path: PathBuf,
    lock_path: PathBuf,
    ttl: Duration,
    hot: Mutex<HotState>,
}

impl SharedCache {
    pub fn new(dir: &Path) -> Self {
        Self::with_ttl(dir, DEFAULT_TTL)
    }

    pub fn with_ttl(dir: &Path, ttl: Duration) -> Self {
        Self {
            cache_path: dir.join(CACHE_FILE),
            lock_path: dir.join(LOCK_FILE),
            ttl,
            hot: Mutex::new(HotState {
                entries: HashMap::new(),
                dirty: false,
                last_flush: None,
            }),
        }
    }

    /// Look up a key: hot map first, then disk. Expired entries miss.
    pub async fn get(&self, key: &str) -> MaestroResult<Option<String>> {
        {
            let hot = self.hot.lock();
            if let Some(entry) = hot.entries.get(key) {
                if entry.is_expired() {
                    return Ok(None);
                }
                return Ok(Some(entry.content.clone()));
            }
        }

        let disk = self.read_disk().await?;
        Ok(disk
            .entries
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| e.content.clone()))
    }

    /// Insert one entry with the default TTL.
    pub async fn set(&self, key: impl Into<String>, content: impl Into<String>) -> MaestroResult<()> {
        self.set_batch(vec![(key.into(), content.into())]).await
    }

    /// Insert several entries under one debounced flush; batching
    /// amortizes the file lock.
    pub async fn set_batch(&self, items: Vec<(String, String)>) -> MaestroResult<()> {
        let flush_due = {
            let mut hot = self.hot.lock();
            for (key, content) in items {
                hot.entries.insert(key, CacheEntry::new(content, self.ttl));
            }
            evict_to_fit(&mut hot.entries, 0.0);
            hot.dirty = true;
            hot.last_flush
                .map_or(true, |t| t.elapsed() >= FLUSH_DEBOUNCE)
        };

        if flush_due {
            self.flush().await?;
        }
        Ok(())
    }

    /// Load still-valid disk entries for `keys` into the hot map.
    pub async fn prewarm(&self, keys: &[String]) -> MaestroResult<usize> {
        let disk = self.read_disk().await?;
        let mut warmed = 0;
        let mut hot = self.hot.lock();
        for key in keys {
            if hot.entries.contains_key(key) {
                continue;
            }
            if let Some(entry) = disk.entries.get(key) {
                if !entry.is_expired() {
                    hot.entries.insert(key.clone(), entry.clone());
                    warmed += 1;
                }
            }
        }
        debug!(requested = keys.len(), warmed = warmed, "Cache pre-warm");
        Ok(warmed)
    }

    /// Drop expired entries from the hot map and disk. Returns the number
    /// of entries removed from the merged view.
    pub async fn cleanup(&self) -> MaestroResult<usize> {
        {
            let mut hot = self.hot.lock();
            hot.entries.retain(|_, e| !e.is_expired());
            hot.dirty = true;
        }
        let before = self.read_disk().await?.entries.len();
        self.flush().await?;
        let after = self.read_disk().await?.entries.len();
        Ok(before.saturating_sub(after))
    }

    /// Merge the hot map into the disk file under the advisory lock,
    /// evict to the size bound, and write atomically. Runs lock-free after
    /// the bounded wait.
    pub async fn flush(&self) -> MaestroResult<()> {
        let guard = lock::acquire(&self.lock_path).await?;
        if guard.is_none() {
            warn!("Flushing shared cache without lock");
        }

        let mut disk = self.read_disk().await?;
        {
            let mut hot = self.hot.lock();
            // Hot entries are authoritative within this process.
            for (key, entry) in &hot.entries {
                disk.entries.insert(key.clone(), entry.clone());
            }
            hot.dirty = false;
            hot.last_flush = Some(Instant::now());
        }

        disk.entries.retain(|_, e| !e.is_expired());
        evict_to_fit(&mut disk.entries, 0.0);
        disk.last_modified = Some(Utc::now());

        self.write_disk(&disk).await?;
        debug!(entries = disk.entries.len(), "Shared cache flushed");
        Ok(())
    }

    /// Current total size of the merged view in MB.
    pub async fn total_size_mb(&self) -> MaestroResult<f64> {
        let disk = self.read_disk().await?;
        let hot = self.hot.lock();
        let mut merged: HashMap<&str, f64> = HashMap::new();
        for (k, e) in &disk.entries {
            merged.insert(k.as_str(), e.size_mb);
        }
        for (k, e) in &hot.entries {
            merged.insert(k.as_str(), e.size_mb);
        }
        Ok(merged.values().sum())
    }

    async fn read_disk(&self) -> MaestroResult<CacheFile> {
        match tokio::fs::read_to_string(&self.cache_path).await {
            Ok(data) => match serde_json::from_str(&data) {
                Ok(file) => Ok(file),
                Err(e) => {
                    warn!(error = %e, "Shared cache file unreadable, starting empty");
                    Ok(CacheFile::default())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(CacheFile::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_disk(&self, file: &CacheFile) -> MaestroResult<()> {
        if let Some(parent) = self.cache_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let suffix: u32 = rand::thread_rng().gen();
        let tmp = self.cache_path.with_extension(format!("tmp-{suffix:08x}"));
        tokio::fs::write(&tmp, serde_json::to_vec(file)?).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.cache_path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }
}

/// Evict oldest-first by `created_at` until `incoming_mb` more fits under
/// the bound.
fn evict_to_fit(entries: &mut HashMap<String, CacheEntry>, incoming_mb: f64) {
    let mut used: f64 = entries.values().map(|e| e.size_mb).sum();
    if used + incoming_mb <= MAX_CACHE_MB {
        return;
    }

    let mut by_age: Vec<(String, DateTime<Utc>, f64)> = entries
        .iter()
        .map(|(k, e)| (k.clone(), e.created_at, e.size_mb))
        .collect();
    by_age.sort_by_key(|(_, created, _)| *created);

    for (key, _, size) in by_age {
        if used + incoming_mb <= MAX_CACHE_MB {
            break;
        }
        entries.remove(&key);
        used -= size;
        info!(key = %key, "Evicted cache entry (size bound)");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(dir.path());

        cache.set("skill:deploy", "checklist body").await.unwrap();
        assert_eq!(
            cache.get("skill:deploy").await.unwrap().as_deref(),
            Some("checklist body")
        );
        assert!(cache.get("skill:other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_disk_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = SharedCache::new(dir.path());
            cache.set("k", "v").await.unwrap();
            cache.flush().await.unwrap();
        }
        // A second process sees the flushed entry.
        let other = SharedCache::new(dir.path());
        assert_eq!(other.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedCache::with_ttl(dir.path(), Duration::from_millis(0));
        cache.set("k", "v").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eviction_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(dir.path());

        // Three ~20 MB entries exceed the 50 MB bound; the oldest goes.
        let body = "x".repeat(20 * 1024 * 1024);
        let mut hot = cache.hot.lock();
        for (i, key) in ["old", "mid", "new"].iter().enumerate() {
            let mut entry = CacheEntry::new(body.clone(), DEFAULT_TTL);
            entry.created_at = Utc::now() - ChronoDuration::minutes(10 - i as i64);
            hot.entries.insert((*key).to_string(), entry);
        }
        evict_to_fit(&mut hot.entries, 0.0);
        assert!(!hot.entries.contains_key("old"));
        assert!(hot.entries.contains_key("mid"));
        assert!(hot.entries.contains_key("new"));
    }

    #[tokio::test]
    async fn test_size_bound_after_flush() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(dir.path());

        let body = "y".repeat(15 * 1024 * 1024);
        for i in 0..5 {
            cache.set(format!("big-{i}"), body.clone()).await.unwrap();
        }
        cache.flush().await.unwrap();
        assert!(cache.total_size_mb().await.unwrap() <= MAX_CACHE_MB);
    }

    #[tokio::test]
    async fn test_batch_set() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(dir.path());
        cache
            .set_batch(vec![
                ("a".into(), "1".into()),
                ("b".into(), "2".into()),
            ])
            .await
            .unwrap();
        assert_eq!(cache.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(cache.get("b").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_prewarm_loads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = SharedCache::new(dir.path());
            cache.set("warm-me", "content").await.unwrap();
            cache.flush().await.unwrap();
        }

        let cache = SharedCache::new(dir.path());
        let warmed = cache.prewarm(&["warm-me".into(), "ghost".into()]).await.unwrap();
        assert_eq!(warmed, 1);
        // Now served from the hot map even if the disk file disappears.
        tokio::fs::remove_file(dir.path().join(CACHE_FILE)).await.unwrap();
        assert_eq!(cache.get("warm-me").await.unwrap().as_deref(), Some("content"));
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SharedCache::with_ttl(dir.path(), Duration::from_millis(0));
        cache.set("dead", "x").await.unwrap();
        cache.flush().await.unwrap();

        let cache_long = SharedCache::new(dir.path());
        cache_long.set("alive", "y").await.unwrap();
        cache_long.cleanup().await.unwrap();

        assert!(cache_long.get("dead").await.unwrap().is_none());
        assert_eq!(cache_long.get("alive").await.unwrap().as_deref(), Some("y"));
    }

    #[tokio::test]
    async fn test_corrupt_cache_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(CACHE_FILE), b"{{{").await.unwrap();
        let cache = SharedCache::new(dir.path());
        assert!(cache.get("anything").await.unwrap().is_none());
        cache.set("k", "v").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_entry_wire_field_names() {
        let entry = CacheEntry::new("body".into(), DEFAULT_TTL);
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"expiresAt\""));
        assert!(json.contains("\"sizeMB\""));
        assert!(json.contains("\"createdAt\""));
    }
}
