//! Cross-process shared cache with file locking, TTL, and size-bounded
//! eviction.
//!
//! One JSON file (`skill-cache-shared.json`) is shared between processes;
//! an advisory lock sidecar (`skill-cache.lock`) serializes flushes. Each
//! process batches writes in a hot map and flushes at most every 5 s, so
//! the disk view is eventually consistent within that window.

/// The shared cache and its entries.
pub mod cache;
/// Exclusive-create advisory locking with stale recovery.
pub mod lock;

pub use cache::{CacheEntry, SharedCache, DEFAULT_TTL, FLUSH_DEBOUNCE, MAX_CACHE_MB};
pub use lock::{acquire, LockGuard, LockInfo, MAX_LOCK_WAIT_MS, STALE_LOCK_AGE_MS};
