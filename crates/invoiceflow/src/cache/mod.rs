//! Content-addressed result cache.
//!
//! Entries are keyed by the SHA-256 of the bytes sent to the OCR engine plus
//! the auto-correct flag. Each entry carries its own TTL; the cache is also
//! bounded by a maximum entry count.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use moka::sync::Cache;
use moka::Expiry;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;

/// Default lifetime of a cached result.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Hex-encoded SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub content_hash: String,
    pub auto_correct: bool,
}

impl CacheKey {
    pub fn new(content_hash: impl Into<String>, auto_correct: bool) -> Self {
        Self {
            content_hash: content_hash.into(),
            auto_correct,
        }
    }

    pub fn for_bytes(bytes: &[u8], auto_correct: bool) -> Self {
        Self::new(content_hash(bytes), auto_correct)
    }
}

#[derive(Clone)]
struct Entry<V> {
    value: V,
    ttl: Duration,
}

struct PerEntryTtl;

impl<V> Expiry<CacheKey, Entry<V>> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Entry<V>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &CacheKey,
        value: &Entry<V>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Shared TTL cache. Cloning is cheap; clones share entries and counters.
#[derive(Clone)]
pub struct ContentCache<V: Clone + Send + Sync + 'static> {
    inner: Cache<CacheKey, Entry<V>>,
    counters: Arc<Counters>,
}

impl<V: Clone + Send + Sync + 'static> ContentCache<V> {
    pub fn new(max_entries: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_entries)
            .expire_after(PerEntryTtl)
            .build();
        Self {
            inner,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<V> {
        match self.inner.get(key) {
            Some(entry) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Stores `value`, replacing any previous entry for `key`.
    pub fn put(&self, key: CacheKey, value: V, ttl: Duration) {
        self.inner.insert(key, Entry { value, ttl });
    }

    pub fn clear(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    pub fn hits(&self) -> u64 {
        self.counters.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.counters.misses.load(Ordering::Relaxed)
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    /// Evicts expired entries now instead of waiting for the next write.
    pub fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks();
    }

    /// Periodically evicts expired entries. Abort the handle to stop.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                cache.run_pending_tasks();
                log::trace!("Cache sweep done, {} entries", cache.entry_count());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_stable() {
        let a = content_hash(b"invoice bytes");
        let b = content_hash(b"invoice bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, content_hash(b"other bytes"));
    }

    #[test]
    fn test_key_includes_auto_correct_flag() {
        let raw = CacheKey::for_bytes(b"x", false);
        let corrected = CacheKey::for_bytes(b"x", true);
        assert_ne!(raw, corrected);

        let cache = ContentCache::new(100);
        cache.put(corrected.clone(), "corrected".to_string(), DEFAULT_TTL);
        assert_eq!(cache.get(&raw), None);
        assert_eq!(cache.get(&corrected).as_deref(), Some("corrected"));
    }

    #[test]
    fn test_same_bytes_hit_same_entry() {
        let cache = ContentCache::new(100);
        cache.put(CacheKey::for_bytes(b"scan", false), 42u32, DEFAULT_TTL);

        assert_eq!(cache.get(&CacheKey::for_bytes(b"scan", false)), Some(42));
        assert_eq!(cache.get(&CacheKey::for_bytes(b"scan", false)), Some(42));
        assert_eq!(cache.hits(), 2);
        assert_eq!(cache.misses(), 0);
    }

    #[test]
    fn test_put_replaces_existing_entry() {
        let cache = ContentCache::new(100);
        let key = CacheKey::new("abc", false);
        cache.put(key.clone(), 1u32, DEFAULT_TTL);
        cache.put(key.clone(), 2u32, DEFAULT_TTL);
        cache.run_pending_tasks();
        assert_eq!(cache.get(&key), Some(2));
        assert_eq!(cache.entry_count(), 1);
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let cache = ContentCache::new(100);
        let key = CacheKey::new("short", false);
        cache.put(key.clone(), 1u32, Duration::from_millis(20));
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&key), None);
        assert_eq!(cache.misses(), 1);
    }

    #[test]
    fn test_clear_removes_everything() {
        let cache = ContentCache::new(100);
        cache.put(CacheKey::new("a", false), 1u32, DEFAULT_TTL);
        cache.put(CacheKey::new("b", true), 2u32, DEFAULT_TTL);
        cache.clear();
        assert_eq!(cache.entry_count(), 0);
        assert_eq!(cache.get(&CacheKey::new("a", false)), None);
    }

    #[tokio::test]
    async fn test_sweeper_can_be_aborted() {
        let cache: ContentCache<u32> = ContentCache::new(10);
        let handle = cache.spawn_sweeper(Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
        assert!(handle.await.unwrap_err().is_cancelled());
    }
}
