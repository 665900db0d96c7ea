//! Bounded TTL deduplication cache.
//!
//! Keyed by the canonical [`DedupKey`](crate::fingerprint::DedupKey) string.
//! Entries older than the window are lazily dropped on access and reaped
//! proactively by a janitor task every `window / 4`. Size is capped with LRU
//! eviction. Safe under parallel producers: the cache is sharded so unrelated
//! keys never serialize against each other.

use std::hash::{BuildHasher, Hasher};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

use crate::fingerprint::hash_prefix;

const SHARD_COUNT: usize = 16;

struct Shard {
    lru: Mutex<LruCache<String, Instant>>,
}

/// A bounded, sharded, TTL-based "have I seen this before" cache.
pub struct DedupCache {
    shards: Vec<Shard>,
    window: Duration,
}

impl DedupCache {
    /// `max_size` is the *total* capacity across all shards (divided evenly,
    /// rounded up so the true cap is never below the requested size).
    pub fn new(window: Duration, max_size: usize) -> Self {
        let per_shard = (max_size / SHARD_COUNT).max(1);
        let cap = NonZeroUsize::new(per_shard).expect("per-shard capacity is nonzero");
        let shards = (0..SHARD_COUNT)
            .map(|_| Shard {
                lru: Mutex::new(LruCache::new(cap)),
            })
            .collect();
        Self { shards, window }
    }

    fn shard_for(&self, key: &str) -> &Shard {
        let mut hasher = std::collections::hash_map::RandomState::new().build_hasher();
        hasher.write(key.as_bytes());
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Returns `true` iff no entry for `key` is within the window (i.e. this
    /// is a fresh event); in either case, records `key` as seen now.
    pub fn should_create(&self, key: &str) -> bool {
        let shard = self.shard_for(key);
        let mut lru = shard.lru.lock().expect("dedup shard lock poisoned");
        let now = Instant::now();
        let fresh = match lru.get(key) {
            Some(seen_at) if now.duration_since(*seen_at) < self.window => false,
            _ => true,
        };
        lru.put(key.to_owned(), now);
        fresh
    }

    /// Like [`Self::should_create`], but additionally treats identical
    /// `content` hashes within the window as duplicates even if `key` drifts
    /// (a field of the dedup key changed between otherwise-identical
    /// reports).
    pub fn should_create_with_content(&self, key: &str, content: &str) -> bool {
        let content_key = format!("content:{}", hash_prefix(content));
        let by_key = self.should_create(key);
        let by_content = self.should_create(&content_key);
        by_key && by_content
    }

    /// Proactively evict entries older than the window. Intended to be
    /// called from a janitor task every `window / 4`.
    pub fn reap_expired(&self) {
        let now = Instant::now();
        for shard in &self.shards {
            let mut lru = shard.lru.lock().expect("dedup shard lock poisoned");
            let stale: Vec<String> = lru
                .iter()
                .filter(|(_, seen_at)| now.duration_since(**seen_at) >= self.window)
                .map(|(k, _)| k.clone())
                .collect();
            for k in stale {
                lru.pop(&k);
            }
        }
    }

    /// Total number of live entries across all shards, for tests and
    /// diagnostics.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lru.lock().expect("dedup shard lock poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Concurrent variant is implicit: [`DedupCache`] is `Sync` because each
/// shard owns its own mutex and [`DashMap`] is not actually needed for the
/// sharded-Mutex design above; kept as a reexport point in case a caller
/// wants a flat concurrent map for a non-TTL use.
pub type SeenOnce = DashMap<String, ()>;

/// Throttles a repeated WARN to once per unique shape fingerprint, used by
/// adapters that otherwise log on every malformed document. A shape that
/// recurs within the TTL is skipped silently; after the TTL lapses a fresh
/// WARN is allowed again, so a long-lived noisy source does not permanently
/// silence itself.
pub struct MalformedDocThrottle {
    seen: DashMap<String, Instant>,
    ttl: Duration,
}

impl MalformedDocThrottle {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: DashMap::new(),
            ttl,
        }
    }

    /// Returns `true` the first time `fingerprint` is seen, or after it has
    /// not been seen for the TTL; `false` if it is a recent repeat. Callers
    /// should log their WARN only when this returns `true`.
    pub fn should_warn(&self, fingerprint: &str) -> bool {
        let now = Instant::now();
        match self.seen.get(fingerprint) {
            Some(seen_at) if now.duration_since(*seen_at) < self.ttl => false,
            _ => {
                self.seen.insert(fingerprint.to_owned(), now);
                true
            }
        }
    }
}

impl Default for MalformedDocThrottle {
    /// Five-minute throttle window, matching the dedup cache's own window
    /// default for a feature in the same "is this noise I've already seen"
    /// family.
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod malformed_throttle_tests {
    use super::*;

    #[test]
    fn first_occurrence_warns() {
        let throttle = MalformedDocThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_warn("shape-a"));
    }

    #[test]
    fn repeat_within_ttl_is_suppressed() {
        let throttle = MalformedDocThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_warn("shape-a"));
        assert!(!throttle.should_warn("shape-a"));
    }

    #[test]
    fn repeat_after_ttl_warns_again() {
        let throttle = MalformedDocThrottle::new(Duration::from_millis(20));
        assert!(throttle.should_warn("shape-a"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(throttle.should_warn("shape-a"));
    }

    #[test]
    fn distinct_shapes_each_warn_once() {
        let throttle = MalformedDocThrottle::new(Duration::from_secs(60));
        assert!(throttle.should_warn("shape-a"));
        assert!(throttle.should_warn("shape-b"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn first_arrival_is_fresh() {
        let cache = DedupCache::new(Duration::from_secs(60), 100);
        assert!(cache.should_create("a"));
    }

    #[test]
    fn repeat_within_window_is_duplicate() {
        let cache = DedupCache::new(Duration::from_secs(60), 100);
        assert!(cache.should_create("a"));
        assert!(!cache.should_create("a"));
    }

    #[test]
    fn repeat_after_window_is_fresh_again() {
        let cache = DedupCache::new(Duration::from_millis(20), 100);
        assert!(cache.should_create("a"));
        thread::sleep(Duration::from_millis(40));
        assert!(cache.should_create("a"));
    }

    #[test]
    fn content_hash_catches_drifted_key() {
        let cache = DedupCache::new(Duration::from_secs(60), 100);
        assert!(cache.should_create_with_content("key-a", "same payload"));
        assert!(!cache.should_create_with_content("key-b", "same payload"));
    }

    #[test]
    fn reap_expired_drops_stale_entries() {
        let cache = DedupCache::new(Duration::from_millis(10), 100);
        cache.should_create("a");
        thread::sleep(Duration::from_millis(30));
        cache.reap_expired();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn size_cap_evicts_lru() {
        let cache = DedupCache::new(Duration::from_secs(60), SHARD_COUNT);
        // One entry per shard capacity of 1: insert SHARD_COUNT * 4 distinct
        // keys and confirm the cache never grows past its cap.
        for i in 0..(SHARD_COUNT * 4) {
            cache.should_create(&format!("key-{i}"));
        }
        assert!(cache.len() <= SHARD_COUNT);
    }
}
