//! # TTL cache with hit/miss/eviction counters.
//!
//! [`CacheManager`] is a flat associative store: key → payload with a
//! per-entry deadline. It backs the cache-aside read path of the
//! orchestrator and bounds staleness via TTLs.
//!
//! ## Rules
//! - A read never returns a value whose deadline has passed: the entry is
//!   evicted lazily and the read counts as **both** a miss and an eviction.
//! - `put` with an existing key replaces the entry (and its deadline).
//! - A background sweep (the supervised [`Child`] loop) scans every
//!   `cache_sweep_period` and drops expired entries, bounding memory growth
//!   from abandoned keys that are never re-read.
//! - No key enumeration or range operations; this is not a general store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CacheError, ChildError};
use crate::fetcher::Payload;
use crate::tree::Child;

/// One cached value with its expiry deadline.
struct CacheEntry {
    value: Payload,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// Counter snapshot returned by [`CacheManager::stats`].
#[derive(Clone, Debug, PartialEq)]
pub struct CacheStats {
    /// Reads that returned a live value.
    pub hits: u64,
    /// Reads that found nothing usable (absent or expired).
    pub misses: u64,
    /// Entries removed because their TTL passed (lazy or sweep).
    pub evictions: u64,
    /// `hits / (hits + misses)`, or 0.0 before the first read.
    pub hit_rate: f64,
}

/// Key→payload TTL cache.
pub struct CacheManager {
    entries: RwLock<HashMap<String, CacheEntry>>,
    default_ttl: Duration,
    sweep_period: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheManager {
    /// Creates an empty cache with the given default TTL and sweep period.
    pub fn new(default_ttl: Duration, sweep_period: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            default_ttl,
            sweep_period,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Looks up `key`.
    ///
    /// An expired entry is removed on the spot and reported as
    /// [`CacheError::Expired`]; it counts as a miss **and** an eviction.
    pub async fn get(&self, key: &str) -> Result<Payload, CacheError> {
        let now = Instant::now();

        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if !entry.is_expired(now) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(entry.value.clone());
                }
                Some(_) => {}
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Err(CacheError::NotFound);
                }
            }
        }

        // Expired: upgrade to a write lock and evict, re-checking under the
        // lock since another reader may have raced us here.
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.remove(key);
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::Expired)
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(entry.value.clone())
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Err(CacheError::NotFound)
            }
        }
    }

    /// Stores `value` under `key`; `ttl = None` uses the default TTL.
    pub async fn put(&self, key: impl Into<String>, value: Payload, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        self.entries.write().await.insert(key.into(), entry);
    }

    /// Removes `key` if present. Not counted as an eviction: deletes are
    /// invalidation, evictions are TTL expiry.
    pub async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }

    /// Removes every entry.
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Returns a counter snapshot.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// Drops every expired entry and bumps the eviction counter by the
    /// removed count. Called by the sweep loop.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - entries.len();
        if removed > 0 {
            self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed, "cache sweep evicted expired entries");
        }
        removed
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl Child for CacheManager {
    fn name(&self) -> &str {
        "cache"
    }

    async fn run(&self, token: CancellationToken) -> Result<(), ChildError> {
        let mut tick = tokio::time::interval(self.sweep_period);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick fires immediately; skip it so the sweep
        // cadence starts one full period after startup.
        tick.tick().await;

        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = tick.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache() -> CacheManager {
        CacheManager::new(Duration::from_secs(30), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn put_then_get_returns_value() {
        let c = cache();
        c.put("dashboard", json!({"companies": []}), None).await;
        let v = c.get("dashboard").await.expect("fresh entry");
        assert_eq!(v, json!({"companies": []}));
        assert_eq!(c.stats().hits, 1);
    }

    #[tokio::test]
    async fn absent_key_is_a_miss() {
        let c = cache();
        assert_eq!(c.get("nope").await, Err(CacheError::NotFound));
        let stats = c.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_evicted_and_counts_as_miss() {
        let c = cache();
        c.put("k", json!(1), Some(Duration::from_secs(5))).await;

        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(c.get("k").await, Err(CacheError::Expired));
        let stats = c.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.evictions, 1);
        // Entry is gone, second read is NotFound.
        assert_eq!(c.get("k").await, Err(CacheError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn put_replaces_entry_and_ttl() {
        let c = cache();
        c.put("k", json!(1), Some(Duration::from_secs(5))).await;
        tokio::time::advance(Duration::from_secs(4)).await;
        c.put("k", json!(2), Some(Duration::from_secs(5))).await;
        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(c.get("k").await.expect("replaced entry still live"), json!(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_expired_entries() {
        let c = cache();
        c.put("a", json!(1), Some(Duration::from_secs(5))).await;
        c.put("b", json!(2), Some(Duration::from_secs(120))).await;

        tokio::time::advance(Duration::from_secs(10)).await;

        let removed = c.sweep().await;
        assert_eq!(removed, 1);
        assert_eq!(c.len().await, 1);
        assert_eq!(c.stats().evictions, 1);
    }

    #[tokio::test]
    async fn hit_rate_is_zero_before_first_read() {
        let c = cache();
        assert_eq!(c.stats().hit_rate, 0.0);
    }

    #[tokio::test]
    async fn clear_empties_cache() {
        let c = cache();
        c.put("a", json!(1), None).await;
        c.put("b", json!(2), None).await;
        c.clear().await;
        assert_eq!(c.len().await, 0);
    }
}
