//! Sharded cache backend.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

use lru::LruCache;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::tool::ToolOutput;

use super::{
    CacheConfig, CacheEntry, CacheStats, DependencyGraph, StatsCounters, ToolCache, VersionClock,
    fnv1a_32, tool_of_key,
};

/// A bounded LRU+TTL tool cache spread over independent shards.
///
/// Keys map to shards by FNV-1a over the key modulo the shard count (a
/// power of two, default `max(32, 4·cores)`). Point operations lock one
/// shard; invalidation and statistics visit all of them. The background
/// sweeper scans shards in parallel with a read-then-write two-phase pass
/// per shard to keep writer stalls short.
pub struct ShardedToolCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for ShardedToolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardedToolCache")
            .field("shards", &self.inner.shards.len())
            .field("len", &self.len())
            .finish()
    }
}

struct Inner {
    shards: Vec<RwLock<LruCache<String, CacheEntry>>>,
    mask: usize,
    clock: VersionClock,
    deps: DependencyGraph,
    stats: StatsCounters,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl ShardedToolCache {
    /// Create a cache and start its background expiry sweeper.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let shard_count = config.shard_count.max(1).next_power_of_two();
        let per_shard = (config.capacity / shard_count).max(1);
        let per_shard = NonZeroUsize::new(per_shard).expect("per-shard capacity is nonzero");

        let shards = (0..shard_count)
            .map(|_| RwLock::new(LruCache::new(per_shard)))
            .collect();
        let inner = Arc::new(Inner {
            shards,
            mask: shard_count - 1,
            clock: VersionClock::default(),
            deps: DependencyGraph::default(),
            stats: StatsCounters::default(),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let sweeper = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.cleanup_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = sweeper.cancel.cancelled() => break,
                    _ = ticker.tick() => Inner::sweep_all(&sweeper).await,
                }
            }
        });

        Self { inner }
    }

    /// Create a cache with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(CacheConfig::default())
    }

    /// Number of shards (for diagnostics).
    #[must_use]
    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }
}

impl Inner {
    fn shard_for(&self, key: &str) -> &RwLock<LruCache<String, CacheEntry>> {
        &self.shards[fnv1a_32(key.as_bytes()) as usize & self.mask]
    }

    fn write(
        shard: &RwLock<LruCache<String, CacheEntry>>,
    ) -> RwLockWriteGuard<'_, LruCache<String, CacheEntry>> {
        shard.write().expect("shard lock poisoned")
    }

    /// Remove every entry belonging to one of `tools`, across all shards.
    fn remove_tools(&self, tools: &HashSet<String>) -> usize {
        if tools.is_empty() {
            return 0;
        }
        let mut removed = 0;
        for shard in &self.shards {
            let mut entries = Self::write(shard);
            let keys: Vec<String> = entries
                .iter()
                .filter(|(_, entry)| tools.contains(&entry.tool_name))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                entries.pop(key);
            }
            removed += keys.len();
        }
        removed
    }

    /// Sweep one shard: collect expired keys under the read lock, then
    /// remove them under the write lock.
    fn sweep_shard(&self, index: usize) {
        let now = Instant::now();
        let expired: Vec<String> = {
            let entries = self.shards[index].read().expect("shard lock poisoned");
            entries
                .iter()
                .filter(|(_, entry)| entry.is_expired(now))
                .map(|(key, _)| key.clone())
                .collect()
        };
        if expired.is_empty() {
            return;
        }
        let mut entries = Self::write(&self.shards[index]);
        for key in &expired {
            if entries.peek(key).is_some_and(|e| e.is_expired(now)) {
                entries.pop(key);
            }
        }
    }

    /// Scan all shards in parallel.
    async fn sweep_all(inner: &Arc<Self>) {
        let tasks: Vec<_> = (0..inner.shards.len())
            .map(|index| {
                let inner = Arc::clone(inner);
                tokio::spawn(async move { inner.sweep_shard(index) })
            })
            .collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl ToolCache for ShardedToolCache {
    fn get(&self, key: &str) -> Option<ToolOutput> {
        let tool = tool_of_key(key);
        let mut entries = Inner::write(self.inner.shard_for(key));
        let stale = match entries.get(key) {
            Some(entry) => {
                if entry.is_expired(Instant::now())
                    || self.inner.clock.is_stale(tool, entry.version)
                {
                    true
                } else {
                    let value = entry.value.clone();
                    self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
            }
            None => false,
        };
        if stale {
            entries.pop(key);
        }
        self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn set(&self, key: &str, value: ToolOutput, ttl: Duration) {
        let entry = CacheEntry {
            tool_name: tool_of_key(key).to_string(),
            value,
            expire_at: Instant::now() + ttl,
            version: self.inner.clock.current(),
        };
        let mut entries = Inner::write(self.inner.shard_for(key));
        let at_capacity = entries.len() == entries.cap().get() && !entries.contains(key);
        if let Some((evicted_key, _)) = entries.push(key.to_string(), entry)
            && at_capacity
            && evicted_key != key
        {
            self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn delete(&self, key: &str) -> bool {
        Inner::write(self.inner.shard_for(key)).pop(key).is_some()
    }

    fn clear(&self) {
        for shard in &self.inner.shards {
            Inner::write(shard).clear();
        }
    }

    fn len(&self) -> usize {
        self.inner
            .shards
            .iter()
            .map(|shard| shard.read().expect("shard lock poisoned").len())
            .sum()
    }

    fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern).map_err(|e| {
            Error::invalid_input(
                "tool_cache",
                "invalidate_by_pattern",
                format!("invalid pattern {pattern:?}: {e}"),
            )
        })?;

        let mut removed = 0;
        let mut touched: HashSet<String> = HashSet::new();
        for shard in &self.inner.shards {
            let mut entries = Inner::write(shard);
            let matches: Vec<(String, String)> = entries
                .iter()
                .filter(|(key, _)| regex.is_match(key))
                .map(|(key, entry)| (key.clone(), entry.tool_name.clone()))
                .collect();
            for (key, tool) in matches {
                entries.pop(&key);
                touched.insert(tool);
                removed += 1;
            }
        }

        let touched_list: Vec<String> = touched.iter().cloned().collect();
        let dependents = self.inner.deps.dependents_of(&touched_list);
        removed += self
            .inner
            .remove_tools(&dependents.iter().cloned().collect());
        self.inner
            .clock
            .invalidate_tools(touched.iter().chain(&dependents).map(String::as_str));
        self.inner
            .stats
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    fn invalidate_by_tool(&self, tool_name: &str) -> usize {
        let roots = vec![tool_name.to_string()];
        let dependents = self.inner.deps.dependents_of(&roots);

        let targets: HashSet<String> = roots.iter().chain(&dependents).cloned().collect();
        let removed = self.inner.remove_tools(&targets);
        self.inner
            .clock
            .invalidate_tools(targets.iter().map(String::as_str));
        self.inner
            .stats
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn add_dependency(&self, dependent: &str, depends_on: &str) {
        self.inner.deps.add(dependent, depends_on);
    }

    fn remove_dependency(&self, dependent: &str, depends_on: &str) {
        self.inner.deps.remove(dependent, depends_on);
    }

    fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.len())
    }

    fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.inner.cancel.cancel();
        }
    }
}

impl Drop for ShardedToolCache {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{ToolInput, cache::cache_key};

    fn cache_with(capacity: usize, shards: usize) -> ShardedToolCache {
        ShardedToolCache::new(CacheConfig {
            capacity,
            cleanup_interval: Duration::from_millis(20),
            shard_count: shards,
        })
    }

    #[tokio::test]
    async fn shard_count_rounds_up_to_a_power_of_two() {
        let cache = cache_with(1024, 33);
        assert_eq!(cache.shard_count(), 64);
    }

    #[tokio::test]
    async fn keys_are_stable_across_shards() {
        let cache = cache_with(1024, 8);
        for i in 0..100 {
            let key = cache_key("tool", &ToolInput::new().with_arg("i", i));
            cache.set(&key, ToolOutput::ok(i), Duration::from_secs(60));
        }
        assert_eq!(cache.len(), 100);

        for i in 0..100 {
            let key = cache_key("tool", &ToolInput::new().with_arg("i", i));
            assert_eq!(cache.get(&key).unwrap().result, i);
        }
        assert_eq!(cache.stats().hits, 100);
    }

    #[tokio::test]
    async fn global_invalidation_visits_all_shards() {
        let cache = cache_with(1024, 8);
        cache.add_dependency("report_generate", "data_process");
        cache.add_dependency("data_process", "data_fetch");

        for tool in ["data_fetch", "data_process", "report_generate"] {
            let key = cache_key(tool, &ToolInput::new().with_arg("id", 7));
            cache.set(&key, ToolOutput::ok(tool), Duration::from_secs(60));
        }

        assert_eq!(cache.invalidate_by_tool("data_fetch"), 3);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn pattern_invalidation_spans_shards() {
        let cache = cache_with(1024, 4);
        for i in 0..20 {
            cache.set(
                &format!("alpha:{i:02}"),
                ToolOutput::ok(i),
                Duration::from_secs(60),
            );
            cache.set(
                &format!("beta:{i:02}"),
                ToolOutput::ok(i),
                Duration::from_secs(60),
            );
        }

        let removed = cache.invalidate_by_pattern("^alpha:").unwrap();
        assert_eq!(removed, 20);
        assert_eq!(cache.len(), 20);
    }

    #[tokio::test]
    async fn background_sweeper_scans_every_shard() {
        let cache = cache_with(1024, 4);
        for i in 0..12 {
            cache.set(
                &format!("t:{i}"),
                ToolOutput::ok(i),
                Duration::from_millis(5),
            );
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn concurrent_access_stays_coherent() {
        let cache = Arc::new(cache_with(4096, 16));
        let mut handles = Vec::new();
        for task in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let key = format!("tool:{task}-{i}");
                    cache.set(&key, ToolOutput::ok(i), Duration::from_secs(60));
                    assert!(cache.get(&key).is_some());
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(cache.len(), 400);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let cache = cache_with(64, 4);
        cache.close();
        cache.close();
    }
}
