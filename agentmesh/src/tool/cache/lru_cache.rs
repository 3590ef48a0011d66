//! Single-lock cache backend.

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::tool::ToolOutput;

use super::{
    CacheConfig, CacheEntry, CacheStats, DependencyGraph, StatsCounters, ToolCache, VersionClock,
    tool_of_key,
};

/// A bounded LRU+TTL tool cache behind one mutex.
///
/// The simple backend: every operation takes the single lock for a short
/// window. Prefer [`ShardedToolCache`](super::ShardedToolCache) under
/// heavy concurrent load.
pub struct LruToolCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LruToolCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruToolCache")
            .field("len", &self.len())
            .field("closed", &self.inner.closed.load(Ordering::Relaxed))
            .finish()
    }
}

struct Inner {
    entries: Mutex<LruCache<String, CacheEntry>>,
    clock: VersionClock,
    deps: DependencyGraph,
    stats: StatsCounters,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl LruToolCache {
    /// Create a cache and start its background expiry sweeper.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1)).expect("capacity is nonzero");
        let inner = Arc::new(Inner {
            entries: Mutex::new(LruCache::new(capacity)),
            clock: VersionClock::default(),
            deps: DependencyGraph::default(),
            stats: StatsCounters::default(),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let sweeper = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(config.cleanup_interval);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    () = sweeper.cancel.cancelled() => break,
                    _ = ticker.tick() => sweeper.sweep_expired(),
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
}

impl Inner {
    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, CacheEntry>> {
        self.entries.lock().expect("cache lock poisoned")
    }

    /// Remove every entry belonging to one of `tools`.
    fn remove_tools(&self, tools: &HashSet<String>) -> usize {
        if tools.is_empty() {
            return 0;
        }
        let mut entries = self.lock();
        let keys: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| tools.contains(&entry.tool_name))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            entries.pop(key);
        }
        keys.len()
    }

    /// Two-phase expiry sweep: collect under one lock acquisition, remove
    /// under a second, so writers are never stalled for the full scan.
    fn sweep_expired(&self) {
        let now = Instant::now();
        let expired: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        if expired.is_empty() {
            return;
        }
        let mut entries = self.lock();
        for key in &expired {
            // Re-check: the entry may have been refreshed between phases.
            if entries.peek(key).is_some_and(|e| e.is_expired(now)) {
                entries.pop(key);
            }
        }
    }
}

impl ToolCache for LruToolCache {
    fn get(&self, key: &str) -> Option<ToolOutput> {
        let tool = tool_of_key(key);
        let mut entries = self.inner.lock();
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
        let mut entries = self.inner.lock();
        let at_capacity = entries.len() == entries.cap().get() && !entries.contains(key);
        if let Some((evicted_key, _)) = entries.push(key.to_string(), entry)
            && at_capacity
            && evicted_key != key
        {
            self.inner.stats.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn delete(&self, key: &str) -> bool {
        self.inner.lock().pop(key).is_some()
    }

    fn clear(&self) {
        self.inner.lock().clear();
    }

    fn len(&self) -> usize {
        self.inner.lock().len()
    }

    fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize> {
        let regex = Regex::new(pattern).map_err(|e| {
            Error::invalid_input(
                "tool_cache",
                "invalidate_by_pattern",
                format!("invalid pattern {pattern:?}: {e}"),
            )
        })?;

        let (mut removed, touched) = {
            let mut entries = self.inner.lock();
            let matches: Vec<(String, String)> = entries
                .iter()
                .filter(|(key, _)| regex.is_match(key))
                .map(|(key, entry)| (key.clone(), entry.tool_name.clone()))
                .collect();
            for (key, _) in &matches {
                entries.pop(key);
            }
            let touched: Vec<String> = matches
                .iter()
                .map(|(_, tool)| tool.clone())
                .collect::<HashSet<_>>()
                .into_iter()
                .collect();
            (matches.len(), touched)
        };

        let dependents = self.inner.deps.dependents_of(&touched);
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

impl Drop for LruToolCache {
    fn drop(&mut self) {
        self.close();
    }
}
