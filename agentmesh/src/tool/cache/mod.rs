//! Per-key tool result caching.
//!
//! Cache keys are `"<tool>:<hex(sha256(tool ‖ 0 ‖ canonical(args)))>"`
//! where the canonical form sorts map keys and emits type-tagged,
//! length-prefixed bytes — the one cross-implementation compatibility
//! requirement of the cache. Two backends implement [`ToolCache`]:
//! [`LruToolCache`] serializes access behind a single lock;
//! [`ShardedToolCache`] spreads keys over FNV-hashed shards.

mod lru_cache;
mod sharded;

pub use lru_cache::LruToolCache;
pub use sharded::ShardedToolCache;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{ToolInput, ToolOutput};
use crate::error::Result;

/// Derive the cache key for invoking `tool_name` with `input`.
///
/// Only `args` participate; caller context is excluded. Two inputs with
/// the same arguments in different insertion order produce the same key.
#[must_use]
pub fn cache_key(tool_name: &str, input: &ToolInput) -> String {
    let mut hasher = Sha256::new();
    hasher.update(tool_name.as_bytes());
    hasher.update([0u8]);
    hash_object(&mut hasher, &input.args);
    format!("{tool_name}:{:x}", hasher.finalize())
}

/// The tool name portion of a cache key (the prefix before the first `:`).
#[must_use]
pub(crate) fn tool_of_key(key: &str) -> &str {
    key.split_once(':').map_or(key, |(tool, _)| tool)
}

fn hash_object(hasher: &mut Sha256, map: &HashMap<String, Value>) {
    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    hasher.update([b'o']);
    hasher.update((keys.len() as u64).to_be_bytes());
    for key in keys {
        hasher.update((key.len() as u64).to_be_bytes());
        hasher.update(key.as_bytes());
        hash_value(hasher, &map[key]);
    }
}

fn hash_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => hasher.update([b'n']),
        Value::Bool(b) => {
            hasher.update([b'b', u8::from(*b)]);
        }
        Value::Number(n) => {
            // The display form distinguishes 1 from 1.0, keeping the tag
            // type-stable across runs.
            let repr = n.to_string();
            hasher.update([b'#']);
            hasher.update((repr.len() as u64).to_be_bytes());
            hasher.update(repr.as_bytes());
        }
        Value::String(s) => {
            hasher.update([b's']);
            hasher.update((s.len() as u64).to_be_bytes());
            hasher.update(s.as_bytes());
        }
        Value::Array(items) => {
            hasher.update([b'a']);
            hasher.update((items.len() as u64).to_be_bytes());
            for item in items {
                hash_value(hasher, item);
            }
        }
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            hasher.update([b'o']);
            hasher.update((keys.len() as u64).to_be_bytes());
            for key in keys {
                hasher.update((key.len() as u64).to_be_bytes());
                hasher.update(key.as_bytes());
                hash_value(hasher, &fields[key]);
            }
        }
    }
}

/// 32-bit FNV-1a, used to pick a shard for a key.
#[must_use]
pub(crate) fn fnv1a_32(data: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in data {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Configuration for a tool cache backend.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries across all shards.
    pub capacity: usize,
    /// Interval between background expiry sweeps.
    pub cleanup_interval: Duration,
    /// Shard count for [`ShardedToolCache`]; rounded up to a power of two.
    pub shard_count: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let cores = std::thread::available_parallelism().map_or(8, usize::from);
        Self {
            capacity: 1024,
            cleanup_interval: Duration::from_secs(60),
            shard_count: (4 * cores).max(32).next_power_of_two(),
        }
    }
}

/// A cached tool result.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry {
    pub tool_name: String,
    pub value: ToolOutput,
    pub expire_at: Instant,
    pub version: u64,
}

impl CacheEntry {
    pub(crate) fn is_expired(&self, now: Instant) -> bool {
        self.expire_at <= now
    }
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    /// Lookups that returned a live entry.
    pub hits: u64,
    /// Lookups that found nothing usable.
    pub misses: u64,
    /// Entries dropped from the LRU tail.
    pub evictions: u64,
    /// Entries removed by pattern or tool invalidation.
    pub invalidations: u64,
    /// Live entry count at snapshot time.
    pub size: usize,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or zero before any lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Atomic counters shared by both backends.
#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub invalidations: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn snapshot(&self, size: usize) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            size,
        }
    }
}

/// Version bookkeeping for invalidation.
///
/// Every `set` stamps the entry with the current global version. An
/// invalidation bumps the global version and records it against each
/// touched tool; a lookup treats an entry as logically absent when its
/// version predates its tool's last invalidation. This closes the race
/// where a write captured before an invalidation lands after it.
#[derive(Debug, Default)]
pub(crate) struct VersionClock {
    version: AtomicU64,
    tool_versions: Mutex<HashMap<String, u64>>,
}

impl VersionClock {
    pub(crate) fn current(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Bump the global version and record it for every tool in `tools`.
    pub(crate) fn invalidate_tools<'a>(&self, tools: impl IntoIterator<Item = &'a str>) {
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        let mut map = self.tool_versions.lock().expect("version map poisoned");
        for tool in tools {
            map.insert(tool.to_string(), version);
        }
    }

    /// Whether an entry stamped at `entry_version` for `tool` is stale.
    pub(crate) fn is_stale(&self, tool: &str, entry_version: u64) -> bool {
        let map = self.tool_versions.lock().expect("version map poisoned");
        map.get(tool).is_some_and(|&v| entry_version < v)
    }
}

/// Tool dependency adjacency: `depends_on → {dependents}`.
///
/// Invalidation cascades transitively through this graph. Traversal uses
/// a visited set, so an accidental cycle in user configuration terminates
/// rather than looping.
#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    dependents: Mutex<HashMap<String, HashSet<String>>>,
}

impl DependencyGraph {
    pub(crate) fn add(&self, dependent: &str, depends_on: &str) {
        let mut map = self.dependents.lock().expect("dependency map poisoned");
        map.entry(depends_on.to_string())
            .or_default()
            .insert(dependent.to_string());
    }

    pub(crate) fn remove(&self, dependent: &str, depends_on: &str) {
        let mut map = self.dependents.lock().expect("dependency map poisoned");
        if let Some(set) = map.get_mut(depends_on) {
            set.remove(dependent);
            if set.is_empty() {
                map.remove(depends_on);
            }
        }
    }

    /// All tools that transitively depend on any of `roots`, excluding
    /// the roots themselves.
    pub(crate) fn dependents_of(&self, roots: &[String]) -> Vec<String> {
        let map = self.dependents.lock().expect("dependency map poisoned");
        let mut visited: HashSet<&str> = roots.iter().map(String::as_str).collect();
        let mut queue: VecDeque<&str> = roots.iter().map(String::as_str).collect();
        let mut result = Vec::new();

        while let Some(tool) = queue.pop_front() {
            if let Some(dependents) = map.get(tool) {
                for dependent in dependents {
                    if visited.insert(dependent.as_str()) {
                        result.push(dependent.clone());
                        queue.push_back(dependent.as_str());
                    }
                }
            }
        }
        result
    }
}

/// The tool cache contract.
///
/// All operations are short lock-window synchronous calls; background
/// expiry runs in a lifecycle-managed task shut down by [`ToolCache::close`].
pub trait ToolCache: Send + Sync {
    /// Look up a key, promoting it to most-recently-used. Expired or
    /// version-stale entries are removed on sight.
    fn get(&self, key: &str) -> Option<ToolOutput>;

    /// Store a value under `key` for `ttl`, evicting the LRU tail if full.
    fn set(&self, key: &str, value: ToolOutput, ttl: Duration);

    /// Remove one key. Returns whether an entry was present.
    fn delete(&self, key: &str) -> bool;

    /// Remove every entry.
    fn clear(&self);

    /// Number of stored entries (expired entries count until swept).
    fn len(&self) -> usize;

    /// Whether the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry whose key matches `pattern` and cascade to
    /// tools depending on the touched tools. Returns the number of
    /// entries removed. A malformed pattern is an error.
    fn invalidate_by_pattern(&self, pattern: &str) -> Result<usize>;

    /// Remove every entry stored for `tool_name` and cascade to its
    /// transitive dependents. Returns the number of entries removed.
    fn invalidate_by_tool(&self, tool_name: &str) -> usize;

    /// Declare that `dependent`'s results derive from `depends_on`.
    fn add_dependency(&self, dependent: &str, depends_on: &str);

    /// Remove a previously declared dependency.
    fn remove_dependency(&self, dependent: &str, depends_on: &str);

    /// Snapshot the counters.
    fn stats(&self) -> CacheStats;

    /// Stop the background cleanup task. Idempotent.
    fn close(&self);
}
