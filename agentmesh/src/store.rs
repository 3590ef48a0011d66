//! Long-term store boundary.
//!
//! The core delegates persistence to [`Store`] implementations; its own
//! state (cache, registry, router counters) is in-memory and rebuilt on
//! restart. Tools reach the store through
//! [`ToolRuntime`](crate::tool::ToolRuntime).

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::Result;

/// Filter for [`Store::search`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreFilter {
    /// Only return keys with this prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
    /// Maximum number of entries to return.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// One entry returned by [`Store::search`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEntry {
    /// Entry key.
    pub key: String,
    /// Stored value.
    pub value: Value,
}

/// Namespaced key/value persistence boundary.
#[async_trait]
pub trait Store: Send + Sync {
    /// Store `value` under `(namespace, key)`.
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()>;

    /// Fetch the value under `(namespace, key)`.
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>>;

    /// Remove the value under `(namespace, key)`. Returns whether a value
    /// was present.
    async fn delete(&self, namespace: &str, key: &str) -> Result<bool>;

    /// List entries in `namespace` matching `filter`, in key order.
    async fn search(&self, namespace: &str, filter: &StoreFilter) -> Result<Vec<StoreEntry>>;
}

/// In-memory reference [`Store`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    namespaces: RwLock<HashMap<String, BTreeMap<String, Value>>>,
}

impl InMemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put(&self, namespace: &str, key: &str, value: Value) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, namespace: &str, key: &str) -> Result<Option<Value>> {
        let namespaces = self.namespaces.read().await;
        Ok(namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<bool> {
        let mut namespaces = self.namespaces.write().await;
        Ok(namespaces
            .get_mut(namespace)
            .is_some_and(|ns| ns.remove(key).is_some()))
    }

    async fn search(&self, namespace: &str, filter: &StoreFilter) -> Result<Vec<StoreEntry>> {
        let namespaces = self.namespaces.read().await;
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut entries: Vec<StoreEntry> = ns
            .iter()
            .filter(|(key, _)| {
                filter
                    .key_prefix
                    .as_deref()
                    .is_none_or(|prefix| key.starts_with(prefix))
            })
            .map(|(key, value)| StoreEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();

        if let Some(limit) = filter.limit {
            entries.truncate(limit);
        }
        Ok(entries)
    }
}
