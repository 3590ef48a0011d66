//! Service registry with heartbeat-based health.
//!
//! Remote processes advertising agents register a [`ServiceInstance`] and
//! heartbeat periodically. A background sweeper marks instances unhealthy
//! once their last heartbeat ages past the health timeout.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorCode, Result};

/// One remote process advertising agents over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceInstance {
    /// Unique instance id.
    pub id: String,
    /// Logical service the instance belongs to.
    pub service_name: String,
    /// Base URL of the instance.
    pub endpoint: String,
    /// Agent names the instance advertises.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agents: Vec<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// When the instance was (last) registered.
    pub register_at: DateTime<Utc>,
    /// When the instance last heartbeat.
    pub last_seen: DateTime<Utc>,
    /// Whether the instance is considered healthy.
    pub healthy: bool,
}

impl ServiceInstance {
    /// Create a healthy instance stamped now.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        service_name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            agents: Vec::new(),
            metadata: HashMap::new(),
            register_at: now,
            last_seen: now,
            healthy: true,
        }
    }

    /// Attach advertised agent names.
    #[must_use]
    pub fn with_agents(mut self, agents: Vec<String>) -> Self {
        self.agents = agents;
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Configuration for a [`ServiceRegistry`].
#[derive(Debug, Clone, Copy)]
pub struct RegistryConfig {
    /// Interval between health sweeps.
    pub health_check_interval: Duration,
    /// Heartbeat age after which an instance is marked unhealthy.
    pub health_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(10),
            health_timeout: Duration::from_secs(30),
        }
    }
}

/// Per-service statistics.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Registered instances for the service.
    pub total: usize,
    /// Healthy instances for the service.
    pub healthy: usize,
}

/// Registry-wide statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStatistics {
    /// All registered instances.
    pub total_instances: usize,
    /// Healthy instances.
    pub healthy_instances: usize,
    /// Unhealthy instances.
    pub unhealthy_instances: usize,
    /// Breakdown per service.
    pub services: HashMap<String, ServiceStats>,
}

#[derive(Debug, Default)]
struct State {
    instances: HashMap<String, ServiceInstance>,
    services: HashMap<String, HashSet<String>>,
}

/// In-memory instance registry guarded by a reader-writer lock.
///
/// Heartbeats and registrations take the write lock; lookups take the
/// read lock. The health sweeper is lifecycle-managed through the
/// idempotent [`ServiceRegistry::close`].
#[derive(Debug)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<State>,
    config: RegistryConfig,
    closed: AtomicBool,
    cancel: CancellationToken,
}

impl ServiceRegistry {
    /// Create a registry and start its health sweeper.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        let inner = Arc::new(Inner {
            state: RwLock::new(State::default()),
            config,
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        });

        let sweeper = Arc::clone(&inner);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweeper.config.health_check_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = sweeper.cancel.cancelled() => break,
                    _ = ticker.tick() => sweeper.sweep(),
                }
            }
        });

        Self { inner }
    }

    /// Create a registry with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RegistryConfig::default())
    }

    /// Register an instance. A duplicate id updates the record in place
    /// and resets its registration time.
    pub fn register(&self, instance: ServiceInstance) -> Result<()> {
        if instance.id.is_empty() || instance.service_name.is_empty() || instance.endpoint.is_empty()
        {
            return Err(Error::invalid_input(
                "service_registry",
                "register",
                "id, service_name, and endpoint are required",
            ));
        }

        let mut instance = instance;
        let now = Utc::now();
        instance.register_at = now;
        instance.last_seen = now;
        instance.healthy = true;

        let mut guard = self.inner.state.write().expect("registry lock poisoned");
        let state = &mut *guard;
        if let Some(previous) = state.instances.get(&instance.id)
            && previous.service_name != instance.service_name
        {
            let previous_service = previous.service_name.clone();
            if let Some(index) = state.services.get_mut(&previous_service) {
                index.remove(&instance.id);
                if index.is_empty() {
                    state.services.remove(&previous_service);
                }
            }
        }
        state
            .services
            .entry(instance.service_name.clone())
            .or_default()
            .insert(instance.id.clone());
        state.instances.insert(instance.id.clone(), instance);
        Ok(())
    }

    /// Remove an instance from the instance map and service index.
    /// Returns whether it was present.
    pub fn deregister(&self, id: &str) -> bool {
        let mut state = self.inner.state.write().expect("registry lock poisoned");
        let Some(instance) = state.instances.remove(id) else {
            return false;
        };
        if let Some(index) = state.services.get_mut(&instance.service_name) {
            index.remove(id);
            if index.is_empty() {
                state.services.remove(&instance.service_name);
            }
        }
        true
    }

    /// Record a heartbeat: refresh `last_seen` and mark healthy.
    pub fn heartbeat(&self, id: &str) -> Result<()> {
        let mut state = self.inner.state.write().expect("registry lock poisoned");
        match state.instances.get_mut(id) {
            Some(instance) => {
                instance.last_seen = Utc::now();
                instance.healthy = true;
                Ok(())
            }
            None => Err(Error::new(
                ErrorCode::DistributedHeartbeat,
                "service_registry",
                "heartbeat",
                format!("unknown instance '{id}'"),
            )),
        }
    }

    /// Fetch one instance.
    #[must_use]
    pub fn get_instance(&self, id: &str) -> Option<ServiceInstance> {
        self.inner
            .state
            .read()
            .expect("registry lock poisoned")
            .instances
            .get(id)
            .cloned()
    }

    /// Healthy instances of a service, ordered by id.
    #[must_use]
    pub fn get_healthy_instances(&self, service: &str) -> Vec<ServiceInstance> {
        self.instances_of(service, true)
    }

    /// All instances of a service, ordered by id.
    #[must_use]
    pub fn get_all_instances(&self, service: &str) -> Vec<ServiceInstance> {
        self.instances_of(service, false)
    }

    fn instances_of(&self, service: &str, healthy_only: bool) -> Vec<ServiceInstance> {
        let state = self.inner.state.read().expect("registry lock poisoned");
        let Some(ids) = state.services.get(service) else {
            return Vec::new();
        };
        let mut instances: Vec<ServiceInstance> = ids
            .iter()
            .filter_map(|id| state.instances.get(id))
            .filter(|instance| !healthy_only || instance.healthy)
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }

    /// Registered service names, sorted.
    #[must_use]
    pub fn list_services(&self) -> Vec<String> {
        let state = self.inner.state.read().expect("registry lock poisoned");
        let mut services: Vec<String> = state.services.keys().cloned().collect();
        services.sort();
        services
    }

    /// Mark an instance healthy. Returns whether it exists.
    pub fn mark_healthy(&self, id: &str) -> bool {
        self.set_health(id, true)
    }

    /// Mark an instance unhealthy. Returns whether it exists.
    pub fn mark_unhealthy(&self, id: &str) -> bool {
        self.set_health(id, false)
    }

    fn set_health(&self, id: &str, healthy: bool) -> bool {
        let mut state = self.inner.state.write().expect("registry lock poisoned");
        match state.instances.get_mut(id) {
            Some(instance) => {
                instance.healthy = healthy;
                true
            }
            None => false,
        }
    }

    /// Snapshot totals per service and overall health counts.
    #[must_use]
    pub fn statistics(&self) -> RegistryStatistics {
        let state = self.inner.state.read().expect("registry lock poisoned");
        let mut stats = RegistryStatistics::default();
        for instance in state.instances.values() {
            stats.total_instances += 1;
            if instance.healthy {
                stats.healthy_instances += 1;
            } else {
                stats.unhealthy_instances += 1;
            }
            let entry = stats
                .services
                .entry(instance.service_name.clone())
                .or_default();
            entry.total += 1;
            if instance.healthy {
                entry.healthy += 1;
            }
        }
        stats
    }

    /// Stop the health sweeper. Idempotent.
    pub fn close(&self) {
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

impl Drop for ServiceRegistry {
    fn drop(&mut self) {
        self.close();
    }
}

impl Inner {
    /// Mark instances whose heartbeat aged past the timeout unhealthy.
    fn sweep(&self) {
        let timeout =
            chrono::Duration::from_std(self.config.health_timeout).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        let mut state = self.state.write().expect("registry lock poisoned");
        for instance in state.instances.values_mut() {
            if instance.healthy && now - instance.last_seen > timeout {
                tracing::debug!(
                    instance = %instance.id,
                    service = %instance.service_name,
                    "heartbeat timed out; marking unhealthy"
                );
                instance.healthy = false;
            }
        }
    }
}
