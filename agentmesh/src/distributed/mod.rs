//! Distributed execution: registry, RPC client, and coordinator.
//!
//! Remote processes advertise agents through the [`ServiceRegistry`];
//! the [`RpcClient`] speaks the fixed HTTP+JSON agent protocol; the
//! [`Coordinator`] ties the two together with round-robin instance
//! selection, health marking, retry, and failover.

mod client;
mod coordinator;
mod registry;

pub use client::{AsyncPoll, RpcClient, RpcClientConfig};
pub use coordinator::{Coordinator, DistributedTask, DistributedTaskResult};
pub use registry::{
    RegistryConfig, RegistryStatistics, ServiceInstance, ServiceRegistry, ServiceStats,
};
