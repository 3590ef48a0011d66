#![cfg_attr(docsrs, feature(doc_cfg))]
//! Agentmesh is a Rust library for orchestrating LLM-driven agents: named
//! executable units that consume a task, optionally call tools, and emit a
//! structured result.
//!
//! The crate is organized around a small number of load-bearing pieces:
//!
//! - [`runnable`] — the uniform invoke/stream/batch contract shared by
//!   agents, tools, and composed chains, with middleware and callbacks.
//! - [`tool`] — the tool execution substrate: bounded-parallel dispatch,
//!   retries, per-key result caching with dependency-aware invalidation,
//!   and DAG scheduling of dependent tool calls.
//! - [`sot`] — a Skeleton-of-Thought planner/executor that turns an LLM
//!   plan into a dependency graph of points elaborated in parallel.
//! - [`supervisor`] — task decomposition, strategy-based routing to
//!   sub-agents, priority-staged execution, and result aggregation.
//! - [`distributed`] — service registry with heartbeat health, an HTTP RPC
//!   client, and a coordinator with retry and failover.
//! - [`planning`] — plan representation, refinement strategies, an
//!   optimizer, and validators.

// Core building blocks
pub mod context;
pub mod error;
pub mod io;
pub mod message;
pub mod retry;

// Execution contract
pub mod callback;
pub mod runnable;

// Agents and tools
pub mod agent;
pub mod llm;
pub mod tool;

// Orchestration
pub mod sot;
pub mod supervisor;

// Distributed execution
pub mod distributed;

// Planning and storage boundaries
pub mod planning;
pub mod store;

pub mod prelude;

// Re-export the types nearly every caller touches.
pub use context::RunContext;
pub use error::{Error, ErrorCode, Result};
pub use io::{AgentInput, AgentOutput, OutputStatus};
