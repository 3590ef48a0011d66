//! Convenience re-exports of the commonly used surface.
//!
//! ```rust,ignore
//! use agentmesh::prelude::*;
//! ```

pub use crate::agent::{Agent, AgentInfo, FnAgent, SharedAgent};
pub use crate::callback::{CallbackSet, Callbacks, NoopCallbacks, TracingCallbacks};
pub use crate::context::RunContext;
pub use crate::distributed::{
    Coordinator, DistributedTask, DistributedTaskResult, RegistryConfig, RpcClient,
    RpcClientConfig, ServiceInstance, ServiceRegistry,
};
pub use crate::error::{Error, ErrorCode, Result};
pub use crate::io::{AgentInput, AgentOutput, InvocationOptions, OutputStatus, ReasoningStep};
pub use crate::llm::{ChatResponse, CompletionRequest, LlmClient, ScriptedLlm};
pub use crate::message::{Message, Role};
pub use crate::planning::{
    Plan, PlanOptimizer, PlanStep, PlanValidator, PlanningStrategy, ValidationReport,
};
pub use crate::retry::RetryPolicy;
pub use crate::runnable::{
    Middleware, MiddlewareChain, OutputChunk, Runnable, RunnableConfig, RunnableExt,
};
pub use crate::sot::{AggregationMode, SkeletonPoint, SotAgent, SotConfig};
pub use crate::store::{InMemoryStore, Store, StoreEntry, StoreFilter};
pub use crate::supervisor::{
    AggregationStrategy, Router, RoutingRule, Supervisor, SupervisorConfig, Task, TaskResult,
};
pub use crate::tool::{
    CacheConfig, ExecutorConfig, LruToolCache, ShardedToolCache, Tool, ToolCache, ToolExecutor,
    ToolGraph, ToolInput, ToolInvocation, ToolOutput, ToolRuntime, ToolSet,
};
