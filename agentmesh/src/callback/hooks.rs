//! The lifecycle hook trait.
//!
//! Hooks are fire-and-forget: every method defaults to a no-op, returns
//! nothing, and is never allowed to affect the outcome of the operation
//! that fired it.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::io::{AgentInput, AgentOutput};
use crate::llm::ChatResponse;
use crate::message::Message;
use crate::tool::{ToolInput, ToolOutput};

/// Lifecycle hooks fired at every edge of agent execution.
///
/// Object-safe; register implementations through
/// [`CallbackSet`](super::CallbackSet).
#[async_trait]
pub trait Callbacks: Send + Sync {
    /// An agent run began.
    async fn on_start(&self, _agent_name: &str, _input: &AgentInput) {}

    /// An agent run produced its final output.
    async fn on_end(&self, _agent_name: &str, _output: &AgentOutput) {}

    /// An operation failed.
    async fn on_error(&self, _component: &str, _error: &Error) {}

    /// An agent took an intermediate action (routing, planning, delegation).
    async fn on_agent_action(&self, _agent_name: &str, _action: &str, _detail: &Value) {}

    /// An LLM call is about to be made.
    async fn on_llm_start(&self, _agent_name: &str, _messages: &[Message]) {}

    /// An LLM call returned.
    async fn on_llm_end(&self, _agent_name: &str, _response: &ChatResponse) {}

    /// A tool invocation is about to run.
    async fn on_tool_start(&self, _tool_name: &str, _input: &ToolInput) {}

    /// A tool invocation completed.
    async fn on_tool_end(&self, _tool_name: &str, _output: &ToolOutput) {}

    /// A cached result satisfied a tool invocation.
    async fn on_cache_hit(&self, _tool_name: &str, _key: &str) {}

    /// A composed chain began.
    async fn on_chain_start(&self, _chain_name: &str) {}

    /// A composed chain completed.
    async fn on_chain_end(&self, _chain_name: &str) {}
}
