//! Hooks that log every lifecycle event through `tracing`.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;
use crate::io::{AgentInput, AgentOutput};
use crate::llm::ChatResponse;
use crate::message::Message;
use crate::tool::{ToolInput, ToolOutput};

use super::hooks::Callbacks;

/// A [`Callbacks`] implementation that emits structured log events.
///
/// Starts and ends log at `info`, intermediate events at `debug`, and
/// failures at `warn`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingCallbacks;

#[async_trait]
impl Callbacks for TracingCallbacks {
    async fn on_start(&self, agent_name: &str, input: &AgentInput) {
        tracing::info!(agent = agent_name, task = %input.task, "agent started");
    }

    async fn on_end(&self, agent_name: &str, output: &AgentOutput) {
        tracing::info!(
            agent = agent_name,
            status = output.status.as_str(),
            latency_ms = output.latency.as_millis() as u64,
            "agent finished"
        );
    }

    async fn on_error(&self, component: &str, error: &Error) {
        tracing::warn!(component, code = error.code.as_str(), error = %error, "operation failed");
    }

    async fn on_agent_action(&self, agent_name: &str, action: &str, detail: &Value) {
        tracing::debug!(agent = agent_name, action, %detail, "agent action");
    }

    async fn on_llm_start(&self, agent_name: &str, messages: &[Message]) {
        tracing::debug!(agent = agent_name, messages = messages.len(), "llm call");
    }

    async fn on_llm_end(&self, agent_name: &str, response: &ChatResponse) {
        tracing::debug!(
            agent = agent_name,
            chars = response.content.len(),
            "llm response"
        );
    }

    async fn on_tool_start(&self, tool_name: &str, input: &ToolInput) {
        tracing::debug!(tool = tool_name, args = input.args.len(), "tool started");
    }

    async fn on_tool_end(&self, tool_name: &str, output: &ToolOutput) {
        tracing::debug!(tool = tool_name, success = output.success, "tool finished");
    }

    async fn on_cache_hit(&self, tool_name: &str, key: &str) {
        tracing::debug!(tool = tool_name, key, "tool cache hit");
    }

    async fn on_chain_start(&self, chain_name: &str) {
        tracing::debug!(chain = chain_name, "chain started");
    }

    async fn on_chain_end(&self, chain_name: &str) {
        tracing::debug!(chain = chain_name, "chain finished");
    }
}
