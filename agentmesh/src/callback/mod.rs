//! Lifecycle callbacks.
//!
//! [`Callbacks`] defines the hook surface; [`CallbackSet`] fans one event
//! out to every registered handler. Handler failures (including panics)
//! are logged and never fail the operation that fired the event.

mod hooks;
mod logging;
mod noop;

pub use hooks::Callbacks;
pub use logging::TracingCallbacks;
pub use noop::NoopCallbacks;

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use crate::error::Error;
use crate::io::{AgentInput, AgentOutput};
use crate::llm::ChatResponse;
use crate::message::Message;
use crate::tool::{ToolInput, ToolOutput};

/// A shared, thread-safe [`Callbacks`] trait object.
pub type SharedCallbacks = Arc<dyn Callbacks>;

/// An ordered collection of callback handlers.
///
/// Cloning is cheap; handlers are shared. Every dispatch method awaits
/// each handler in registration order and isolates panics.
#[derive(Clone, Default)]
pub struct CallbackSet {
    handlers: Vec<SharedCallbacks>,
}

impl std::fmt::Debug for CallbackSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackSet")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

impl CallbackSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler, returning the extended set.
    #[must_use]
    pub fn with(mut self, handler: SharedCallbacks) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Append a handler in place.
    pub fn push(&mut self, handler: SharedCallbacks) {
        self.handlers.push(handler);
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    async fn guard<F: Future<Output = ()>>(hook: &'static str, fut: F) {
        if std::panic::AssertUnwindSafe(fut)
            .catch_unwind()
            .await
            .is_err()
        {
            tracing::warn!(hook, "callback handler panicked; ignoring");
        }
    }

    /// Dispatch `on_start`.
    pub async fn start(&self, agent_name: &str, input: &AgentInput) {
        for handler in &self.handlers {
            Self::guard("on_start", handler.on_start(agent_name, input)).await;
        }
    }

    /// Dispatch `on_end`.
    pub async fn end(&self, agent_name: &str, output: &AgentOutput) {
        for handler in &self.handlers {
            Self::guard("on_end", handler.on_end(agent_name, output)).await;
        }
    }

    /// Dispatch `on_error`.
    pub async fn error(&self, component: &str, error: &Error) {
        for handler in &self.handlers {
            Self::guard("on_error", handler.on_error(component, error)).await;
        }
    }

    /// Dispatch `on_agent_action`.
    pub async fn agent_action(&self, agent_name: &str, action: &str, detail: &Value) {
        for handler in &self.handlers {
            Self::guard(
                "on_agent_action",
                handler.on_agent_action(agent_name, action, detail),
            )
            .await;
        }
    }

    /// Dispatch `on_llm_start`.
    pub async fn llm_start(&self, agent_name: &str, messages: &[Message]) {
        for handler in &self.handlers {
            Self::guard("on_llm_start", handler.on_llm_start(agent_name, messages)).await;
        }
    }

    /// Dispatch `on_llm_end`.
    pub async fn llm_end(&self, agent_name: &str, response: &ChatResponse) {
        for handler in &self.handlers {
            Self::guard("on_llm_end", handler.on_llm_end(agent_name, response)).await;
        }
    }

    /// Dispatch `on_tool_start`.
    pub async fn tool_start(&self, tool_name: &str, input: &ToolInput) {
        for handler in &self.handlers {
            Self::guard("on_tool_start", handler.on_tool_start(tool_name, input)).await;
        }
    }

    /// Dispatch `on_tool_end`.
    pub async fn tool_end(&self, tool_name: &str, output: &ToolOutput) {
        for handler in &self.handlers {
            Self::guard("on_tool_end", handler.on_tool_end(tool_name, output)).await;
        }
    }

    /// Dispatch `on_cache_hit`.
    pub async fn cache_hit(&self, tool_name: &str, key: &str) {
        for handler in &self.handlers {
            Self::guard("on_cache_hit", handler.on_cache_hit(tool_name, key)).await;
        }
    }

    /// Dispatch `on_chain_start`.
    pub async fn chain_start(&self, chain_name: &str) {
        for handler in &self.handlers {
            Self::guard("on_chain_start", handler.on_chain_start(chain_name)).await;
        }
    }

    /// Dispatch `on_chain_end`.
    pub async fn chain_end(&self, chain_name: &str) {
        for handler in &self.handlers {
            Self::guard("on_chain_end", handler.on_chain_end(chain_name)).await;
        }
    }
}
