//! The agent abstraction.
//!
//! An agent is a named executable unit over [`AgentInput`] →
//! [`AgentOutput`]. Supervisors address sub-agents by name and consult
//! their [`AgentInfo`] when routing.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::Result;
use crate::io::{AgentInput, AgentOutput};

/// A named executable unit.
///
/// Implementations must be safe to invoke concurrently; agents own their
/// private state and share tools by reference.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique name of the agent.
    fn name(&self) -> &str;

    /// What the agent does. Used in routing catalogs and prompts.
    fn description(&self) -> &str;

    /// Capability tags consulted by capability-based routing.
    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Execute a task.
    async fn execute(&self, ctx: &RunContext, input: AgentInput) -> Result<AgentOutput>;
}

/// A shared, thread-safe [`Agent`] trait object.
pub type SharedAgent = Arc<dyn Agent>;

/// Catalog entry describing an agent for routing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Agent name.
    pub name: String,
    /// Agent description.
    pub description: String,
    /// Capability tags.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
}

impl AgentInfo {
    /// Create a catalog entry.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            capabilities: Vec::new(),
        }
    }

    /// Attach capability tags.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Build the entry from a live agent.
    #[must_use]
    pub fn from_agent(agent: &dyn Agent) -> Self {
        Self {
            name: agent.name().to_string(),
            description: agent.description().to_string(),
            capabilities: agent.capabilities(),
        }
    }
}

type AgentFn = dyn Fn(AgentInput) -> Pin<Box<dyn Future<Output = Result<AgentOutput>> + Send>>
    + Send
    + Sync;

/// An [`Agent`] backed by a closure.
///
/// Convenient for composing small agents and for tests.
pub struct FnAgent {
    name: String,
    description: String,
    capabilities: Vec<String>,
    f: Arc<AgentFn>,
}

impl FnAgent {
    /// Create an agent from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        F: Fn(AgentInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<AgentOutput>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            capabilities: Vec::new(),
            f: Arc::new(move |input| Box::pin(f(input))),
        }
    }

    /// Attach capability tags.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.capabilities = capabilities;
        self
    }
}

impl fmt::Debug for FnAgent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAgent")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn capabilities(&self) -> Vec<String> {
        self.capabilities.clone()
    }

    async fn execute(&self, _ctx: &RunContext, input: AgentInput) -> Result<AgentOutput> {
        (self.f)(input).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_agent_executes_the_closure() {
        let agent = FnAgent::new("echo", "echoes the task", |input: AgentInput| async move {
            Ok(AgentOutput::success(input.task))
        });

        let ctx = RunContext::new();
        let output = agent
            .execute(&ctx, AgentInput::new("hello"))
            .await
            .unwrap();
        assert_eq!(output.result, "hello");
    }

    #[tokio::test]
    async fn agent_info_reflects_the_agent() {
        let agent = FnAgent::new("search", "web search", |_| async {
            Ok(AgentOutput::success("ok"))
        })
        .with_capabilities(vec!["search".to_string(), "web".to_string()]);

        let info = AgentInfo::from_agent(&agent);
        assert_eq!(info.name, "search");
        assert_eq!(info.capabilities.len(), 2);
    }
}
