//! Tools and the tool execution substrate.
//!
//! A [`Tool`] is a named capability an agent can invoke with JSON
//! arguments. Around the trait live the substrate pieces:
//!
//! - [`cache`] — per-key result caching with TTL, LRU eviction, and
//!   dependency-aware invalidation;
//! - [`executor`] — bounded-parallel dispatch with retries, timeouts,
//!   and callbacks;
//! - [`graph`] — DAG scheduling of dependent tool calls in waves.

pub mod cache;
pub mod executor;
pub mod graph;

pub use cache::{CacheConfig, CacheStats, LruToolCache, ShardedToolCache, ToolCache, cache_key};
pub use executor::{ExecutorConfig, ToolExecutor, ToolInvocation};
pub use graph::{NodeStatus, ToolGraph, ToolNode};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::Result;
use crate::store::Store;

/// Arguments and contextual data for one tool invocation.
///
/// Argument ordering is irrelevant to semantics; cache keys canonicalize
/// by sorting keys.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolInput {
    /// Named arguments.
    #[serde(default)]
    pub args: HashMap<String, Value>,
    /// Contextual data threaded from the caller (not part of the cache key).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, Value>>,
}

impl ToolInput {
    /// Create an empty input.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach one argument.
    #[must_use]
    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    /// Attach one context entry, creating the map if needed.
    #[must_use]
    pub fn with_context_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Look up an argument.
    #[must_use]
    pub fn arg(&self, key: &str) -> Option<&Value> {
        self.args.get(key)
    }
}

/// The structured result of a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Result payload.
    pub result: Value,
    /// Whether the invocation succeeded.
    pub success: bool,
    /// Error text for failed invocations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Optional tool-specific metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, Value>>,
}

impl ToolOutput {
    /// A successful output.
    #[must_use]
    pub fn ok(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            success: true,
            error: None,
            metadata: None,
        }
    }

    /// A failed output.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            result: Value::Null,
            success: false,
            error: Some(error.into()),
            metadata: None,
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }
}

/// A named capability callable by agents.
///
/// Implementations are shared by reference across agents and must be safe
/// for concurrent invocation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique tool name.
    fn name(&self) -> &str;

    /// What the tool does and when to use it.
    fn description(&self) -> String;

    /// JSON schema for the tool's arguments.
    ///
    /// Defaults to a single required string argument named `input`.
    fn args_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "input": {
                    "type": "string",
                    "description": "The input for the tool"
                }
            },
            "required": ["input"]
        })
    }

    /// Execute the tool.
    async fn invoke(&self, ctx: &RunContext, input: ToolInput) -> Result<ToolOutput>;
}

/// A shared, thread-safe [`Tool`] trait object.
pub type SharedTool = Arc<dyn Tool>;

/// A collection of tools keyed by name.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: HashMap<String, SharedTool>,
}

impl std::fmt::Debug for ToolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSet")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a set from a list of tools. Later duplicates win.
    #[must_use]
    pub fn from_tools(tools: Vec<SharedTool>) -> Self {
        let mut set = Self::default();
        for tool in tools {
            set.add(tool);
        }
        set
    }

    /// Add a tool, replacing any previous tool of the same name.
    pub fn add(&mut self, tool: SharedTool) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Look up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SharedTool> {
        self.tools.get(name)
    }

    /// Whether a tool of this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Registered tool names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the set is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Runtime services available to tools during execution.
///
/// Currently carries the optional long-term [`Store`].
#[derive(Clone, Default)]
pub struct ToolRuntime {
    store: Option<Arc<dyn Store>>,
}

impl std::fmt::Debug for ToolRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRuntime")
            .field("store", &self.store.is_some())
            .finish()
    }
}

impl ToolRuntime {
    /// Create a runtime with no services.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a long-term store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// The long-term store, if one was attached.
    #[must_use]
    pub fn store(&self) -> Option<&Arc<dyn Store>> {
        self.store.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared tool doubles for substrate tests.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A tool that echoes its `input` argument and counts invocations.
    pub struct EchoTool {
        pub calls: AtomicUsize,
    }

    impl EchoTool {
        pub fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> String {
            "Echoes the input argument".to_string()
        }

        async fn invoke(&self, _ctx: &RunContext, input: ToolInput) -> Result<ToolOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let value = input.arg("input").cloned().unwrap_or(Value::Null);
            Ok(ToolOutput::ok(value))
        }
    }

    /// A tool that fails a fixed number of times before succeeding.
    pub struct FlakyTool {
        pub name: String,
        pub failures: AtomicUsize,
        pub message: String,
    }

    impl FlakyTool {
        pub fn new(name: &str, failures: usize, message: &str) -> Self {
            Self {
                name: name.to_string(),
                failures: AtomicUsize::new(failures),
                message: message.to_string(),
            }
        }
    }

    #[async_trait]
    impl Tool for FlakyTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> String {
            "Fails a configured number of times".to_string()
        }

        async fn invoke(&self, _ctx: &RunContext, _input: ToolInput) -> Result<ToolOutput> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                Err(crate::error::Error::new(
                    crate::error::ErrorCode::ToolExecution,
                    "flaky_tool",
                    "invoke",
                    self.message.clone(),
                ))
            } else {
                Ok(ToolOutput::ok("recovered"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_input_builder_accumulates_args() {
        let input = ToolInput::new()
            .with_arg("query", "rust")
            .with_arg("limit", 10)
            .with_context_value("trace_id", "abc");

        assert_eq!(input.arg("query").unwrap(), "rust");
        assert_eq!(input.arg("limit").unwrap(), 10);
        assert_eq!(input.context.as_ref().unwrap()["trace_id"], "abc");
    }

    #[test]
    fn tool_set_is_keyed_by_name() {
        let mut set = ToolSet::new();
        set.add(Arc::new(testing::EchoTool::new()));

        assert!(set.contains("echo"));
        assert!(!set.contains("other"));
        assert_eq!(set.names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn echo_tool_round_trip() {
        let tool = testing::EchoTool::new();
        let ctx = RunContext::new();

        let output = tool
            .invoke(&ctx, ToolInput::new().with_arg("input", "hello"))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.result, "hello");
    }
}
