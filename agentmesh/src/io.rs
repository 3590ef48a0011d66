//! Agent input and output types.
//!
//! [`AgentInput`] is immutable after construction; callers must not mutate
//! it after submission. [`AgentOutput`] carries the result together with
//! the reasoning trace, tool call records, and timing.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::message::Message;

/// Per-invocation overrides supplied by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvocationOptions {
    /// Upper bound for the whole invocation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Override for the retry budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    /// Free-form options forwarded to the agent.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

/// A task submitted to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentInput {
    /// The task description.
    pub task: String,
    /// Optional system-level instruction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,
    /// Contextual key/value data available to the agent and its tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<HashMap<String, Value>>,
    /// Prior conversation turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<Message>>,
    /// Per-invocation options.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<InvocationOptions>,
}

impl AgentInput {
    /// Create an input for `task`.
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            instruction: None,
            context: None,
            history: None,
            options: None,
        }
    }

    /// Attach a system-level instruction.
    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Attach a single context entry, creating the map if needed.
    #[must_use]
    pub fn with_context_value(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Attach conversation history.
    #[must_use]
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = Some(history);
        self
    }

    /// Attach invocation options.
    #[must_use]
    pub fn with_options(mut self, options: InvocationOptions) -> Self {
        self.options = Some(options);
        self
    }
}

/// Terminal status of an agent invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    /// Every subtask succeeded.
    Success,
    /// The invocation failed outright.
    Failed,
    /// Some subtasks succeeded; per-subtask failures are in
    /// `metadata["errors"]`.
    Partial,
}

impl OutputStatus {
    /// Get the string representation of the status.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }
}

/// One step of an agent's reasoning trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningStep {
    /// What the agent did.
    pub description: String,
    /// The step's outcome, when one was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ReasoningStep {
    /// Create a step with no recorded output.
    #[must_use]
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            output: None,
        }
    }

    /// Create a step with an output.
    #[must_use]
    pub fn with_output(description: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            output: Some(output.into()),
        }
    }
}

/// Record of one tool invocation made during an agent run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    /// Name of the invoked tool.
    pub tool_name: String,
    /// Arguments passed to the tool.
    pub args: HashMap<String, Value>,
    /// Whether the call succeeded.
    pub success: bool,
    /// Error text for failed calls.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the call.
    pub duration: Duration,
}

/// The structured result of an agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    /// Terminal status.
    pub status: OutputStatus,
    /// The result payload.
    pub result: Value,
    /// Optional human-readable summary or failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Reasoning trace, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasoning_steps: Vec<ReasoningStep>,
    /// Tool calls made during the run, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Free-form metadata (per-subtask errors, metrics, routing notes).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    /// Wall-clock duration of the invocation.
    #[serde(default)]
    pub latency: Duration,
    /// When the output was produced.
    pub timestamp: DateTime<Utc>,
}

impl AgentOutput {
    /// Create a successful output.
    #[must_use]
    pub fn success(result: impl Into<Value>) -> Self {
        Self {
            status: OutputStatus::Success,
            result: result.into(),
            message: None,
            reasoning_steps: Vec::new(),
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
            latency: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// Create a failed output.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: OutputStatus::Failed,
            result: Value::Null,
            message: Some(message.into()),
            reasoning_steps: Vec::new(),
            tool_calls: Vec::new(),
            metadata: HashMap::new(),
            latency: Duration::ZERO,
            timestamp: Utc::now(),
        }
    }

    /// Create a partial output; `errors` lands in `metadata["errors"]`.
    #[must_use]
    pub fn partial(result: impl Into<Value>, errors: Vec<String>) -> Self {
        let mut output = Self::success(result);
        output.status = OutputStatus::Partial;
        output
            .metadata
            .insert("errors".to_string(), Value::from(errors));
        output
    }

    /// Attach a summary message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Record the invocation latency.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}
