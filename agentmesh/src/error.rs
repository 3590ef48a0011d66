//! Error types for the agentmesh framework.
//!
//! Every failure carries a stable [`ErrorCode`], the component and operation
//! it originated from, and a free-form context map for classification and
//! root-cause inspection. Lower-level causes are preserved through the
//! standard `source` chain.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error identifiers.
///
/// Codes are the machine-readable half of an [`Error`]; messages are the
/// descriptive half. Retry policies classify on the code, never the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum ErrorCode {
    /// Caller-supplied input failed validation.
    InvalidInput,
    /// Component configuration failed validation.
    InvalidConfig,
    /// An agent body failed during execution.
    AgentExecution,
    /// A tool invocation failed.
    ToolExecution,
    /// A middleware hook failed.
    MiddlewareExecution,
    /// A tool call exceeded its timeout.
    ToolTimeout,
    /// An LLM call exceeded its timeout.
    LlmTimeout,
    /// A stream produced no terminal chunk within its timeout.
    StreamTimeout,
    /// The surrounding context was cancelled or timed out.
    ContextTimeout,
    /// A remote instance could not be reached.
    DistributedConnection,
    /// A remote payload could not be encoded or decoded.
    DistributedSerialization,
    /// A heartbeat to the registry failed.
    DistributedHeartbeat,
    /// Coordination across instances failed.
    DistributedCoordination,
    /// The LLM provider rejected the call due to rate limiting.
    LlmRateLimit,
    /// All retry attempts for a tool call were exhausted.
    ToolRetryExhausted,
    /// Every routable agent is at capacity.
    RouterAtCapacity,
    /// Persisted state could not be loaded.
    StateLoad,
    /// State could not be saved.
    StateSave,
    /// State failed validation.
    StateValidation,
    /// A checkpoint operation failed.
    StateCheckpoint,
    /// An unexpected internal failure.
    Internal,
    /// The operation is not implemented.
    NotImplemented,
}

impl ErrorCode {
    /// Returns the stable string identifier for this code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::InvalidConfig => "invalid_config",
            Self::AgentExecution => "agent_execution",
            Self::ToolExecution => "tool_execution",
            Self::MiddlewareExecution => "middleware_execution",
            Self::ToolTimeout => "tool_timeout",
            Self::LlmTimeout => "llm_timeout",
            Self::StreamTimeout => "stream_timeout",
            Self::ContextTimeout => "context_timeout",
            Self::DistributedConnection => "distributed_connection",
            Self::DistributedSerialization => "distributed_serialization",
            Self::DistributedHeartbeat => "distributed_heartbeat",
            Self::DistributedCoordination => "distributed_coordination",
            Self::LlmRateLimit => "llm_rate_limit",
            Self::ToolRetryExhausted => "tool_retry_exhausted",
            Self::RouterAtCapacity => "router_at_capacity",
            Self::StateLoad => "state_load",
            Self::StateSave => "state_save",
            Self::StateValidation => "state_validation",
            Self::StateCheckpoint => "state_checkpoint",
            Self::Internal => "internal",
            Self::NotImplemented => "not_implemented",
        }
    }

    /// Whether errors with this code are worth retrying by default.
    ///
    /// Timeouts, connectivity failures, and rate limits are transient;
    /// validation, capacity, and state errors are not. A cancelled context
    /// is handled separately: retry loops check the context between
    /// attempts, so a `ContextTimeout` raised by cancellation is never
    /// retried in practice.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ToolTimeout
                | Self::LlmTimeout
                | Self::StreamTimeout
                | Self::ContextTimeout
                | Self::DistributedConnection
                | Self::DistributedSerialization
                | Self::DistributedHeartbeat
                | Self::DistributedCoordination
                | Self::LlmRateLimit
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The framework error type.
///
/// Wraps a lower-level cause (when there is one) with the code, component,
/// and operation needed to classify it, plus a context map for details such
/// as `retry_attempt`, `tool_name`, or `instance_id`.
#[derive(Debug, thiserror::Error)]
#[error("[{component}.{operation}] {code}: {message}")]
pub struct Error {
    /// Stable error code.
    pub code: ErrorCode,
    /// Component the error originated from (e.g. "tool_executor").
    pub component: String,
    /// Operation that failed (e.g. "execute").
    pub operation: String,
    /// Human-readable description.
    pub message: String,
    /// Structured context for classification and debugging.
    pub context: HashMap<String, Value>,
    /// The underlying cause, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl Error {
    /// Create a new error.
    #[must_use]
    pub fn new(
        code: ErrorCode,
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            component: component.into(),
            operation: operation.into(),
            message: message.into(),
            context: HashMap::new(),
            source: None,
        }
    }

    /// Attach a context entry.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Create a `context_timeout` error for a cancelled or expired context.
    #[must_use]
    pub fn cancelled(component: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ContextTimeout,
            component,
            operation,
            "context cancelled",
        )
    }

    /// Create an `internal` error.
    #[must_use]
    pub fn internal(
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCode::Internal, component, operation, message)
    }

    /// Create an `invalid_input` error.
    #[must_use]
    pub fn invalid_input(
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCode::InvalidInput, component, operation, message)
    }

    /// Create an `invalid_config` error.
    #[must_use]
    pub fn invalid_config(
        component: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(ErrorCode::InvalidConfig, component, operation, message)
    }

    /// Whether this error is worth retrying by default.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_component_operation_and_code() {
        let err = Error::new(
            ErrorCode::ToolExecution,
            "tool_executor",
            "execute",
            "search failed",
        );
        let text = err.to_string();
        assert!(text.contains("tool_executor.execute"));
        assert!(text.contains("tool_execution"));
        assert!(text.contains("search failed"));
    }

    #[test]
    fn source_chain_is_preserved() {
        let cause = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::new(
            ErrorCode::DistributedConnection,
            "rpc_client",
            "execute_agent",
            "POST failed",
        )
        .with_source(cause);

        let source = std::error::Error::source(&err).expect("source should be set");
        assert!(source.to_string().contains("refused"));
    }

    #[test]
    fn context_entries_accumulate() {
        let err = Error::new(ErrorCode::ToolRetryExhausted, "tool_executor", "execute", "no luck")
            .with_context("retry_attempt", 3)
            .with_context("max_attempts", 3)
            .with_context("tool_name", "search");

        assert_eq!(err.context.len(), 3);
        assert_eq!(err.context["retry_attempt"], 3);
    }

    #[test]
    fn retryability_follows_the_code() {
        assert!(ErrorCode::ToolTimeout.is_retryable());
        assert!(ErrorCode::DistributedConnection.is_retryable());
        assert!(ErrorCode::LlmRateLimit.is_retryable());
        assert!(!ErrorCode::InvalidInput.is_retryable());
        assert!(!ErrorCode::RouterAtCapacity.is_retryable());
        assert!(!ErrorCode::StateLoad.is_retryable());
    }

    #[test]
    fn codes_serialize_to_stable_identifiers() {
        let json = serde_json::to_string(&ErrorCode::DistributedHeartbeat).unwrap();
        assert_eq!(json, "\"distributed_heartbeat\"");
        let back: ErrorCode = serde_json::from_str("\"tool_retry_exhausted\"").unwrap();
        assert_eq!(back, ErrorCode::ToolRetryExhausted);
    }
}
