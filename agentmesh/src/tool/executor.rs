//! Bounded-parallel tool dispatch.
//!
//! The executor runs a list of tool invocations with a concurrency bound,
//! per-call timeout scopes, retries with exponential backoff, an optional
//! result cache, and lifecycle callbacks. Result ordering always matches
//! input ordering; a call's failure never affects its siblings unless
//! `stop_on_error` is set.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::callback::CallbackSet;
use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::retry::{RetryPolicy, retry_async};

use super::cache::{ToolCache, cache_key};
use super::{ToolInput, ToolOutput, ToolSet};

/// Configuration for a [`ToolExecutor`].
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Maximum number of tool calls in flight at once. Must be at least 1.
    pub max_concurrency: usize,
    /// Upper bound for one call including its retries. Must be positive.
    pub timeout: Duration,
    /// Retry policy applied per call.
    pub retry: RetryPolicy,
    /// Whether to consult and populate the cache.
    pub cache_enabled: bool,
    /// Time-to-live for cached results.
    pub cache_ttl: Duration,
    /// Cancel remaining calls after the first failure.
    pub stop_on_error: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 8,
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            stop_on_error: false,
        }
    }
}

impl ExecutorConfig {
    fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::invalid_config(
                "tool_executor",
                "new",
                "max_concurrency must be at least 1",
            ));
        }
        if self.timeout.is_zero() {
            return Err(Error::invalid_config(
                "tool_executor",
                "new",
                "timeout must be positive",
            ));
        }
        if self.retry.multiplier <= 1.0 {
            return Err(Error::invalid_config(
                "tool_executor",
                "new",
                "retry multiplier must be greater than 1",
            ));
        }
        Ok(())
    }
}

/// One requested tool call.
#[derive(Debug, Clone)]
pub struct ToolInvocation {
    /// Name of the tool to invoke.
    pub tool_name: String,
    /// Input for the call.
    pub input: ToolInput,
}

impl ToolInvocation {
    /// Create an invocation.
    #[must_use]
    pub fn new(tool_name: impl Into<String>, input: ToolInput) -> Self {
        Self {
            tool_name: tool_name.into(),
            input,
        }
    }
}

/// Executes tool invocations with bounded concurrency.
#[derive(Clone)]
pub struct ToolExecutor {
    tools: ToolSet,
    config: ExecutorConfig,
    cache: Option<Arc<dyn ToolCache>>,
    callbacks: CallbackSet,
}

impl std::fmt::Debug for ToolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolExecutor")
            .field("tools", &self.tools.names())
            .field("config", &self.config)
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl ToolExecutor {
    /// Create an executor over `tools`.
    pub fn new(tools: ToolSet, config: ExecutorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tools,
            config,
            cache: None,
            callbacks: CallbackSet::new(),
        })
    }

    /// Attach a result cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ToolCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Attach lifecycle callbacks.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: CallbackSet) -> Self {
        self.callbacks = callbacks;
        self
    }

    /// The executor's configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Execute `calls`, returning one result per call in input order.
    ///
    /// With `stop_on_error`, the first failure cancels calls that have not
    /// started yet; already-running calls observe cancellation through
    /// their derived scopes. Partial results are always returned.
    pub async fn execute(
        &self,
        ctx: &RunContext,
        calls: Vec<ToolInvocation>,
    ) -> Result<Vec<Result<ToolOutput>>> {
        ctx.ensure_active("tool_executor", "execute")?;

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency));
        let scope = ctx.child();

        let workers = calls.iter().enumerate().map(|(index, call)| {
            let semaphore = Arc::clone(&semaphore);
            let scope = scope.clone();
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                if scope.is_cancelled() {
                    return (index, Err(Error::cancelled("tool_executor", "execute")));
                }
                let result = self.execute_one(&scope, call).await;
                if result.is_err() && self.config.stop_on_error {
                    scope.cancel();
                }
                (index, result)
            }
        });

        // Each worker writes its own slot; no shared append.
        let mut results: Vec<Option<Result<ToolOutput>>> =
            (0..calls.len()).map(|_| None).collect();
        for (index, result) in futures::future::join_all(workers).await {
            results[index] = Some(result);
        }
        Ok(results
            .into_iter()
            .map(|slot| slot.expect("every worker reports"))
            .collect())
    }

    async fn execute_one(&self, ctx: &RunContext, call: &ToolInvocation) -> Result<ToolOutput> {
        let Some(tool) = self.tools.get(&call.tool_name) else {
            return Err(Error::invalid_input(
                "tool_executor",
                "execute",
                format!("unknown tool '{}'", call.tool_name),
            )
            .with_context("tool_name", call.tool_name.clone()));
        };

        let key = cache_key(&call.tool_name, &call.input);
        if self.config.cache_enabled
            && let Some(cache) = &self.cache
            && let Some(hit) = cache.get(&key)
        {
            self.callbacks.cache_hit(&call.tool_name, &key).await;
            return Ok(hit);
        }

        self.callbacks.tool_start(&call.tool_name, &call.input).await;

        let scoped = ctx.with_timeout(self.config.timeout);
        let tool = Arc::clone(tool);
        let scoped_ref = &scoped;
        let input = &call.input;
        let attempt = move |_attempt: u32| {
            let tool = Arc::clone(&tool);
            let input = input.clone();
            async move { tool.invoke(scoped_ref, input).await }
        };

        let result = match tokio::time::timeout(
            self.config.timeout,
            retry_async(&scoped, &self.config.retry, "tool_executor", "execute", attempt),
        )
        .await
        {
            Ok(result) => result.map_err(|error| self.classify(&call.tool_name, error)),
            Err(_) => Err(Error::new(
                ErrorCode::ToolTimeout,
                "tool_executor",
                "execute",
                format!(
                    "tool '{}' timed out after {:?}",
                    call.tool_name, self.config.timeout
                ),
            )
            .with_context("tool_name", call.tool_name.clone())),
        };

        match &result {
            Ok(output) => {
                if self.config.cache_enabled
                    && output.success
                    && let Some(cache) = &self.cache
                {
                    cache.set(&key, output.clone(), self.config.cache_ttl);
                }
                self.callbacks.tool_end(&call.tool_name, output).await;
            }
            Err(error) => self.callbacks.error("tool_executor", error).await,
        }
        result
    }

    /// Re-code an exhausted retry loop as `tool_retry_exhausted`.
    fn classify(&self, tool_name: &str, error: Error) -> Error {
        if self.config.retry.max_retries > 0 && error.context.contains_key("retry_attempt") {
            let attempts = self.config.retry.max_retries + 1;
            Error::new(
                ErrorCode::ToolRetryExhausted,
                "tool_executor",
                "execute",
                format!("tool '{tool_name}' failed after {attempts} attempts"),
            )
            .with_context("tool_name", tool_name.to_string())
            .with_context("max_attempts", attempts)
            .with_source(error)
        } else {
            error
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::cache::{CacheConfig, LruToolCache};
    use crate::tool::testing::{EchoTool, FlakyTool};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            ..RetryPolicy::default()
        }
    }

    fn executor_with(tools: ToolSet, config: ExecutorConfig) -> ToolExecutor {
        ToolExecutor::new(tools, config).expect("valid config")
    }

    #[tokio::test]
    async fn results_match_input_order() {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(EchoTool::new()));
        let executor = executor_with(tools, ExecutorConfig::default());

        let calls: Vec<ToolInvocation> = (0..10)
            .map(|i| ToolInvocation::new("echo", ToolInput::new().with_arg("input", i)))
            .collect();

        let ctx = RunContext::new();
        let results = executor.execute(&ctx, calls).await.unwrap();
        assert_eq!(results.len(), 10);
        for (i, result) in results.iter().enumerate() {
            assert_eq!(result.as_ref().unwrap().result, i);
        }
    }

    #[tokio::test]
    async fn concurrency_is_bounded_by_the_semaphore() {
        struct Gauged {
            in_flight: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl crate::tool::Tool for Gauged {
            fn name(&self) -> &str {
                "gauged"
            }
            fn description(&self) -> String {
                "tracks peak concurrency".to_string()
            }
            async fn invoke(&self, _ctx: &RunContext, _input: ToolInput) -> Result<ToolOutput> {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(ToolOutput::ok("done"))
            }
        }

        let gauged = Arc::new(Gauged {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let mut tools = ToolSet::new();
        tools.add(gauged.clone());

        let executor = executor_with(
            tools,
            ExecutorConfig {
                max_concurrency: 3,
                ..ExecutorConfig::default()
            },
        );

        let calls: Vec<ToolInvocation> = (0..12)
            .map(|i| ToolInvocation::new("gauged", ToolInput::new().with_arg("i", i)))
            .collect();
        let ctx = RunContext::new();
        executor.execute(&ctx, calls).await.unwrap();

        assert!(gauged.peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn retryable_failures_are_retried_to_success() {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(FlakyTool::new("flaky", 2, "temporary glitch")));

        let executor = executor_with(
            tools,
            ExecutorConfig {
                retry: quick_retry(),
                ..ExecutorConfig::default()
            },
        );

        let ctx = RunContext::new();
        let results = executor
            .execute(&ctx, vec![ToolInvocation::new("flaky", ToolInput::new())])
            .await
            .unwrap();
        assert_eq!(results[0].as_ref().unwrap().result, "recovered");
    }

    #[tokio::test]
    async fn exhausted_retries_report_tool_retry_exhausted() {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(FlakyTool::new("flaky", 99, "temporary glitch")));

        let executor = executor_with(
            tools,
            ExecutorConfig {
                retry: quick_retry(),
                ..ExecutorConfig::default()
            },
        );

        let ctx = RunContext::new();
        let results = executor
            .execute(&ctx, vec![ToolInvocation::new("flaky", ToolInput::new())])
            .await
            .unwrap();
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolRetryExhausted);
        assert_eq!(err.context["max_attempts"], 3);
    }

    #[tokio::test]
    async fn non_retryable_failures_fail_once() {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(FlakyTool::new("strict", 99, "schema mismatch")));

        let executor = executor_with(
            tools,
            ExecutorConfig {
                retry: quick_retry(),
                ..ExecutorConfig::default()
            },
        );

        let ctx = RunContext::new();
        let results = executor
            .execute(&ctx, vec![ToolInvocation::new("strict", ToolInput::new())])
            .await
            .unwrap();
        let err = results[0].as_ref().unwrap_err();
        assert_eq!(err.code, ErrorCode::ToolExecution);
    }

    #[tokio::test]
    async fn one_failure_does_not_block_siblings() {
        let mut tools = ToolSet::new();
        tools.add(Arc::new(EchoTool::new()));

        let executor = executor_with(tools, ExecutorConfig::default());
        let ctx = RunContext::new();
        let results = executor
            .execute(
                &ctx,
                vec![
                    ToolInvocation::new("echo", ToolInput::new().with_arg("input", "a")),
                    ToolInvocation::new("missing", ToolInput::new()),
                    ToolInvocation::new("echo", ToolInput::new().with_arg("input", "b")),
                ],
            )
            .await
            .unwrap();

        assert!(results[0].is_ok());
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap().result, "b");
    }

    #[tokio::test]
    async fn cache_hit_skips_the_tool() {
        let echo = Arc::new(EchoTool::new());
        let mut tools = ToolSet::new();
        tools.add(echo.clone());

        let cache = Arc::new(LruToolCache::new(CacheConfig {
            capacity: 16,
            ..CacheConfig::default()
        }));
        let executor = executor_with(tools, ExecutorConfig::default()).with_cache(cache);

        let call = ToolInvocation::new("echo", ToolInput::new().with_arg("input", "cached"));
        let ctx = RunContext::new();

        executor.execute(&ctx, vec![call.clone()]).await.unwrap();
        executor.execute(&ctx, vec![call]).await.unwrap();

        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_on_error_cancels_unstarted_calls() {
        let echo = Arc::new(EchoTool::new());
        let mut tools = ToolSet::new();
        tools.add(echo.clone());

        let executor = executor_with(
            tools,
            ExecutorConfig {
                max_concurrency: 1,
                stop_on_error: true,
                retry: RetryPolicy::none(),
                ..ExecutorConfig::default()
            },
        );

        let mut calls = vec![ToolInvocation::new("missing", ToolInput::new())];
        calls.extend(
            (0..5).map(|i| ToolInvocation::new("echo", ToolInput::new().with_arg("input", i))),
        );

        let ctx = RunContext::new();
        let results = executor.execute(&ctx, calls).await.unwrap();

        assert!(results[0].is_err());
        // With a single permit, every later call observes the cancelled scope.
        assert!(results[1..].iter().all(Result::is_err));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn slow_tools_hit_the_timeout() {
        struct Sleeper;

        #[async_trait]
        impl crate::tool::Tool for Sleeper {
            fn name(&self) -> &str {
                "sleeper"
            }
            fn description(&self) -> String {
                "sleeps".to_string()
            }
            async fn invoke(&self, _ctx: &RunContext, _input: ToolInput) -> Result<ToolOutput> {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(ToolOutput::ok("late"))
            }
        }

        let mut tools = ToolSet::new();
        tools.add(Arc::new(Sleeper));
        let executor = executor_with(
            tools,
            ExecutorConfig {
                timeout: Duration::from_millis(20),
                retry: RetryPolicy::none(),
                ..ExecutorConfig::default()
            },
        );

        let ctx = RunContext::new();
        let results = executor
            .execute(&ctx, vec![ToolInvocation::new("sleeper", ToolInput::new())])
            .await
            .unwrap();
        assert_eq!(
            results[0].as_ref().unwrap_err().code,
            ErrorCode::ToolTimeout
        );
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = ToolExecutor::new(
            ToolSet::new(),
            ExecutorConfig {
                max_concurrency: 0,
                ..ExecutorConfig::default()
            },
        )
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidConfig);
    }
}
