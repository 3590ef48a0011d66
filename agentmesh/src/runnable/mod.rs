//! The uniform execution contract shared by agents, tools, and chains.
//!
//! Every executable exposes [`Runnable::invoke`], [`Runnable::stream`], and
//! [`Runnable::batch`]. Decorators layer behavior without mutating the
//! original: [`RunnableExt::with_callbacks`] attaches lifecycle hooks,
//! [`RunnableExt::with_config`] applies timeouts and retries, and
//! [`RunnableExt::pipe`] composes two runnables end to end.

mod middleware;
mod pipe;
mod stream;

pub use middleware::{BeforeOutcome, Middleware, MiddlewareChain, SharedMiddleware};
pub use pipe::Pipe;
pub use stream::{OutputChunk, OutputStream};

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::callback::CallbackSet;
use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::retry::{RetryPolicy, retry_async};

/// Overlay configuration applied by [`RunnableExt::with_config`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnableConfig {
    /// Upper bound for a single `invoke`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Retries on retryable failure.
    #[serde(default)]
    pub max_retries: u32,
    /// Free-form tags for observability.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Free-form metadata.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl RunnableConfig {
    /// Create an empty config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the invocation timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A component exposing invoke/stream/batch.
///
/// `stream` defaults to invoking once and emitting a single terminal
/// chunk; `batch` defaults to N parallel invokes preserving input order.
#[async_trait]
pub trait Runnable: Send + Sync {
    /// Input type consumed by this runnable.
    type Input: Send + 'static;
    /// Output type produced by this runnable.
    type Output: Send + 'static;

    /// Name used in callbacks and logs.
    fn name(&self) -> &str {
        "runnable"
    }

    /// Run once. Returns a full result or an error.
    async fn invoke(&self, ctx: &RunContext, input: Self::Input) -> Result<Self::Output>;

    /// Run once, emitting chunks. The default implementation invokes and
    /// emits one terminal chunk (or one terminal error chunk).
    async fn stream(
        &self,
        ctx: &RunContext,
        input: Self::Input,
    ) -> Result<OutputStream<Self::Output>> {
        let chunk = match self.invoke(ctx, input).await {
            Ok(output) => OutputChunk::finished(output),
            Err(error) => OutputChunk::failure(error),
        };
        Ok(Box::pin(futures::stream::iter(std::iter::once(chunk))))
    }

    /// Run every input in parallel. `outputs[i]` corresponds to
    /// `inputs[i]`; the first error fails the batch.
    async fn batch(
        &self,
        ctx: &RunContext,
        inputs: Vec<Self::Input>,
    ) -> Result<Vec<Self::Output>> {
        let futures = inputs.into_iter().map(|input| self.invoke(ctx, input));
        futures::future::join_all(futures)
            .await
            .into_iter()
            .collect()
    }
}

/// Decorator methods available on every sized [`Runnable`].
///
/// Each decorator consumes the receiver and returns a new runnable; keep
/// an `Arc` (or clone) of the original if it must stay addressable.
pub trait RunnableExt: Runnable + Sized {
    /// Overlay lifecycle callbacks.
    fn with_callbacks(self, callbacks: CallbackSet) -> WithCallbacks<Self> {
        WithCallbacks {
            inner: self,
            callbacks,
        }
    }

    /// Overlay timeout and retry configuration.
    fn with_config(self, config: RunnableConfig) -> WithConfig<Self> {
        WithConfig {
            inner: self,
            config,
        }
    }

    /// Compose with `next` so this runnable's output becomes its input.
    fn pipe<Next>(self, next: Next) -> Pipe<Self, Next>
    where
        Next: Runnable<Input = Self::Output>,
    {
        Pipe::new(self, next)
    }
}

impl<R: Runnable + Sized> RunnableExt for R {}

/// A [`Runnable`] with lifecycle callbacks attached.
///
/// Emits `on_chain_start` / `on_chain_end` around the inner invoke and
/// `on_error` on failure. Callback failures never affect the outcome.
#[derive(Debug, Clone)]
pub struct WithCallbacks<R> {
    inner: R,
    callbacks: CallbackSet,
}

#[async_trait]
impl<R: Runnable> Runnable for WithCallbacks<R> {
    type Input = R::Input;
    type Output = R::Output;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, ctx: &RunContext, input: Self::Input) -> Result<Self::Output> {
        self.callbacks.chain_start(self.inner.name()).await;
        let result = self.inner.invoke(ctx, input).await;
        match &result {
            Ok(_) => self.callbacks.chain_end(self.inner.name()).await,
            Err(error) => self.callbacks.error(self.inner.name(), error).await,
        }
        result
    }

    async fn stream(
        &self,
        ctx: &RunContext,
        input: Self::Input,
    ) -> Result<OutputStream<Self::Output>> {
        self.callbacks.chain_start(self.inner.name()).await;
        self.inner.stream(ctx, input).await
    }
}

/// A [`Runnable`] with timeout and retry configuration applied.
#[derive(Debug, Clone)]
pub struct WithConfig<R> {
    inner: R,
    config: RunnableConfig,
}

#[async_trait]
impl<R> Runnable for WithConfig<R>
where
    R: Runnable,
    R::Input: Clone + Sync,
{
    type Input = R::Input;
    type Output = R::Output;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, ctx: &RunContext, input: Self::Input) -> Result<Self::Output> {
        let policy = RetryPolicy {
            max_retries: self.config.max_retries,
            ..RetryPolicy::default()
        };

        // Timeouts apply per attempt in a derived scope so one slow
        // attempt never poisons the parent context.
        let inner = &self.inner;
        let timeout = self.config.timeout;
        retry_async(ctx, &policy, self.inner.name(), "invoke", move |_| {
            let input = input.clone();
            async move {
                match timeout {
                    Some(timeout) => {
                        let scoped = ctx.with_timeout(timeout);
                        match tokio::time::timeout(timeout, inner.invoke(&scoped, input)).await {
                            Ok(result) => result,
                            Err(_) => Err(Error::new(
                                ErrorCode::ContextTimeout,
                                inner.name(),
                                "invoke",
                                format!("timed out after {timeout:?}"),
                            )),
                        }
                    }
                    None => inner.invoke(ctx, input).await,
                }
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Doubler;

    #[async_trait]
    impl Runnable for Doubler {
        type Input = i64;
        type Output = i64;

        fn name(&self) -> &str {
            "doubler"
        }

        async fn invoke(&self, _ctx: &RunContext, input: i64) -> Result<i64> {
            Ok(input * 2)
        }
    }

    struct Flaky {
        failures: AtomicU32,
    }

    #[async_trait]
    impl Runnable for Flaky {
        type Input = ();
        type Output = u32;

        async fn invoke(&self, _ctx: &RunContext, _input: ()) -> Result<u32> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                Err(Error::new(ErrorCode::ToolTimeout, "flaky", "invoke", "timeout"))
            } else {
                Ok(7)
            }
        }
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let ctx = RunContext::new();
        let outputs = Doubler.batch(&ctx, vec![1, 2, 3, 4]).await.unwrap();
        assert_eq!(outputs, vec![2, 4, 6, 8]);
    }

    #[tokio::test]
    async fn default_stream_emits_one_terminal_chunk() {
        use futures::StreamExt;

        let ctx = RunContext::new();
        let mut stream = Doubler.stream(&ctx, 21).await.unwrap();

        let chunk = stream.next().await.unwrap();
        assert!(chunk.done);
        assert_eq!(chunk.data, Some(42));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn with_config_retries_retryable_failures() {
        let flaky = Flaky {
            failures: AtomicU32::new(2),
        };
        let configured = flaky.with_config(RunnableConfig::new().with_max_retries(3));

        let ctx = RunContext::new();
        let output = configured.invoke(&ctx, ()).await.unwrap();
        assert_eq!(output, 7);
    }

    #[tokio::test]
    async fn with_config_times_out_slow_invokes() {
        struct Slow;

        #[async_trait]
        impl Runnable for Slow {
            type Input = ();
            type Output = ();

            async fn invoke(&self, _ctx: &RunContext, _input: ()) -> Result<()> {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            }
        }

        let configured =
            Slow.with_config(RunnableConfig::new().with_timeout(Duration::from_millis(10)));
        let ctx = RunContext::new();
        let err = configured.invoke(&ctx, ()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::ContextTimeout);
    }

    #[tokio::test]
    async fn with_callbacks_emits_chain_hooks() {
        use crate::callback::{CallbackSet, Callbacks};

        #[derive(Default)]
        struct Counting {
            starts: AtomicU32,
            ends: AtomicU32,
        }

        #[async_trait]
        impl Callbacks for Counting {
            async fn on_chain_start(&self, _name: &str) {
                self.starts.fetch_add(1, Ordering::SeqCst);
            }
            async fn on_chain_end(&self, _name: &str) {
                self.ends.fetch_add(1, Ordering::SeqCst);
            }
        }

        let counting = Arc::new(Counting::default());
        let callbacks = CallbackSet::new().with(counting.clone());

        let ctx = RunContext::new();
        let wrapped = Doubler.with_callbacks(callbacks);
        wrapped.invoke(&ctx, 1).await.unwrap();

        assert_eq!(counting.starts.load(Ordering::SeqCst), 1);
        assert_eq!(counting.ends.load(Ordering::SeqCst), 1);
    }
}
