//! Middleware chains around agent execution.
//!
//! Middlewares transform the request on the way in and the response on the
//! way out. `on_before` runs first-to-last, `on_after` last-to-first for
//! matched pairs, and `on_error` last-to-first for every middleware whose
//! `on_before` had succeeded when the failure occurred. A middleware may
//! short-circuit by returning a response from `on_before`; the body is
//! skipped but `on_after` still unwinds.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::io::{AgentInput, AgentOutput};

/// Outcome of a middleware's `on_before` hook.
#[derive(Debug)]
pub enum BeforeOutcome {
    /// Proceed with the (possibly transformed) input.
    Continue(AgentInput),
    /// Skip the body and use this output. `on_after` still unwinds.
    ShortCircuit(AgentOutput),
}

/// A request/response transformer around an agent body.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Transform the request, or short-circuit with a response.
    async fn on_before(&self, _ctx: &RunContext, input: AgentInput) -> Result<BeforeOutcome> {
        Ok(BeforeOutcome::Continue(input))
    }

    /// Transform the response.
    async fn on_after(&self, _ctx: &RunContext, output: AgentOutput) -> Result<AgentOutput> {
        Ok(output)
    }

    /// Observe or substitute a failure. The returned error replaces the
    /// original; it can never be swallowed into success.
    async fn on_error(&self, _ctx: &RunContext, error: Error) -> Error {
        error
    }
}

/// A shared, thread-safe [`Middleware`] trait object.
pub type SharedMiddleware = Arc<dyn Middleware>;

/// An ordered middleware chain.
#[derive(Clone, Default)]
pub struct MiddlewareChain {
    middlewares: Vec<SharedMiddleware>,
}

impl std::fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MiddlewareChain")
            .field("len", &self.middlewares.len())
            .finish()
    }
}

impl MiddlewareChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware, returning the extended chain.
    #[must_use]
    pub fn with(mut self, middleware: SharedMiddleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Append a middleware in place.
    pub fn push(&mut self, middleware: SharedMiddleware) {
        self.middlewares.push(middleware);
    }

    /// Number of middlewares in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Run `body` inside the chain.
    ///
    /// Request transformations fold forward, response transformations fold
    /// backward. A failure anywhere routes through `on_error` in reverse
    /// over the middlewares that had entered.
    pub async fn run<F, Fut>(
        &self,
        ctx: &RunContext,
        input: AgentInput,
        body: F,
    ) -> Result<AgentOutput>
    where
        F: FnOnce(AgentInput) -> Fut,
        Fut: Future<Output = Result<AgentOutput>> + Send,
    {
        let mut entered = 0;
        let mut current = Some(input);
        let mut short_circuit: Option<AgentOutput> = None;

        for middleware in &self.middlewares {
            match middleware.on_before(ctx, current.take().expect("current set")).await {
                Ok(BeforeOutcome::Continue(next)) => {
                    entered += 1;
                    current = Some(next);
                }
                Ok(BeforeOutcome::ShortCircuit(output)) => {
                    entered += 1;
                    short_circuit = Some(output);
                    break;
                }
                Err(error) => return Err(self.unwind_error(ctx, entered, error).await),
            }
        }

        let mut output = match short_circuit {
            Some(output) => output,
            None => match body(current.expect("current set")).await {
                Ok(output) => output,
                Err(error) => return Err(self.unwind_error(ctx, entered, error).await),
            },
        };

        for index in (0..entered).rev() {
            match self.middlewares[index].on_after(ctx, output).await {
                Ok(next) => output = next,
                Err(error) => return Err(self.unwind_error(ctx, index + 1, error).await),
            }
        }
        Ok(output)
    }

    async fn unwind_error(&self, ctx: &RunContext, entered: usize, mut error: Error) -> Error {
        for middleware in self.middlewares[..entered].iter().rev() {
            error = middleware.on_error(ctx, error).await;
        }
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::sync::Mutex;

    /// Records hook invocations into a shared event log.
    struct Recording {
        label: &'static str,
        events: Arc<Mutex<Vec<String>>>,
    }

    impl Recording {
        fn log(&self, hook: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.label, hook));
        }
    }

    #[async_trait]
    impl Middleware for Recording {
        async fn on_before(&self, _ctx: &RunContext, input: AgentInput) -> Result<BeforeOutcome> {
            self.log("before");
            Ok(BeforeOutcome::Continue(input))
        }

        async fn on_after(&self, _ctx: &RunContext, output: AgentOutput) -> Result<AgentOutput> {
            self.log("after");
            Ok(output)
        }

        async fn on_error(&self, _ctx: &RunContext, error: Error) -> Error {
            self.log("error");
            error
        }
    }

    fn chain_of(
        labels: &[&'static str],
        events: &Arc<Mutex<Vec<String>>>,
    ) -> MiddlewareChain {
        let mut chain = MiddlewareChain::new();
        for label in labels {
            chain.push(Arc::new(Recording {
                label,
                events: Arc::clone(events),
            }));
        }
        chain
    }

    #[tokio::test]
    async fn after_unwinds_in_reverse_order_of_before() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let chain = chain_of(&["a", "b"], &events);

        let ctx = RunContext::new();
        chain
            .run(&ctx, AgentInput::new("t"), |_| async {
                Ok(AgentOutput::success("ok"))
            })
            .await
            .unwrap();

        assert_eq!(
            *events.lock().unwrap(),
            vec!["a:before", "b:before", "b:after", "a:after"]
        );
    }

    #[tokio::test]
    async fn body_failure_routes_through_on_error_in_reverse() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let chain = chain_of(&["a", "b"], &events);

        let ctx = RunContext::new();
        let err = chain
            .run(&ctx, AgentInput::new("t"), |_| async {
                Err(Error::new(ErrorCode::AgentExecution, "body", "run", "boom"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::AgentExecution);
        assert_eq!(
            *events.lock().unwrap(),
            vec!["a:before", "b:before", "b:error", "a:error"]
        );
    }

    #[tokio::test]
    async fn short_circuit_skips_body_but_unwinds_after() {
        struct Cached;

        #[async_trait]
        impl Middleware for Cached {
            async fn on_before(
                &self,
                _ctx: &RunContext,
                _input: AgentInput,
            ) -> Result<BeforeOutcome> {
                Ok(BeforeOutcome::ShortCircuit(AgentOutput::success("cached")))
            }
        }

        let events = Arc::new(Mutex::new(Vec::new()));
        let chain = chain_of(&["outer"], &events).with(Arc::new(Cached));

        let ctx = RunContext::new();
        let output = chain
            .run(&ctx, AgentInput::new("t"), |_| async {
                panic!("body must not run");
            })
            .await
            .unwrap();

        assert_eq!(output.result, "cached");
        assert_eq!(
            *events.lock().unwrap(),
            vec!["outer:before", "outer:after"]
        );
    }

    #[tokio::test]
    async fn on_error_may_substitute_but_not_swallow() {
        struct Reclassify;

        #[async_trait]
        impl Middleware for Reclassify {
            async fn on_error(&self, _ctx: &RunContext, error: Error) -> Error {
                Error::new(
                    ErrorCode::Internal,
                    "middleware",
                    "reclassify",
                    "wrapped",
                )
                .with_source(error)
            }
        }

        let chain = MiddlewareChain::new().with(Arc::new(Reclassify));
        let ctx = RunContext::new();

        let err = chain
            .run(&ctx, AgentInput::new("t"), |_| async {
                Err(Error::new(ErrorCode::ToolExecution, "body", "run", "boom"))
            })
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::Internal);
        assert!(std::error::Error::source(&err).is_some());
    }

    #[tokio::test]
    async fn before_transforms_fold_forward() {
        struct Tagger(&'static str);

        #[async_trait]
        impl Middleware for Tagger {
            async fn on_before(
                &self,
                _ctx: &RunContext,
                input: AgentInput,
            ) -> Result<BeforeOutcome> {
                let task = format!("{}+{}", input.task, self.0);
                Ok(BeforeOutcome::Continue(AgentInput { task, ..input }))
            }
        }

        let chain = MiddlewareChain::new()
            .with(Arc::new(Tagger("a")))
            .with(Arc::new(Tagger("b")));

        let ctx = RunContext::new();
        let output = chain
            .run(&ctx, AgentInput::new("t"), |input| async move {
                Ok(AgentOutput::success(input.task))
            })
            .await
            .unwrap();

        assert_eq!(output.result, "t+a+b");
    }
}
