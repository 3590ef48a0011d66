//! Sequential composition of two runnables.

use async_trait::async_trait;

use crate::context::RunContext;
use crate::error::Result;

use super::{OutputStream, Runnable};

/// Two runnables composed end to end: the first's output becomes the
/// second's input. Built with [`RunnableExt::pipe`](super::RunnableExt::pipe).
#[derive(Debug, Clone)]
pub struct Pipe<A, B> {
    first: A,
    second: B,
}

impl<A, B> Pipe<A, B> {
    pub(crate) fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

#[async_trait]
impl<A, B> Runnable for Pipe<A, B>
where
    A: Runnable,
    B: Runnable<Input = A::Output>,
{
    type Input = A::Input;
    type Output = B::Output;

    fn name(&self) -> &str {
        "pipe"
    }

    async fn invoke(&self, ctx: &RunContext, input: Self::Input) -> Result<Self::Output> {
        let intermediate = self.first.invoke(ctx, input).await?;
        ctx.ensure_active("pipe", "invoke")?;
        self.second.invoke(ctx, intermediate).await
    }

    async fn stream(
        &self,
        ctx: &RunContext,
        input: Self::Input,
    ) -> Result<OutputStream<Self::Output>> {
        let intermediate = self.first.invoke(ctx, input).await?;
        self.second.stream(ctx, intermediate).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runnable::RunnableExt;

    struct AddOne;
    struct Stringify;

    #[async_trait]
    impl Runnable for AddOne {
        type Input = i64;
        type Output = i64;

        async fn invoke(&self, _ctx: &RunContext, input: i64) -> Result<i64> {
            Ok(input + 1)
        }
    }

    #[async_trait]
    impl Runnable for Stringify {
        type Input = i64;
        type Output = String;

        async fn invoke(&self, _ctx: &RunContext, input: i64) -> Result<String> {
            Ok(format!("value={input}"))
        }
    }

    #[tokio::test]
    async fn pipe_feeds_first_output_into_second() {
        let piped = AddOne.pipe(Stringify);
        let ctx = RunContext::new();

        let output = piped.invoke(&ctx, 41).await.unwrap();
        assert_eq!(output, "value=42");
    }

    #[tokio::test]
    async fn pipe_batch_preserves_order() {
        let piped = AddOne.pipe(Stringify);
        let ctx = RunContext::new();

        let outputs = piped.batch(&ctx, vec![1, 2]).await.unwrap();
        assert_eq!(outputs, vec!["value=2".to_string(), "value=3".to_string()]);
    }
}
