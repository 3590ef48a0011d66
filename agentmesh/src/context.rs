//! Cooperative cancellation scopes.
//!
//! Every long-running operation receives a [`RunContext`]. Callees check it
//! between stages — before each tool call, between dependency levels,
//! between retries — and derive scoped children when applying timeouts so
//! that child cancellation never propagates upward.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A cancellation scope threaded through agent execution.
///
/// Cloning is cheap and shares the underlying token. [`RunContext::child`]
/// and [`RunContext::with_timeout`] derive scopes that are cancelled when
/// the parent is, while cancelling the child leaves the parent untouched.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    token: CancellationToken,
}

impl RunContext {
    /// Create a fresh, uncancelled context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel this scope and everything derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether this scope has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Derive a child scope. Cancelling the parent cancels the child;
    /// cancelling the child does not affect the parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Derive a child scope that cancels itself after `timeout`.
    ///
    /// The timer task exits as soon as either the deadline fires or the
    /// scope is cancelled through its parent.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let child = self.token.child_token();
        let timer = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(timeout) => timer.cancel(),
                () = timer.cancelled() => {}
            }
        });
        Self { token: child }
    }

    /// Resolves when this scope is cancelled. Intended for `tokio::select!`.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Return a `context_timeout` error if this scope has been cancelled.
    pub fn ensure_active(&self, component: &str, operation: &str) -> Result<()> {
        if self.token.is_cancelled() {
            Err(Error::cancelled(component, operation))
        } else {
            Ok(())
        }
    }
}
