//! Streaming chunk types for the [`Runnable`](super::Runnable) contract.

use std::pin::Pin;

use futures::Stream;

use crate::error::Error;

/// One chunk of a [`Runnable`](super::Runnable) stream.
///
/// A producer emits zero or more data chunks, then exactly one terminal
/// chunk — either `done` with an optional final value, or an error chunk
/// (which is also terminal) — and closes the stream.
#[derive(Debug)]
pub struct OutputChunk<T> {
    /// Payload carried by this chunk.
    pub data: Option<T>,
    /// Failure carried by this chunk. Error chunks are terminal.
    pub error: Option<Error>,
    /// Whether this is the terminal chunk.
    pub done: bool,
}

impl<T> OutputChunk<T> {
    /// A non-terminal data chunk.
    #[must_use]
    pub fn data(value: T) -> Self {
        Self {
            data: Some(value),
            error: None,
            done: false,
        }
    }

    /// A terminal chunk with no final value.
    #[must_use]
    pub fn done() -> Self {
        Self {
            data: None,
            error: None,
            done: true,
        }
    }

    /// A terminal chunk carrying the final value.
    #[must_use]
    pub fn finished(value: T) -> Self {
        Self {
            data: Some(value),
            error: None,
            done: true,
        }
    }

    /// A terminal error chunk.
    #[must_use]
    pub fn failure(error: Error) -> Self {
        Self {
            data: None,
            error: Some(error),
            done: true,
        }
    }

    /// Whether this chunk terminates the stream.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.done
    }
}

/// A boxed stream of output chunks.
pub type OutputStream<T> = Pin<Box<dyn Stream<Item = OutputChunk<T>> + Send>>;
