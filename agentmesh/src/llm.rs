//! The LLM client boundary.
//!
//! Concrete providers live outside this crate; the framework only needs
//! [`LlmClient`]. [`ScriptedLlm`] is a deterministic implementation for
//! tests and offline runs.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::RunContext;
use crate::error::{Error, ErrorCode, Result};
use crate::message::Message;

/// Response from a chat or completion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Generated text.
    pub content: String,
    /// Provider-specific metadata (token counts, model id, finish reason).
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl ChatResponse {
    /// Create a response with the given content.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: HashMap::new(),
        }
    }
}

/// A plain completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The prompt text.
    pub prompt: String,
    /// Maximum tokens to generate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    /// Create a request for `prompt`.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }
}

/// Client interface to a language model provider.
///
/// Implementations are opaque to the framework and must be safe for
/// concurrent use.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Run a chat exchange.
    async fn chat(&self, ctx: &RunContext, messages: &[Message]) -> Result<ChatResponse>;

    /// Run a plain completion. Defaults to a single-user-message chat.
    async fn complete(&self, ctx: &RunContext, request: CompletionRequest) -> Result<ChatResponse> {
        self.chat(ctx, &[Message::user(request.prompt)]).await
    }
}

/// One scripted reply from a [`ScriptedLlm`].
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Return this content.
    Reply(String),
    /// Fail with this code and message.
    Failure(ErrorCode, String),
}

/// A deterministic [`LlmClient`] that replays scripted responses in
/// sequence, cycling when exhausted, and records every prompt it saw.
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    replies: Vec<ScriptedReply>,
    cursor: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    /// Create a client that replies with `responses` in order.
    #[must_use]
    pub fn new(responses: Vec<impl Into<String>>) -> Self {
        Self {
            replies: responses
                .into_iter()
                .map(|r| ScriptedReply::Reply(r.into()))
                .collect(),
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Create a client from explicit scripted replies (including failures).
    #[must_use]
    pub fn from_script(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies,
            cursor: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Prompts seen so far, in call order.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("call log poisoned").clone()
    }

    /// Number of calls made so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("call log poisoned").len()
    }

    fn next_reply(&self, prompt: String) -> Result<ChatResponse> {
        self.calls.lock().expect("call log poisoned").push(prompt);

        if self.replies.is_empty() {
            return Err(Error::new(
                ErrorCode::Internal,
                "scripted_llm",
                "chat",
                "no scripted replies configured",
            ));
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.replies.len();
        match &self.replies[index] {
            ScriptedReply::Reply(content) => Ok(ChatResponse::new(content.clone())),
            ScriptedReply::Failure(code, message) => {
                Err(Error::new(*code, "scripted_llm", "chat", message.clone()))
            }
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn chat(&self, ctx: &RunContext, messages: &[Message]) -> Result<ChatResponse> {
        ctx.ensure_active("scripted_llm", "chat")?;
        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        self.next_reply(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replies_cycle_in_order() {
        let llm = ScriptedLlm::new(vec!["first", "second"]);
        let ctx = RunContext::new();

        let a = llm.chat(&ctx, &[Message::user("q1")]).await.unwrap();
        let b = llm.chat(&ctx, &[Message::user("q2")]).await.unwrap();
        let c = llm.chat(&ctx, &[Message::user("q3")]).await.unwrap();

        assert_eq!(a.content, "first");
        assert_eq!(b.content, "second");
        assert_eq!(c.content, "first");
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn scripted_failures_surface() {
        let llm = ScriptedLlm::from_script(vec![ScriptedReply::Failure(
            ErrorCode::LlmRateLimit,
            "slow down".to_string(),
        )]);
        let ctx = RunContext::new();

        let err = llm.chat(&ctx, &[Message::user("q")]).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LlmRateLimit);
    }

    #[tokio::test]
    async fn complete_defaults_to_single_message_chat() {
        let llm = ScriptedLlm::new(vec!["done"]);
        let ctx = RunContext::new();

        let response = llm
            .complete(&ctx, CompletionRequest::new("finish this"))
            .await
            .unwrap();
        assert_eq!(response.content, "done");
        assert_eq!(llm.calls(), vec!["finish this".to_string()]);
    }
}
