//! The adapter seam every provider implements (spec.md §4.B), grounded in
//! the teacher's `querymt::chat::ChatProvider`/`ChatResponse` traits.

pub mod anthropic;
pub mod gemini;
pub mod openai_completions;
pub mod openai_responses;

use crate::cancel::CancelSignal;
use crate::error::ProviderError;
use crate::events::AssistantMessageEvent;
use crate::model::{Api, ContentBlock, Provider, ReasoningEffort};
use async_trait::async_trait;
use futures::Stream;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

/// A single message handed to a provider adapter as conversation history.
/// Deliberately narrower than the agent crate's transcript `Message`: the
/// adapter only needs role + content blocks, already normalised for its
/// own provider by the caller (spec.md §4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptRole {
    User,
    Assistant,
    ToolResult,
}

/// Everything a provider needs to issue one streaming request.
#[derive(Debug, Clone)]
pub struct PromptConfig {
    pub system_prompt: String,
    pub messages: Vec<PromptMessage>,
    pub tools: Vec<crate::tool_schema::ToolDefinition>,
    pub reasoning: Option<ReasoningEffort>,
    pub max_tokens: u32,
}

/// Transport boundary: everything below this trait (HTTP bodies, SSE
/// framing, auth headers) is out of scope for spec.md §1. A production
/// implementation backs this with `reqwest`; tests use an in-memory mock
/// that replays canned frames.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a stream and yield already-framed, provider-specific JSON
    /// chunks (one object per SSE `data:` line or NDJSON line).
    async fn open_stream(
        &self,
        request_body: serde_json::Value,
        cancel: CancelSignal,
    ) -> Result<RawFrameStream, ProviderError>;
}

pub type RawFrameStream = Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>;

/// The contract every adapter implements (spec.md §4.B).
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn provider(&self) -> Provider;
    fn api(&self) -> Api;
    fn model(&self) -> &str;

    async fn stream(
        &self,
        prompt: PromptConfig,
        cancel: CancelSignal,
    ) -> Result<AdapterStream, ProviderError>;
}

/// A running provider stream. Wraps the normalised event stream and tracks
/// the final [`crate::events::AssistantMessage`] as it goes by, so callers
/// that only care about the end result (e.g. the compactor's non-streaming
/// use) can call [`AdapterStream::result`] after draining.
pub struct AdapterStream {
    inner: Pin<Box<dyn Stream<Item = AssistantMessageEvent> + Send>>,
    result: Arc<Mutex<Option<crate::events::AssistantMessage>>>,
}

impl AdapterStream {
    pub fn new(inner: impl Stream<Item = AssistantMessageEvent> + Send + 'static) -> Self {
        let result = Arc::new(Mutex::new(None));
        let result_writer = result.clone();
        let tracked = futures::StreamExt::inspect(inner, move |event| {
            if let AssistantMessageEvent::Done { message, .. } = event {
                *result_writer.lock() = Some(message.clone());
            }
        });
        Self {
            inner: Box::pin(tracked),
            result,
        }
    }

    /// The final assistant message, available once the stream has been
    /// fully drained (i.e. a `Done` event was observed).
    pub fn result(&self) -> Option<crate::events::AssistantMessage> {
        self.result.lock().clone()
    }
}

impl Stream for AdapterStream {
    type Item = AssistantMessageEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().inner.as_mut().poll_next(cx)
    }
}
