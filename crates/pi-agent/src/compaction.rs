//! Context compactor (spec.md §4.G), grounded in the teacher's
//! `session/compaction.rs::SessionCompaction` (the retry/backoff shape and
//! the `TokenEstimator` fallback) and `session/pruning.rs::SimpleTokenEstimator`
//! (character-count heuristic for providers that don't report usage).

use crate::error::AgentError;
use crate::normalize::normalize_for_provider;
use crate::scheduler::to_prompt_messages;
use crate::transcript::{Message, Transcript};
use pi_llm::{ChatProvider, ContentBlock, PromptConfig, PromptMessage, PromptRole, StopReason};
use std::sync::Arc;
use std::time::Duration;

/// Prompt appended after the head messages to elicit a single summary
/// string (spec.md §4.G step 2).
pub const COMPACTION_PROMPT: &str = r#"Summarise our conversation so far. Focus on:
- What was done
- What is currently being worked on
- Key user requests, constraints, or preferences that should persist

Be comprehensive but concise. This summary will replace the conversation history."#;

const DEFAULT_KEEP_TAIL: usize = 4;

/// Exponential backoff for the summary-generation call (teacher:
/// `session/compaction.rs::RetryConfig`).
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

/// Character-count heuristic used when a provider doesn't report usage for
/// the compaction call (open question in spec.md §9, resolved in DESIGN.md:
/// we adopt the teacher's `len()/4` heuristic uniformly rather than
/// maintaining a per-provider tokenizer).
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u64;
}

#[derive(Debug, Clone, Default)]
pub struct SimpleTokenEstimator;

impl TokenEstimator for SimpleTokenEstimator {
    fn estimate(&self, text: &str) -> u64 {
        (text.len() / 4) as u64
    }
}

/// Outcome of one `compact()` call (spec.md §4.G step 6 `compaction` event
/// payload).
#[derive(Debug, Clone)]
pub struct CompactionOutcome {
    pub summary: String,
    pub tokens_before: u64,
    pub tokens_after: u64,
}

pub struct ContextCompactor {
    estimator: Arc<dyn TokenEstimator>,
    keep_tail: usize,
    retry: RetryConfig,
}

impl ContextCompactor {
    pub fn new() -> Self {
        Self {
            estimator: Arc::new(SimpleTokenEstimator),
            keep_tail: DEFAULT_KEEP_TAIL,
            retry: RetryConfig::default(),
        }
    }

    pub fn with_estimator(estimator: Arc<dyn TokenEstimator>) -> Self {
        Self {
            estimator,
            ..Self::new()
        }
    }

    pub fn with_keep_tail(mut self, keep_tail: usize) -> Self {
        self.keep_tail = keep_tail;
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Find the cut index: at least `keep_tail` messages from the end, then
    /// advanced forward until it doesn't land inside an open tool-call pair
    /// (spec.md §4.G step 1 / invariant 4).
    fn cut_point(&self, messages: &[Message]) -> usize {
        let mut cut = messages.len().saturating_sub(self.keep_tail);
        while cut < messages.len() && cut > 0 {
            if matches!(messages[cut], Message::ToolResultMessage { .. }) {
                cut += 1;
            } else {
                break;
            }
        }
        cut
    }

    /// Run compaction against `transcript`, returning the outcome to emit
    /// as a `compaction` event. Rejects (by construction of the caller,
    /// which must hold `&mut Transcript` exclusively) while a turn is in
    /// progress, matching the `busy` contract of spec.md §4.F.
    pub async fn compact(
        &self,
        transcript: &mut Transcript,
        provider: &dyn ChatProvider,
        custom_instructions: Option<&str>,
    ) -> Result<CompactionOutcome, AgentError> {
        let messages = transcript.messages().to_vec();
        let cut = self.cut_point(&messages);
        if cut == 0 {
            return Err(AgentError::Internal(
                "nothing to compact: transcript is within the keep-tail".into(),
            ));
        }
        let head = &messages[..cut];

        let summary = self
            .generate_summary(head, provider, custom_instructions)
            .await?;

        let tokens_before = self.estimate_head_tokens(head, provider);
        let tokens_after = self.estimator.estimate(&summary);

        transcript.replace_prefix(
            vec![Message::CompactionSummaryMessage {
                summary: summary.clone(),
                tokens_before,
            }],
            cut,
        )?;

        Ok(CompactionOutcome {
            summary,
            tokens_before,
            tokens_after,
        })
    }

    async fn generate_summary(
        &self,
        head: &[Message],
        provider: &dyn ChatProvider,
        custom_instructions: Option<&str>,
    ) -> Result<String, AgentError> {
        let mut backoff = Duration::from_millis(self.retry.initial_backoff_ms);
        let mut last_error = None;

        for attempt in 0..=self.retry.max_retries {
            match self
                .try_generate_summary(head, provider, custom_instructions)
                .await
            {
                Ok(summary) => return Ok(summary),
                Err(e) => {
                    last_error = Some(e);
                    if attempt < self.retry.max_retries {
                        tokio::time::sleep(backoff).await;
                        backoff = backoff.mul_f64(self.retry.backoff_multiplier);
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| AgentError::Internal("compaction failed".into())))
    }

    async fn try_generate_summary(
        &self,
        head: &[Message],
        provider: &dyn ChatProvider,
        custom_instructions: Option<&str>,
    ) -> Result<String, AgentError> {
        let normalized = normalize_for_provider(head, provider.provider(), provider.api());
        let mut messages = to_prompt_messages(&normalized);

        let mut prompt_text = COMPACTION_PROMPT.to_string();
        if let Some(extra) = custom_instructions {
            prompt_text.push_str("\n\n");
            prompt_text.push_str(extra);
        }
        messages.push(PromptMessage {
            role: PromptRole::User,
            content: vec![ContentBlock::text(prompt_text)],
        });

        let prompt = PromptConfig {
            system_prompt: "Summarise the conversation for later continuation.".into(),
            messages,
            tools: Vec::new(),
            reasoning: None,
            max_tokens: 1024,
        };

        let cancel = pi_llm::CancelSignal::new();
        let mut stream = provider.stream(prompt, cancel).await?;
        use futures::StreamExt;
        let mut final_text = String::new();
        while let Some(event) = stream.next().await {
            if let pi_llm::AssistantMessageEvent::Done { reason, message } = event {
                if reason == StopReason::Error {
                    return Err(AgentError::Internal(
                        message.error.unwrap_or_else(|| "compaction call failed".into()),
                    ));
                }
                final_text = message
                    .content
                    .iter()
                    .filter_map(|b| match b {
                        ContentBlock::Text { text, .. } => Some(text.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
            }
        }
        Ok(final_text)
    }

    fn estimate_head_tokens(&self, head: &[Message], _provider: &dyn ChatProvider) -> u64 {
        let text: String = head
            .iter()
            .map(|m| match m {
                Message::UserMessage { content, .. } => render_blocks(content),
                Message::AssistantMessage(m) => render_blocks(&m.content),
                Message::ToolResultMessage { content, .. } => content.clone(),
                Message::CompactionSummaryMessage { summary, .. } => summary.clone(),
                Message::CustomMessageEntry { content, .. } => content.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n");
        self.estimator.estimate(&text)
    }
}

impl Default for ContextCompactor {
    fn default() -> Self {
        Self::new()
    }
}

fn render_blocks(blocks: &[ContentBlock]) -> String {
    blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text, .. } => text.clone(),
            ContentBlock::Thinking { thinking, .. } => thinking.clone(),
            ContentBlock::ToolCall { name, arguments, .. } => format!("{name}({arguments})"),
            ContentBlock::Image { .. } => "[image]".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::Message;
    use async_trait::async_trait;
    use pi_llm::{Api, CancelSignal, Provider, RawFrameStream, Transport};
    use serde_json::Value;
    use std::pin::Pin;

    struct SummaryTransport;
    #[async_trait]
    impl Transport for SummaryTransport {
        async fn open_stream(
            &self,
            _request_body: Value,
            _cancel: CancelSignal,
        ) -> Result<RawFrameStream, pi_llm::ProviderError> {
            let frames = vec![
                r#"{"type":"message_start","message":{"usage":{"input_tokens":50,"output_tokens":0}}}"#.to_string(),
                r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#.to_string(),
                r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"summary text"}}"#.to_string(),
                r#"{"type":"content_block_stop","index":0}"#.to_string(),
                r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":3}}"#.to_string(),
                r#"{"type":"message_stop"}"#.to_string(),
            ];
            Ok(Box::pin(futures::stream::iter(frames.into_iter().map(Ok))) as Pin<Box<_>>)
        }
    }

    fn long_transcript() -> Transcript {
        let mut t = Transcript::new();
        for i in 0..20 {
            t.append(Message::user_text(format!("message {i}"))).unwrap();
        }
        t
    }

    #[tokio::test]
    async fn compaction_replaces_head_and_keeps_tail() {
        let mut transcript = long_transcript();
        let provider = pi_llm::providers::anthropic::AnthropicAdapter::new(SummaryTransport, "claude-test");
        let compactor = ContextCompactor::new();

        let before_len = transcript.messages().len();
        let outcome = compactor.compact(&mut transcript, &provider, None).await.unwrap();

        assert_eq!(outcome.summary, "summary text");
        assert!(outcome.tokens_before > 0);
        assert_eq!(
            transcript.messages().len(),
            before_len - (before_len - DEFAULT_KEEP_TAIL) + 1
        );
        assert!(matches!(
            transcript.messages()[0],
            Message::CompactionSummaryMessage { .. }
        ));
        assert!(transcript.check_invariants().is_ok());
    }

    #[test]
    fn cut_point_advances_past_open_tool_pair() {
        let mut t = Transcript::new();
        t.append(Message::user_text("one")).unwrap();
        t.append(Message::AssistantMessage(pi_llm::AssistantMessage {
            content: vec![ContentBlock::ToolCall {
                id: "c1".into(),
                name: "calc".into(),
                arguments: Value::Null,
            }],
            provider: Provider::Anthropic,
            api: Api::Anthropic,
            model: "m".into(),
            usage: Default::default(),
            stop_reason: StopReason::ToolUse,
            error: None,
        }))
        .unwrap();
        t.append_tool_result("c1", "calc", "4", false).unwrap();
        for i in 0..5 {
            t.append(Message::user_text(format!("follow-up {i}"))).unwrap();
        }
        let compactor = ContextCompactor::new();
        let cut = compactor.cut_point(t.messages());
        assert!(!matches!(
            t.messages()[cut.saturating_sub(1)],
            Message::AssistantMessage(ref m) if m.has_tool_calls()
        ) || cut == 0);
    }
}
