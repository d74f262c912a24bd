//! Gemini-style adapter: `usageMetadata` rides along on every chunk, so
//! (like Anthropic) aborting mid-stream yields partial, nonzero usage
//! (spec.md §4.B).

use super::{AdapterStream, ChatProvider, PromptConfig, PromptRole, Transport};
use crate::cancel::CancelSignal;
use crate::error::ProviderError;
use crate::events::{AssistantMessage, AssistantMessageEvent, ContentBlockToolCall, StopReason};
use crate::model::{Api, ContentBlock, Provider, Usage};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

pub struct GeminiAdapter<T: Transport> {
    transport: T,
    model: String,
}

impl<T: Transport> GeminiAdapter<T> {
    pub fn new(transport: T, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    fn build_request(&self, prompt: &PromptConfig) -> Value {
        fn parts(blocks: &[ContentBlock]) -> Vec<Value> {
            blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text, .. } => json!({"text": text}),
                    ContentBlock::Thinking { thinking, .. } => {
                        json!({"text": format!("<thinking>\n{thinking}\n</thinking>")})
                    }
                    ContentBlock::ToolCall {
                        name, arguments, ..
                    } => json!({"functionCall": {"name": name, "args": arguments}}),
                    ContentBlock::Image { data, mime_type } => {
                        json!({"inlineData": {"mimeType": mime_type, "data": data}})
                    }
                })
                .collect()
        }

        let mut body = json!({
            "model": self.model,
            "systemInstruction": {"parts": [{"text": prompt.system_prompt}]},
            "contents": prompt.messages.iter().map(|m| json!({
                "role": match m.role {
                    PromptRole::User | PromptRole::ToolResult => "user",
                    PromptRole::Assistant => "model",
                },
                "parts": parts(&m.content),
            })).collect::<Vec<_>>(),
        });
        if let Some(effort) = prompt.reasoning {
            body["generationConfig"] = json!({
                "thinkingConfig": {"thinkingBudget": effort.gemini_budget()}
            });
        }
        body
    }
}

#[async_trait]
impl<T: Transport> ChatProvider for GeminiAdapter<T> {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn api(&self) -> Api {
        Api::Gemini
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn stream(
        &self,
        prompt: PromptConfig,
        cancel: CancelSignal,
    ) -> Result<AdapterStream, ProviderError> {
        let body = self.build_request(&prompt);
        let frames = self.transport.open_stream(body, cancel.clone()).await?;
        let model = self.model.clone();

        let events = async_stream::stream! {
            let mut frames = frames;
            let mut content: Vec<ContentBlock> = Vec::new();
            let mut text_buf = String::new();
            let mut thinking_buf = String::new();
            let mut usage = Usage::default();
            let mut started = false;
            let mut started_text = false;
            let mut started_thinking = false;
            let mut finished = false;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let mut final_content = content.clone();
                        if !text_buf.is_empty() {
                            final_content.push(ContentBlock::text(text_buf.clone()));
                        }
                        let message = AssistantMessage {
                            content: final_content,
                            provider: Provider::Google,
                            api: Api::Gemini,
                            model: model.clone(),
                            usage,
                            stop_reason: StopReason::Aborted,
                            error: None,
                        };
                        yield AssistantMessageEvent::Done { reason: StopReason::Aborted, message };
                        finished = true;
                    }
                    frame = frames.next() => {
                        match frame {
                            None => { finished = true; }
                            Some(Err(e)) => {
                                let message = AssistantMessage {
                                    content: content.clone(),
                                    provider: Provider::Google,
                                    api: Api::Gemini,
                                    model: model.clone(),
                                    usage,
                                    stop_reason: StopReason::Error,
                                    error: Some(e.to_string()),
                                };
                                yield AssistantMessageEvent::Error { message: e.to_string() };
                                yield AssistantMessageEvent::Done { reason: StopReason::Error, message };
                                finished = true;
                            }
                            Some(Ok(raw)) => {
                                let Ok(chunk) = serde_json::from_str::<RawChunk>(&raw) else { continue; };
                                if !started {
                                    started = true;
                                    yield AssistantMessageEvent::Start { model: model.clone(), provider: Provider::Google };
                                }
                                if let Some(u) = chunk.usage_metadata {
                                    usage.input = u.prompt_token_count.unwrap_or(0);
                                    usage.output = u.candidates_token_count.unwrap_or(0);
                                }
                                let Some(candidate) = chunk.candidates.into_iter().next() else { continue; };
                                for part in candidate.content.parts {
                                    if let Some(call) = part.function_call {
                                        let id = format!("call_{}", Uuid::new_v4());
                                        content.push(ContentBlock::ToolCall {
                                            id: id.clone(),
                                            name: call.name.clone(),
                                            arguments: call.args.clone(),
                                        });
                                        yield AssistantMessageEvent::ToolCall {
                                            tool_call: ContentBlockToolCall { id, name: call.name, arguments: call.args },
                                        };
                                    } else if let Some(text) = part.text {
                                        if part.thought {
                                            if !started_thinking {
                                                started_thinking = true;
                                                yield AssistantMessageEvent::ThinkingStart;
                                            }
                                            thinking_buf.push_str(&text);
                                            yield AssistantMessageEvent::ThinkingDelta { content: thinking_buf.clone(), delta: text };
                                        } else {
                                            if !started_text {
                                                started_text = true;
                                                yield AssistantMessageEvent::TextStart;
                                            }
                                            text_buf.push_str(&text);
                                            yield AssistantMessageEvent::TextDelta { content: text_buf.clone(), delta: text };
                                        }
                                    }
                                }
                                if let Some(finish_reason) = candidate.finish_reason {
                                    if started_thinking {
                                        content.push(ContentBlock::Thinking { thinking: thinking_buf.clone(), signature: None });
                                        yield AssistantMessageEvent::ThinkingEnd { content: thinking_buf.clone() };
                                    }
                                    if started_text || !text_buf.is_empty() {
                                        content.push(ContentBlock::text(text_buf.clone()));
                                        yield AssistantMessageEvent::TextEnd { content: text_buf.clone() };
                                    }
                                    let stop_reason = map_finish_reason(&finish_reason, content.iter().any(|b| matches!(b, ContentBlock::ToolCall { .. })));
                                    let message = AssistantMessage {
                                        content: content.clone(),
                                        provider: Provider::Google,
                                        api: Api::Gemini,
                                        model: model.clone(),
                                        usage,
                                        stop_reason,
                                        error: None,
                                    };
                                    yield AssistantMessageEvent::Done { reason: stop_reason, message };
                                    finished = true;
                                }
                            }
                        }
                    }
                }
                if finished {
                    break;
                }
            }
        };

        Ok(AdapterStream::new(events))
    }
}

fn map_finish_reason(raw: &str, had_tool_calls: bool) -> StopReason {
    match raw {
        "MAX_TOKENS" => StopReason::Length,
        "SAFETY" | "RECITATION" => StopReason::Safety,
        "STOP" if had_tool_calls => StopReason::ToolUse,
        _ => StopReason::Stop,
    }
}

#[derive(Deserialize)]
struct RawChunk {
    #[serde(default)]
    candidates: Vec<RawCandidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<RawUsageMetadata>,
}

#[derive(Deserialize)]
struct RawCandidate {
    content: RawContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct RawContent {
    #[serde(default)]
    parts: Vec<RawPart>,
}

#[derive(Deserialize)]
struct RawPart {
    text: Option<String>,
    #[serde(default)]
    thought: bool,
    #[serde(rename = "functionCall")]
    function_call: Option<RawFunctionCall>,
}

#[derive(Deserialize)]
struct RawFunctionCall {
    name: String,
    args: Value,
}

#[derive(Deserialize)]
struct RawUsageMetadata {
    #[serde(rename = "promptTokenCount")]
    prompt_token_count: Option<u64>,
    #[serde(rename = "candidatesTokenCount")]
    candidates_token_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{PromptConfig, PromptMessage, PromptRole, RawFrameStream, Transport};
    use futures::stream;

    struct MockTransport {
        frames: Vec<String>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn open_stream(
            &self,
            _request_body: Value,
            _cancel: CancelSignal,
        ) -> Result<RawFrameStream, ProviderError> {
            let frames = self.frames.clone();
            Ok(Box::pin(stream::iter(frames.into_iter().map(Ok))))
        }
    }

    fn simple_prompt() -> PromptConfig {
        PromptConfig {
            system_prompt: "be nice".into(),
            messages: vec![PromptMessage {
                role: PromptRole::User,
                content: vec![ContentBlock::text("say hi")],
            }],
            tools: vec![],
            reasoning: None,
            max_tokens: 1024,
        }
    }

    #[tokio::test]
    async fn abort_mid_stream_reports_partial_usage() {
        let frames = vec![
            r#"{"candidates":[{"content":{"parts":[{"text":"h"}]},"index":0}],"usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":1}}"#.to_string(),
        ];
        let cancel = CancelSignal::new();
        let adapter = GeminiAdapter::new(MockTransport { frames }, "gemini-x");
        let mut stream = adapter.stream(simple_prompt(), cancel.clone()).await.unwrap();
        let _ = stream.next().await; // Start
        let _ = stream.next().await; // TextStart
        let _ = stream.next().await; // TextDelta
        cancel.fire();
        let mut saw_done = false;
        while let Some(event) = stream.next().await {
            if let AssistantMessageEvent::Done { reason, message } = event {
                assert_eq!(reason, StopReason::Aborted);
                assert!(message.usage.input > 0);
                assert!(message.usage.output > 0);
                saw_done = true;
            }
        }
        assert!(saw_done);
    }

    #[tokio::test]
    async fn function_call_part_becomes_tool_call() {
        let frames = vec![
            r#"{"candidates":[{"content":{"parts":[{"functionCall":{"name":"calc","args":{"a":1}}}]},"finishReason":"STOP"}],"usageMetadata":{"promptTokenCount":7,"candidatesTokenCount":1}}"#.to_string(),
        ];
        let adapter = GeminiAdapter::new(MockTransport { frames }, "gemini-x");
        let mut stream = adapter
            .stream(simple_prompt(), CancelSignal::new())
            .await
            .unwrap();
        let mut done = None;
        while let Some(event) = stream.next().await {
            if let AssistantMessageEvent::Done { message, .. } = event {
                done = Some(message);
            }
        }
        let message = done.unwrap();
        assert_eq!(message.stop_reason, StopReason::ToolUse);
        assert_eq!(message.tool_calls()[0].1, "calc");
    }
}
