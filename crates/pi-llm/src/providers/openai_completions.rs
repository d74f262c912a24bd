//! OpenAI chat-completions-style adapter: usage only arrives in the
//! terminal chunk, so aborting mid-stream always reports zero usage
//! (spec.md §4.B).

use super::{AdapterStream, ChatProvider, PromptConfig, PromptRole, Transport};
use crate::cancel::CancelSignal;
use crate::error::ProviderError;
use crate::events::{AssistantMessage, AssistantMessageEvent, ContentBlockToolCall, StopReason};
use crate::json_partial::parse_streaming_json;
use crate::model::{Api, ContentBlock, Provider, Usage};
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;

pub struct OpenAiCompletionsAdapter<T: Transport> {
    transport: T,
    model: String,
}

impl<T: Transport> OpenAiCompletionsAdapter<T> {
    pub fn new(transport: T, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    fn build_request(&self, prompt: &PromptConfig) -> Value {
        fn message_body(blocks: &[ContentBlock]) -> (String, Vec<Value>) {
            let text = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text, .. } => Some(text.clone()),
                    ContentBlock::Thinking { thinking, .. } => {
                        Some(format!("<thinking>\n{thinking}\n</thinking>"))
                    }
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n");
            let tool_calls = blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::ToolCall {
                        id,
                        name,
                        arguments,
                    } => Some(json!({
                        "id": id,
                        "type": "function",
                        "function": {"name": name, "arguments": arguments.to_string()},
                    })),
                    _ => None,
                })
                .collect();
            (text, tool_calls)
        }

        let mut body = json!({
            "model": self.model,
            "stream": true,
            "stream_options": {"include_usage": true},
            "messages": std::iter::once(json!({"role": "system", "content": prompt.system_prompt}))
                .chain(prompt.messages.iter().map(|m| {
                    let (text, tool_calls) = message_body(&m.content);
                    let mut msg = json!({
                        "role": match m.role {
                            PromptRole::User => "user",
                            PromptRole::Assistant => "assistant",
                            PromptRole::ToolResult => "tool",
                        },
                        "content": text,
                    });
                    if !tool_calls.is_empty() {
                        msg["tool_calls"] = json!(tool_calls);
                    }
                    msg
                }))
                .collect::<Vec<_>>(),
        });
        if let Some(effort) = prompt.reasoning {
            body["reasoning_effort"] = json!(effort.as_effort_str());
        }
        body
    }
}

#[derive(Default, Clone)]
struct ToolCallBuf {
    id: String,
    name: String,
    arguments: String,
}

#[async_trait]
impl<T: Transport> ChatProvider for OpenAiCompletionsAdapter<T> {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn api(&self) -> Api {
        Api::Completions
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
            let mut text_buf = String::new();
            let mut started_text = false;
            let mut tool_calls: HashMap<usize, ToolCallBuf> = HashMap::new();
            let mut tool_order: Vec<usize> = Vec::new();
            let mut usage = Usage::default();
            let mut started = false;
            let mut finished = false;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let message = AssistantMessage {
                            content: finalize_content(&text_buf, &tool_calls, &tool_order),
                            provider: Provider::OpenAi,
                            api: Api::Completions,
                            model: model.clone(),
                            usage, // terminal-chunk-only: stays zero on abort
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
                                    content: finalize_content(&text_buf, &tool_calls, &tool_order),
                                    provider: Provider::OpenAi,
                                    api: Api::Completions,
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
                                if raw == "[DONE]" {
                                    continue;
                                }
                                let Ok(chunk) = serde_json::from_str::<RawChunk>(&raw) else { continue; };
                                if !started {
                                    started = true;
                                    yield AssistantMessageEvent::Start { model: model.clone(), provider: Provider::OpenAi };
                                }
                                if let Some(u) = chunk.usage {
                                    usage.input = u.prompt_tokens.unwrap_or(0);
                                    usage.output = u.completion_tokens.unwrap_or(0);
                                    usage.cache_read = u.prompt_tokens_details
                                        .and_then(|d| d.cached_tokens)
                                        .unwrap_or(0);
                                }
                                let Some(choice) = chunk.choices.into_iter().next() else { continue; };
                                if let Some(content) = choice.delta.content {
                                    if !started_text {
                                        started_text = true;
                                        yield AssistantMessageEvent::TextStart;
                                    }
                                    text_buf.push_str(&content);
                                    yield AssistantMessageEvent::TextDelta { content: text_buf.clone(), delta: content };
                                }
                                for tc in choice.delta.tool_calls {
                                    let entry = tool_calls.entry(tc.index).or_insert_with(|| {
                                        tool_order.push(tc.index);
                                        ToolCallBuf::default()
                                    });
                                    if let Some(id) = tc.id {
                                        entry.id = id;
                                    }
                                    if let Some(f) = tc.function {
                                        if let Some(name) = f.name {
                                            entry.name = name;
                                        }
                                        if let Some(args) = f.arguments {
                                            entry.arguments.push_str(&args);
                                            let _live_preview = parse_streaming_json(&entry.arguments);
                                        }
                                    }
                                }
                                if let Some(finish_reason) = choice.finish_reason {
                                    if started_text {
                                        yield AssistantMessageEvent::TextEnd { content: text_buf.clone() };
                                    }
                                    for idx in &tool_order {
                                        if let Some(buf) = tool_calls.get(idx) {
                                            let arguments = serde_json::from_str(&buf.arguments)
                                                .unwrap_or(Value::Object(Default::default()));
                                            yield AssistantMessageEvent::ToolCall {
                                                tool_call: ContentBlockToolCall { id: buf.id.clone(), name: buf.name.clone(), arguments },
                                            };
                                        }
                                    }
                                    let content = finalize_content(&text_buf, &tool_calls, &tool_order);
                                    let stop_reason = map_finish_reason(&finish_reason);
                                    let message = AssistantMessage {
                                        content,
                                        provider: Provider::OpenAi,
                                        api: Api::Completions,
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

fn finalize_content(
    text: &str,
    tool_calls: &HashMap<usize, ToolCallBuf>,
    order: &[usize],
) -> Vec<ContentBlock> {
    let mut content = Vec::new();
    if !text.is_empty() {
        content.push(ContentBlock::text(text));
    }
    for idx in order {
        if let Some(buf) = tool_calls.get(idx) {
            let arguments =
                serde_json::from_str(&buf.arguments).unwrap_or(Value::Object(Default::default()));
            content.push(ContentBlock::ToolCall {
                id: buf.id.clone(),
                name: buf.name.clone(),
                arguments,
            });
        }
    }
    content
}

fn map_finish_reason(raw: &str) -> StopReason {
    match raw {
        "tool_calls" => StopReason::ToolUse,
        "length" => StopReason::Length,
        "content_filter" => StopReason::Safety,
        _ => StopReason::Stop,
    }
}

#[derive(Deserialize)]
struct RawChunk {
    #[serde(default)]
    choices: Vec<RawChoice>,
    usage: Option<RawUsage>,
}

#[derive(Deserialize)]
struct RawChoice {
    delta: RawDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawDelta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<RawToolCallDelta>,
}

#[derive(Deserialize)]
struct RawToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<RawFunctionDelta>,
}

#[derive(Deserialize)]
struct RawFunctionDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize)]
struct RawUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    prompt_tokens_details: Option<RawPromptTokensDetails>,
}

#[derive(Deserialize)]
struct RawPromptTokensDetails {
    cached_tokens: Option<u64>,
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
    async fn abort_before_terminal_chunk_reports_zero_usage() {
        let frames = vec![
            r#"{"choices":[{"index":0,"delta":{"content":"h"},"finish_reason":null}]}"#.to_string(),
        ];
        let cancel = CancelSignal::new();
        let adapter = OpenAiCompletionsAdapter::new(MockTransport { frames }, "gpt-x");
        let mut stream = adapter.stream(simple_prompt(), cancel.clone()).await.unwrap();
        let _ = stream.next().await; // Start
        let _ = stream.next().await; // TextStart
        let _ = stream.next().await; // TextDelta
        cancel.fire();
        while let Some(event) = stream.next().await {
            if let AssistantMessageEvent::Done { reason, message } = event {
                assert_eq!(reason, StopReason::Aborted);
                assert_eq!(message.usage.input, 0);
                assert_eq!(message.usage.output, 0);
            }
        }
    }

    #[tokio::test]
    async fn tool_call_arguments_accumulate_across_deltas() {
        let frames = vec![
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"calc","arguments":""}}]},"finish_reason":null}]}"#.to_string(),
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"a\":"}}]},"finish_reason":null}]}"#.to_string(),
            r#"{"choices":[{"index":0,"delta":{"tool_calls":[{"index":0,"function":{"arguments":"1}"}}]},"finish_reason":null}]}"#.to_string(),
            r#"{"choices":[{"index":0,"delta":{},"finish_reason":"tool_calls"}],"usage":{"prompt_tokens":5,"completion_tokens":2}}"#.to_string(),
        ];
        let adapter = OpenAiCompletionsAdapter::new(MockTransport { frames }, "gpt-x");
        let mut stream = adapter
            .stream(simple_prompt(), CancelSignal::new())
            .await
            .unwrap();
        let mut done_message = None;
        while let Some(event) = stream.next().await {
            if let AssistantMessageEvent::Done { message, .. } = event {
                done_message = Some(message);
            }
        }
        let message = done_message.unwrap();
        assert_eq!(message.stop_reason, StopReason::ToolUse);
        let (_, name, args) = message.tool_calls()[0];
        assert_eq!(name, "calc");
        assert_eq!(args, &json!({"a": 1}));
        assert_eq!(message.usage.input, 5);
        assert_eq!(message.usage.output, 2);
    }
}
