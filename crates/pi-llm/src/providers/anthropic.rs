//! Anthropic-style adapter: streams early, partial usage on abort
//! (spec.md §4.B "Usage accounting on abort").

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

pub struct AnthropicAdapter<T: Transport> {
    transport: T,
    model: String,
}

impl<T: Transport> AnthropicAdapter<T> {
    pub fn new(transport: T, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    fn build_request(&self, prompt: &PromptConfig) -> Value {
        fn content_blocks(blocks: &[ContentBlock]) -> Vec<Value> {
            blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text, signature } => {
                        let mut v = json!({"type": "text", "text": text});
                        if let Some(sig) = signature {
                            v["signature"] = json!(sig);
                        }
                        v
                    }
                    ContentBlock::Thinking { thinking, signature } => json!({
                        "type": "thinking",
                        "thinking": thinking,
                        "signature": signature,
                    }),
                    ContentBlock::ToolCall {
                        id,
                        name,
                        arguments,
                    } => json!({
                        "type": "tool_use",
                        "id": id,
                        "name": name,
                        "input": arguments,
                    }),
                    ContentBlock::Image { data, mime_type } => json!({
                        "type": "image",
                        "source": {"type": "base64", "media_type": mime_type, "data": data},
                    }),
                })
                .collect()
        }

        let messages: Vec<Value> = prompt
            .messages
            .iter()
            .map(|m| {
                json!({
                    "role": match m.role {
                        PromptRole::User | PromptRole::ToolResult => "user",
                        PromptRole::Assistant => "assistant",
                    },
                    "content": content_blocks(&m.content),
                })
            })
            .collect();
        let mut body = json!({
            "model": self.model,
            "system": prompt.system_prompt,
            "messages": messages,
            "max_tokens": prompt.max_tokens,
        });
        if let Some(effort) = prompt.reasoning {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": effort.anthropic_budget_tokens(),
            });
        }
        body
    }
}

#[async_trait]
impl<T: Transport> ChatProvider for AnthropicAdapter<T> {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    fn api(&self) -> Api {
        Api::Anthropic
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
            let mut usage = Usage::default();
            let mut text_buf = String::new();
            let mut thinking_buf = String::new();
            let mut thinking_sig: Option<String> = None;
            let mut tool_id = String::new();
            let mut tool_name = String::new();
            let mut tool_json_buf = String::new();
            let mut current_block: Option<&'static str> = None;
            let mut finished = false;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let message = AssistantMessage {
                            content: content.clone(),
                            provider: Provider::Anthropic,
                            api: Api::Anthropic,
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
                            None => {
                                if !finished {
                                    let message = AssistantMessage {
                                        content: content.clone(),
                                        provider: Provider::Anthropic,
                                        api: Api::Anthropic,
                                        model: model.clone(),
                                        usage,
                                        stop_reason: StopReason::Error,
                                        error: Some("stream ended without message_stop".into()),
                                    };
                                    yield AssistantMessageEvent::Error { message: message.error.clone().unwrap() };
                                    yield AssistantMessageEvent::Done { reason: StopReason::Error, message };
                                }
                                finished = true;
                            }
                            Some(Err(e)) => {
                                let message = AssistantMessage {
                                    content: content.clone(),
                                    provider: Provider::Anthropic,
                                    api: Api::Anthropic,
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
                                let parsed: Result<RawEvent, _> = serde_json::from_str(&raw);
                                let Ok(event) = parsed else { continue; };
                                match event {
                                    RawEvent::MessageStart { message } => {
                                        yield AssistantMessageEvent::Start { model: model.clone(), provider: Provider::Anthropic };
                                        if let Some(u) = message.usage {
                                            usage.input = u.input_tokens.unwrap_or(0);
                                            // Anthropic reports a nonzero running `output_tokens`
                                            // estimate starting at `message_start`, unlike
                                            // completions/responses-style APIs which only carry
                                            // usage in the terminal chunk.
                                            usage.output = u.output_tokens.unwrap_or(0);
                                            usage.cache_read = u.cache_read_input_tokens.unwrap_or(0);
                                            usage.cache_write = u.cache_creation_input_tokens.unwrap_or(0);
                                        }
                                    }
                                    RawEvent::ContentBlockStart { content_block, .. } => {
                                        match content_block {
                                            RawBlockStart::Text { text } => {
                                                text_buf = text;
                                                current_block = Some("text");
                                                yield AssistantMessageEvent::TextStart;
                                            }
                                            RawBlockStart::Thinking { thinking } => {
                                                thinking_buf = thinking;
                                                current_block = Some("thinking");
                                                yield AssistantMessageEvent::ThinkingStart;
                                            }
                                            RawBlockStart::ToolUse { id, name } => {
                                                tool_id = id;
                                                tool_name = name;
                                                tool_json_buf.clear();
                                                current_block = Some("tool_use");
                                            }
                                        }
                                    }
                                    RawEvent::ContentBlockDelta { delta, .. } => {
                                        match delta {
                                            RawDelta::TextDelta { text } => {
                                                text_buf.push_str(&text);
                                                yield AssistantMessageEvent::TextDelta { content: text_buf.clone(), delta: text };
                                            }
                                            RawDelta::ThinkingDelta { thinking } => {
                                                thinking_buf.push_str(&thinking);
                                                yield AssistantMessageEvent::ThinkingDelta { content: thinking_buf.clone(), delta: thinking };
                                            }
                                            RawDelta::SignatureDelta { signature } => {
                                                thinking_sig = Some(signature);
                                            }
                                            RawDelta::InputJsonDelta { partial_json } => {
                                                tool_json_buf.push_str(&partial_json);
                                                let _live_preview = parse_streaming_json(&tool_json_buf);
                                            }
                                        }
                                    }
                                    RawEvent::ContentBlockStop { .. } => {
                                        match current_block.take() {
                                            Some("text") => {
                                                content.push(ContentBlock::Text { text: text_buf.clone(), signature: None });
                                                yield AssistantMessageEvent::TextEnd { content: text_buf.clone() };
                                            }
                                            Some("thinking") => {
                                                content.push(ContentBlock::Thinking { thinking: thinking_buf.clone(), signature: thinking_sig.take() });
                                                yield AssistantMessageEvent::ThinkingEnd { content: thinking_buf.clone() };
                                            }
                                            Some("tool_use") => {
                                                let arguments = serde_json::from_str(&tool_json_buf).unwrap_or(Value::Object(Default::default()));
                                                content.push(ContentBlock::ToolCall { id: tool_id.clone(), name: tool_name.clone(), arguments: arguments.clone() });
                                                yield AssistantMessageEvent::ToolCall { tool_call: ContentBlockToolCall { id: tool_id.clone(), name: tool_name.clone(), arguments } };
                                            }
                                            _ => {}
                                        }
                                    }
                                    RawEvent::MessageDelta { delta, usage: delta_usage } => {
                                        if let Some(u) = delta_usage {
                                            usage.output = u.output_tokens.unwrap_or(usage.output);
                                        }
                                        if let Some(reason) = delta.stop_reason {
                                            let stop_reason = map_stop_reason(&reason, content.iter().any(|b| matches!(b, ContentBlock::ToolCall { .. })));
                                            let message = AssistantMessage {
                                                content: content.clone(),
                                                provider: Provider::Anthropic,
                                                api: Api::Anthropic,
                                                model: model.clone(),
                                                usage,
                                                stop_reason,
                                                error: None,
                                            };
                                            yield AssistantMessageEvent::Done { reason: stop_reason, message };
                                            finished = true;
                                        }
                                    }
                                    RawEvent::MessageStop {} => {}
                                    RawEvent::Error { error } => {
                                        let message = AssistantMessage {
                                            content: content.clone(),
                                            provider: Provider::Anthropic,
                                            api: Api::Anthropic,
                                            model: model.clone(),
                                            usage,
                                            stop_reason: StopReason::Error,
                                            error: Some(error.message.clone()),
                                        };
                                        yield AssistantMessageEvent::Error { message: error.message };
                                        yield AssistantMessageEvent::Done { reason: StopReason::Error, message };
                                        finished = true;
                                    }
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

fn map_stop_reason(raw: &str, had_tool_calls: bool) -> StopReason {
    match raw {
        "tool_use" => StopReason::ToolUse,
        "max_tokens" => StopReason::Length,
        "refusal" => StopReason::Safety,
        "end_turn" | "stop_sequence" => {
            if had_tool_calls {
                StopReason::ToolUse
            } else {
                StopReason::Stop
            }
        }
        _ => StopReason::Stop,
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawEvent {
    #[serde(rename = "message_start")]
    MessageStart { message: RawMessageStart },
    #[serde(rename = "content_block_start")]
    ContentBlockStart {
        index: usize,
        content_block: RawBlockStart,
    },
    #[serde(rename = "content_block_delta")]
    ContentBlockDelta { index: usize, delta: RawDelta },
    #[serde(rename = "content_block_stop")]
    ContentBlockStop { index: usize },
    #[serde(rename = "message_delta")]
    MessageDelta {
        delta: RawMessageDelta,
        usage: Option<RawUsage>,
    },
    #[serde(rename = "message_stop")]
    MessageStop {},
    #[serde(rename = "error")]
    Error { error: RawError },
}

#[derive(Deserialize)]
struct RawMessageStart {
    usage: Option<RawUsage>,
}

#[derive(Deserialize)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    cache_read_input_tokens: Option<u64>,
    cache_creation_input_tokens: Option<u64>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawBlockStart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "thinking")]
    Thinking { thinking: String },
    #[serde(rename = "tool_use")]
    ToolUse { id: String, name: String },
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawDelta {
    #[serde(rename = "text_delta")]
    TextDelta { text: String },
    #[serde(rename = "thinking_delta")]
    ThinkingDelta { thinking: String },
    #[serde(rename = "signature_delta")]
    SignatureDelta { signature: String },
    #[serde(rename = "input_json_delta")]
    InputJsonDelta { partial_json: String },
}

#[derive(Deserialize)]
struct RawMessageDelta {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct RawError {
    message: String,
}
