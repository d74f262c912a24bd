//! OpenAI responses-style adapter. Carries a per-item `item_id` that is the
//! opaque signature spec.md §3/§4.A requires be preserved across
//! same-provider replay and stripped on cross-provider replay.

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

pub struct OpenAiResponsesAdapter<T: Transport> {
    transport: T,
    model: String,
}

impl<T: Transport> OpenAiResponsesAdapter<T> {
    pub fn new(transport: T, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    fn build_request(&self, prompt: &PromptConfig) -> Value {
        fn content_items(blocks: &[ContentBlock]) -> Vec<Value> {
            blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text, .. } => json!({"type": "input_text", "text": text}),
                    ContentBlock::Thinking { thinking, .. } => json!({
                        "type": "input_text",
                        "text": format!("<thinking>\n{thinking}\n</thinking>"),
                    }),
                    ContentBlock::ToolCall {
                        id,
                        name,
                        arguments,
                    } => json!({
                        "type": "function_call",
                        "call_id": id,
                        "name": name,
                        "arguments": arguments.to_string(),
                    }),
                    ContentBlock::Image { data, mime_type } => json!({
                        "type": "input_image",
                        "image_url": format!("data:{mime_type};base64,{data}"),
                    }),
                })
                .collect()
        }

        let mut body = json!({
            "model": self.model,
            "instructions": prompt.system_prompt,
            "stream": true,
            "input": prompt.messages.iter().map(|m| json!({
                "role": match m.role {
                    PromptRole::User => "user",
                    PromptRole::Assistant => "assistant",
                    PromptRole::ToolResult => "tool",
                },
                "content": content_items(&m.content),
            })).collect::<Vec<_>>(),
        });
        if let Some(effort) = prompt.reasoning {
            body["reasoning"] = json!({"effort": effort.as_effort_str(), "summary": "auto"});
        }
        body
    }
}

#[async_trait]
impl<T: Transport> ChatProvider for OpenAiResponsesAdapter<T> {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn api(&self) -> Api {
        Api::Responses
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
            let mut current_tool_id: Option<String> = None;
            let mut current_tool_name = String::new();
            let mut current_tool_args = String::new();
            let mut finished = false;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        let message = AssistantMessage {
                            content: content.clone(),
                            provider: Provider::OpenAi,
                            api: Api::Responses,
                            model: model.clone(),
                            usage, // terminal-event-only usage: stays zero on abort
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
                                    provider: Provider::OpenAi,
                                    api: Api::Responses,
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
                                let Ok(event) = serde_json::from_str::<RawEvent>(&raw) else { continue; };
                                match event {
                                    RawEvent::ResponseCreated {} => {
                                        yield AssistantMessageEvent::Start { model: model.clone(), provider: Provider::OpenAi };
                                    }
                                    RawEvent::OutputItemAdded { item } => {
                                        if item.item_type == "function_call" {
                                            current_tool_id = item.call_id.or(item.id);
                                            current_tool_name = item.name.unwrap_or_default();
                                            current_tool_args.clear();
                                        } else {
                                            yield AssistantMessageEvent::TextStart;
                                        }
                                    }
                                    RawEvent::OutputTextDelta { delta, .. } => {
                                        yield AssistantMessageEvent::TextDelta { content: delta.clone(), delta };
                                    }
                                    RawEvent::OutputTextDone { text, item_id } => {
                                        content.push(ContentBlock::Text { text: text.clone(), signature: Some(item_id) });
                                        yield AssistantMessageEvent::TextEnd { content: text };
                                    }
                                    RawEvent::FunctionCallArgumentsDelta { delta, .. } => {
                                        current_tool_args.push_str(&delta);
                                        let _live_preview = parse_streaming_json(&current_tool_args);
                                    }
                                    RawEvent::FunctionCallArgumentsDone { arguments, .. } => {
                                        let id = current_tool_id.clone().unwrap_or_default();
                                        let name = current_tool_name.clone();
                                        let parsed = serde_json::from_str(&arguments).unwrap_or(Value::Object(Default::default()));
                                        content.push(ContentBlock::ToolCall { id: id.clone(), name: name.clone(), arguments: parsed.clone() });
                                        yield AssistantMessageEvent::ToolCall { tool_call: ContentBlockToolCall { id, name, arguments: parsed } };
                                    }
                                    RawEvent::Completed { response } => {
                                        if let Some(u) = response.usage {
                                            usage.input = u.input_tokens.unwrap_or(0);
                                            usage.output = u.output_tokens.unwrap_or(0);
                                        }
                                        let stop_reason = if content.iter().any(|b| matches!(b, ContentBlock::ToolCall { .. })) {
                                            StopReason::ToolUse
                                        } else {
                                            StopReason::Stop
                                        };
                                        let message = AssistantMessage {
                                            content: content.clone(),
                                            provider: Provider::OpenAi,
                                            api: Api::Responses,
                                            model: model.clone(),
                                            usage,
                                            stop_reason,
                                            error: None,
                                        };
                                        yield AssistantMessageEvent::Done { reason: stop_reason, message };
                                        finished = true;
                                    }
                                    RawEvent::Incomplete { reason } => {
                                        let stop_reason = if reason == "max_output_tokens" { StopReason::Length } else { StopReason::Safety };
                                        let message = AssistantMessage {
                                            content: content.clone(),
                                            provider: Provider::OpenAi,
                                            api: Api::Responses,
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
                }
                if finished {
                    break;
                }
            }
        };

        Ok(AdapterStream::new(events))
    }
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum RawEvent {
    #[serde(rename = "response.created")]
    ResponseCreated {},
    #[serde(rename = "response.output_item.added")]
    OutputItemAdded { item: RawItem },
    #[serde(rename = "response.output_text.delta")]
    OutputTextDelta { delta: String, item_id: String },
    #[serde(rename = "response.output_text.done")]
    OutputTextDone { text: String, item_id: String },
    #[serde(rename = "response.function_call_arguments.delta")]
    FunctionCallArgumentsDelta { delta: String, item_id: String },
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone { arguments: String, item_id: String },
    #[serde(rename = "response.completed")]
    Completed { response: RawResponse },
    #[serde(rename = "response.incomplete")]
    Incomplete { reason: String },
}

#[derive(Deserialize)]
struct RawItem {
    id: Option<String>,
    call_id: Option<String>,
    #[serde(rename = "type")]
    item_type: String,
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawResponse {
    usage: Option<RawUsage>,
}

#[derive(Deserialize)]
struct RawUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
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
    async fn text_reply_preserves_item_id_as_signature() {
        let frames = vec![
            r#"{"type":"response.created"}"#.to_string(),
            r#"{"type":"response.output_item.added","item":{"id":"msg_1","type":"message"}}"#.to_string(),
            r#"{"type":"response.output_text.delta","delta":"hi","item_id":"msg_1"}"#.to_string(),
            r#"{"type":"response.output_text.done","text":"hi","item_id":"msg_1"}"#.to_string(),
            r#"{"type":"response.completed","response":{"usage":{"input_tokens":4,"output_tokens":1}}}"#.to_string(),
        ];
        let adapter = OpenAiResponsesAdapter::new(MockTransport { frames }, "gpt-5");
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
        assert_eq!(
            message.content,
            vec![ContentBlock::Text { text: "hi".into(), signature: Some("msg_1".into()) }]
        );
        assert_eq!(message.stop_reason, StopReason::Stop);
    }
}
