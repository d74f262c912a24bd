//! The turn scheduler (spec.md §4.E): drives one *prompt* through
//! `Idle → Streaming → AwaitingTools → Streaming → … → Idle`, grounded in
//! the teacher's `agent/execution.rs` turn loop — republish every
//! provider event to subscribers, accumulate the in-flight scratch
//! message, fan out tool calls with bounded parallelism, and keep looping
//! until the model stops requesting tools or the turn aborts.

use crate::error::AgentError;
use crate::events::SharedEventBus;
use crate::extensions::ExtensionDispatcher;
use crate::normalize::normalize_for_provider;
use crate::tools::{ToolCallRequest, ToolCallResult, ToolContext, ToolExecutor, ToolOutcome, ToolRegistry};
use crate::transcript::{Message, Transcript};
use futures::StreamExt;
use pi_llm::{
    AssistantMessage, AssistantMessageEvent, CancelSignal, ChatProvider, ContentBlock,
    PromptConfig, PromptMessage, PromptRole, ReasoningEffort, StopReason,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Static, per-prompt configuration the scheduler needs on every provider
/// call. Distinct from `SessionConfig` (crate::config), which also covers
/// things the scheduler never touches (extension paths, queue mode, ...).
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub system_prompt: String,
    pub max_tokens: u32,
    pub reasoning: Option<ReasoningEffort>,
    pub max_parallel_tools: usize,
}

pub struct TurnScheduler {
    provider: Arc<dyn ChatProvider>,
    tools: Arc<ToolRegistry>,
    executor: ToolExecutor,
    extensions: Arc<ExtensionDispatcher>,
    events: SharedEventBus,
    settings: SchedulerSettings,
}

impl TurnScheduler {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        tools: Arc<ToolRegistry>,
        extensions: Arc<ExtensionDispatcher>,
        events: SharedEventBus,
        settings: SchedulerSettings,
    ) -> Self {
        let executor = ToolExecutor::new(tools.clone(), settings.max_parallel_tools);
        Self {
            provider,
            tools,
            executor,
            extensions,
            events,
            settings,
        }
    }

    /// Run one prompt (spec.md §4.E steps 1-4) to completion: one or more
    /// turns, ending either on a tool-call-free assistant response, a
    /// provider error, or an abort.
    pub async fn run_prompt(
        &self,
        transcript: &mut Transcript,
        ctx: Arc<dyn ToolContext>,
        cancel: CancelSignal,
    ) -> Result<(), AgentError> {
        self.events.publish_agent_start();
        let errors = self.extensions.dispatch_agent_start().await;
        self.events.publish_hook_errors(errors);

        loop {
            self.events.publish_turn_start();
            let errors = self.extensions.dispatch_turn_start().await;
            self.events.publish_hook_errors(errors);

            let message = self.run_one_turn(transcript, cancel.clone()).await?;
            transcript.set_in_flight_assistant(Some(message.clone()));
            transcript.promote_in_flight()?;

            if message.stop_reason == StopReason::Error {
                self.events
                    .publish_error(message.error.clone().unwrap_or_else(|| "provider error".into()));
                self.events.publish_turn_end();
                break;
            }

            let tool_calls: Vec<ToolCallRequest> = message
                .tool_calls()
                .into_iter()
                .map(|(id, name, args)| ToolCallRequest {
                    call_id: id.to_string(),
                    name: name.to_string(),
                    arguments: args.clone(),
                })
                .collect();

            if tool_calls.is_empty() {
                self.events.publish_turn_end();
                break;
            }

            self.run_tool_fanout(transcript, tool_calls, ctx.clone(), cancel.clone())
                .await?;
            self.events.publish_turn_end();

            if message.stop_reason == StopReason::Aborted || cancel.is_fired() {
                break;
            }
        }

        let errors = self.extensions.dispatch_agent_end().await;
        self.events.publish_hook_errors(errors);
        self.events.publish_agent_end();
        Ok(())
    }

    /// Issue one provider call and republish its event stream as
    /// `message_update`, maintaining the streaming scratch state on every
    /// delta (spec.md §4.E step 3.b, §9 "streaming scratch state").
    async fn run_one_turn(
        &self,
        transcript: &mut Transcript,
        cancel: CancelSignal,
    ) -> Result<AssistantMessage, AgentError> {
        let normalized = normalize_for_provider(
            transcript.messages(),
            self.provider.provider(),
            self.provider.api(),
        );
        let prompt = PromptConfig {
            system_prompt: self.settings.system_prompt.clone(),
            messages: to_prompt_messages(&normalized),
            tools: self.tools.definitions(),
            reasoning: self.settings.reasoning,
            max_tokens: self.settings.max_tokens,
        };

        let mut stream = self.provider.stream(prompt, cancel).await?;
        let mut scratch = ScratchBuilder::new(self.provider.provider(), self.provider.model());
        let mut final_message: Option<AssistantMessage> = None;

        while let Some(event) = stream.next().await {
            scratch.apply(&event, transcript);
            self.events.publish_message_update(event.clone());
            if let AssistantMessageEvent::Done { message, .. } = event {
                final_message = Some(message);
            }
        }
        transcript.set_in_flight_assistant(None);

        final_message.ok_or_else(|| {
            AgentError::Internal("provider stream ended without a done event".into())
        })
    }

    /// Dispatch one assistant message's tool calls: hook check, bounded
    /// execution, then append results in call order (spec.md §4.C/§4.D).
    async fn run_tool_fanout(
        &self,
        transcript: &mut Transcript,
        calls: Vec<ToolCallRequest>,
        ctx: Arc<dyn ToolContext>,
        cancel: CancelSignal,
    ) -> Result<(), AgentError> {
        let mut blocked: HashMap<String, ToolCallResult> = HashMap::new();
        let mut to_execute = Vec::new();

        for call in &calls {
            let (block, errors) = self.extensions.dispatch_tool_call(call).await;
            self.events.publish_hook_errors(errors);
            self.events
                .publish_tool_execution_start(call.call_id.clone(), call.name.clone());
            match block {
                Some(block) => {
                    blocked.insert(
                        call.call_id.clone(),
                        ToolCallResult {
                            call_id: call.call_id.clone(),
                            tool_name: call.name.clone(),
                            outcome: ToolOutcome::error(block.reason),
                        },
                    );
                }
                None => to_execute.push(call.clone()),
            }
        }

        let executed = self.executor.execute_all(to_execute, ctx, cancel).await;
        let mut executed: HashMap<String, ToolCallResult> =
            executed.into_iter().map(|r| (r.call_id.clone(), r)).collect();

        for call in &calls {
            let result = blocked
                .remove(&call.call_id)
                .or_else(|| executed.remove(&call.call_id))
                .expect("every dispatched call has exactly one result");
            transcript.append_tool_result(
                &result.call_id,
                &result.tool_name,
                result.outcome.canonical_output(),
                result.outcome.is_error,
            )?;
            self.events.publish_tool_execution_end(
                result.call_id.clone(),
                result.tool_name.clone(),
                result.outcome.is_error,
            );
            let errors = self
                .extensions
                .dispatch_tool_result(&result.call_id, result.outcome.is_error)
                .await;
            self.events.publish_hook_errors(errors);
        }
        Ok(())
    }
}

/// Builds the in-flight scratch `AssistantMessage` from a provider's event
/// stream, block by block, so subscribers (and a future compaction pass
/// reading mid-turn) see partial content without it ever entering the
/// durable transcript (spec.md §9).
struct ScratchBuilder {
    provider: pi_llm::Provider,
    model: String,
    content: Vec<ContentBlock>,
    current_text: String,
    current_thinking: String,
}

impl ScratchBuilder {
    fn new(provider: pi_llm::Provider, model: &str) -> Self {
        Self {
            provider,
            model: model.to_string(),
            content: Vec::new(),
            current_text: String::new(),
            current_thinking: String::new(),
        }
    }

    fn apply(&mut self, event: &AssistantMessageEvent, transcript: &mut Transcript) {
        match event {
            AssistantMessageEvent::TextStart => self.current_text.clear(),
            AssistantMessageEvent::TextDelta { content, .. } => {
                self.current_text = content.clone();
                self.publish_scratch(transcript);
            }
            AssistantMessageEvent::TextEnd { content } => {
                self.content.push(ContentBlock::text(content.clone()));
                self.current_text.clear();
            }
            AssistantMessageEvent::ThinkingStart => self.current_thinking.clear(),
            AssistantMessageEvent::ThinkingDelta { content, .. } => {
                self.current_thinking = content.clone();
                self.publish_scratch(transcript);
            }
            AssistantMessageEvent::ThinkingEnd { content } => {
                self.content.push(ContentBlock::Thinking {
                    thinking: content.clone(),
                    signature: None,
                });
                self.current_thinking.clear();
            }
            AssistantMessageEvent::ToolCall { tool_call } => {
                self.content.push(ContentBlock::ToolCall {
                    id: tool_call.id.clone(),
                    name: tool_call.name.clone(),
                    arguments: tool_call.arguments.clone(),
                });
            }
            AssistantMessageEvent::Done { .. } => {
                transcript.set_in_flight_assistant(None);
            }
            AssistantMessageEvent::Start { .. } | AssistantMessageEvent::Error { .. } => {}
        }
    }

    fn publish_scratch(&self, transcript: &mut Transcript) {
        let mut content = self.content.clone();
        if !self.current_text.is_empty() {
            content.push(ContentBlock::text(self.current_text.clone()));
        }
        if !self.current_thinking.is_empty() {
            content.push(ContentBlock::Thinking {
                thinking: self.current_thinking.clone(),
                signature: None,
            });
        }
        transcript.set_in_flight_assistant(Some(AssistantMessage {
            content,
            provider: self.provider,
            api: pi_llm::Api::Anthropic,
            model: self.model.clone(),
            usage: pi_llm::Usage::default(),
            stop_reason: StopReason::Stop,
            error: None,
        }));
    }
}

/// Convert durable transcript messages into the narrower wire-facing shape
/// a `ChatProvider` consumes (spec.md §4.A). Shared with the compactor,
/// which builds its own one-off prompt from a transcript prefix.
pub(crate) fn to_prompt_messages(messages: &[Message]) -> Vec<PromptMessage> {
    messages
        .iter()
        .filter_map(|message| match message {
            Message::UserMessage { content, .. } => Some(PromptMessage {
                role: PromptRole::User,
                content: content.clone(),
            }),
            Message::AssistantMessage(assistant) => Some(PromptMessage {
                role: PromptRole::Assistant,
                content: assistant.content.clone(),
            }),
            Message::ToolResultMessage {
                tool_call_id,
                content,
                is_error,
                ..
            } => Some(PromptMessage {
                role: PromptRole::ToolResult,
                content: vec![ContentBlock::text(format!(
                    "[tool_result {tool_call_id}{}] {content}",
                    if *is_error { " error" } else { "" }
                ))],
            }),
            Message::CompactionSummaryMessage {
                summary,
                tokens_before,
            } => Some(PromptMessage {
                role: PromptRole::User,
                content: vec![ContentBlock::text(format!(
                    "Context compacted from {tokens_before} tokens:\n\n{summary}"
                ))],
            }),
            Message::CustomMessageEntry { .. } => None,
        })
        .collect()
}
