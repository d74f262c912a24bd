//! Canonical transcript model and its invariants (spec.md §3/§4.A).
//!
//! Grounded in the teacher's `model.rs`/`agent/messages.rs`: a tagged
//! message enum that round-trips through serde so a session can be
//! persisted, plus the mutation methods `append`/`append_tool_result`/
//! `replace_prefix`/`set_in_flight_assistant` that are the transcript's
//! only write surface (every other component sees `&Transcript`).

use crate::error::AgentError;
use chrono::{DateTime, Utc};
use pi_llm::{AssistantMessage, ContentBlock};
use serde::{Deserialize, Serialize};

/// One entry in the transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    UserMessage {
        content: Vec<ContentBlock>,
        timestamp: DateTime<Utc>,
    },
    AssistantMessage(AssistantMessage),
    ToolResultMessage {
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
        details: Option<serde_json::Value>,
    },
    CompactionSummaryMessage {
        summary: String,
        tokens_before: u64,
    },
    CustomMessageEntry {
        custom_type: String,
        content: serde_json::Value,
    },
}

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::UserMessage {
            content: vec![ContentBlock::text(text)],
            timestamp: Utc::now(),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        content: impl Into<String>,
        is_error: bool,
    ) -> Self {
        Message::ToolResultMessage {
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            content: content.into(),
            is_error,
            details: None,
        }
    }

    fn tool_calls(&self) -> Vec<&str> {
        match self {
            Message::AssistantMessage(m) => {
                m.tool_calls().into_iter().map(|(id, _, _)| id).collect()
            }
            _ => Vec::new(),
        }
    }
}

/// An ordered, append-mostly sequence of [`Message`]s plus the streaming
/// scratch state (spec.md §9 "streaming scratch state" design note): the
/// in-flight assistant message is deliberately not part of `messages`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    messages: Vec<Message>,
    #[serde(skip)]
    in_flight_assistant: Option<AssistantMessage>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn in_flight_assistant(&self) -> Option<&AssistantMessage> {
        self.in_flight_assistant.as_ref()
    }

    /// Append a message, checking invariants 1-5 of spec.md §3 hold
    /// afterwards.
    pub fn append(&mut self, message: Message) -> Result<(), AgentError> {
        self.messages.push(message);
        self.check_invariants()
    }

    /// Append a tool result for a call made by the most recent assistant
    /// message. Invariant 3: the call id must be unresolved.
    pub fn append_tool_result(
        &mut self,
        tool_call_id: &str,
        tool_name: &str,
        content: impl Into<String>,
        is_error: bool,
    ) -> Result<(), AgentError> {
        if self.resolved_call_ids().contains(&tool_call_id.to_string()) {
            return Err(AgentError::Internal(format!(
                "tool call {tool_call_id} already has a result"
            )));
        }
        if !self.unresolved_call_ids().contains(&tool_call_id.to_string()) {
            return Err(AgentError::Internal(format!(
                "no unresolved tool call with id {tool_call_id}"
            )));
        }
        self.append(Message::tool_result(
            tool_call_id,
            tool_name,
            content,
            is_error,
        ))
    }

    /// Replace the whole prefix of the transcript (compaction, spec.md
    /// §4.G step 5). `new_prefix` becomes the new head; everything at or
    /// after `keep_from` is retained verbatim.
    pub fn replace_prefix(
        &mut self,
        new_prefix: Vec<Message>,
        keep_from: usize,
    ) -> Result<(), AgentError> {
        let tail = self.messages.split_off(keep_from.min(self.messages.len()));
        self.messages = new_prefix;
        self.messages.extend(tail);
        self.check_invariants()
    }

    /// Update (or clear, with `None`) the streaming scratch state. Never
    /// observable through `messages()`.
    pub fn set_in_flight_assistant(&mut self, partial: Option<AssistantMessage>) {
        self.in_flight_assistant = partial;
    }

    /// Promote the in-flight scratch state to a durable transcript entry
    /// (called on the provider's `done` event).
    pub fn promote_in_flight(&mut self) -> Result<(), AgentError> {
        if let Some(message) = self.in_flight_assistant.take() {
            self.append(Message::AssistantMessage(message))?;
        }
        Ok(())
    }

    fn all_call_ids(&self) -> Vec<String> {
        self.messages
            .iter()
            .flat_map(|m| m.tool_calls())
            .map(String::from)
            .collect()
    }

    fn result_call_ids(&self) -> Vec<String> {
        self.messages
            .iter()
            .filter_map(|m| match m {
                Message::ToolResultMessage { tool_call_id, .. } => Some(tool_call_id.clone()),
                _ => None,
            })
            .collect()
    }

    fn resolved_call_ids(&self) -> Vec<String> {
        self.result_call_ids()
    }

    fn unresolved_call_ids(&self) -> Vec<String> {
        let resolved = self.result_call_ids();
        self.all_call_ids()
            .into_iter()
            .filter(|id| !resolved.contains(id))
            .collect()
    }

    /// Check the transcript invariants of spec.md §3. The assistant
    /// message allowed to have unresolved tool calls is only the very
    /// last message (a turn still in flight); any earlier assistant
    /// message with an unresolved call is a bug.
    pub fn check_invariants(&self) -> Result<(), AgentError> {
        let last_index = self.messages.len().saturating_sub(1);

        for (idx, message) in self.messages.iter().enumerate() {
            if let Message::AssistantMessage(assistant) = message {
                for (call_id, _, _) in assistant.tool_calls() {
                    let resolved = self.messages[idx + 1..]
                        .iter()
                        .take_while(|m| !matches!(m, Message::AssistantMessage(_)))
                        .any(|m| {
                            matches!(m, Message::ToolResultMessage { tool_call_id, .. } if tool_call_id == call_id)
                        });
                    if !resolved && idx != last_index {
                        return Err(AgentError::Internal(format!(
                            "tool call {call_id} at message {idx} has no matching result"
                        )));
                    }
                }
            }
        }

        // Invariant 3: no tool result without a preceding call with the same id.
        for (idx, message) in self.messages.iter().enumerate() {
            if let Message::ToolResultMessage { tool_call_id, .. } = message {
                let has_preceding_call = self.messages[..idx].iter().rev().any(|m| {
                    matches!(m, Message::AssistantMessage(a) if a.tool_calls().iter().any(|(id, _, _)| id == tool_call_id))
                });
                if !has_preceding_call {
                    return Err(AgentError::Internal(format!(
                        "tool result {tool_call_id} at message {idx} has no preceding call"
                    )));
                }
            }
        }

        // Invariant 2: tool results for an assistant message are contiguous
        // immediately after it.
        let mut idx = 0;
        while idx < self.messages.len() {
            if let Message::AssistantMessage(assistant) = &self.messages[idx] {
                let expected_ids: std::collections::HashSet<&str> = assistant
                    .tool_calls()
                    .into_iter()
                    .map(|(id, _, _)| id)
                    .collect();
                if !expected_ids.is_empty() {
                    let mut seen = std::collections::HashSet::new();
                    let mut cursor = idx + 1;
                    while cursor < self.messages.len() {
                        match &self.messages[cursor] {
                            Message::ToolResultMessage { tool_call_id, .. }
                                if expected_ids.contains(tool_call_id.as_str()) =>
                            {
                                seen.insert(tool_call_id.clone());
                                cursor += 1;
                            }
                            _ => break,
                        }
                    }
                    if seen.len() != expected_ids.len() && cursor < self.messages.len() {
                        if let Message::ToolResultMessage { tool_call_id, .. } =
                            &self.messages[cursor]
                        {
                            if expected_ids.contains(tool_call_id.as_str()) {
                                return Err(AgentError::Internal(
                                    "tool results are not contiguous".into(),
                                ));
                            }
                        }
                    }
                }
            }
            idx += 1;
        }

        // Invariant 4: compaction summaries are top-level, never between a
        // tool call and its results.
        for (idx, message) in self.messages.iter().enumerate() {
            if matches!(message, Message::CompactionSummaryMessage { .. }) && idx > 0 {
                if let Message::AssistantMessage(prev) = &self.messages[idx - 1] {
                    if prev.has_tool_calls() {
                        return Err(AgentError::Internal(
                            "compaction summary appears inside an open tool-call pair".into(),
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pi_llm::{Api, Provider, StopReason, Usage};

    fn assistant_with_tool_call(call_id: &str) -> Message {
        Message::AssistantMessage(AssistantMessage {
            content: vec![ContentBlock::ToolCall {
                id: call_id.into(),
                name: "calc".into(),
                arguments: serde_json::json!({}),
            }],
            provider: Provider::Anthropic,
            api: Api::Anthropic,
            model: "claude".into(),
            usage: Usage::default(),
            stop_reason: StopReason::ToolUse,
            error: None,
        })
    }

    #[test]
    fn unresolved_tool_call_on_last_message_is_allowed() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user_text("hi")).unwrap();
        transcript.append(assistant_with_tool_call("call_1")).unwrap();
        assert!(transcript.check_invariants().is_ok());
    }

    #[test]
    fn resolved_tool_call_satisfies_invariants() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user_text("hi")).unwrap();
        transcript.append(assistant_with_tool_call("call_1")).unwrap();
        transcript
            .append_tool_result("call_1", "calc", "4", false)
            .unwrap();
        transcript.append(Message::user_text("thanks")).unwrap();
        assert!(transcript.check_invariants().is_ok());
    }

    #[test]
    fn duplicate_tool_result_is_rejected() {
        let mut transcript = Transcript::new();
        transcript.append(assistant_with_tool_call("call_1")).unwrap();
        transcript
            .append_tool_result("call_1", "calc", "4", false)
            .unwrap();
        let err = transcript.append_tool_result("call_1", "calc", "4", false);
        assert!(err.is_err());
    }

    #[test]
    fn replace_prefix_keeps_tail_and_invariants() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user_text("one")).unwrap();
        transcript.append(assistant_with_tool_call("call_1")).unwrap();
        transcript
            .append_tool_result("call_1", "calc", "4", false)
            .unwrap();
        transcript.append(Message::user_text("two")).unwrap();

        transcript
            .replace_prefix(
                vec![Message::CompactionSummaryMessage {
                    summary: "summary".into(),
                    tokens_before: 100,
                }],
                3,
            )
            .unwrap();

        assert_eq!(transcript.messages().len(), 2);
        assert!(matches!(
            transcript.messages()[0],
            Message::CompactionSummaryMessage { .. }
        ));
    }
}
