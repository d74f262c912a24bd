//! `Session`, the top-level controller (spec.md §4.F): owns the transcript,
//! extension dispatcher, tool registry, scheduler, subscriber bus and input
//! queue, and exposes `prompt`/`abort`/`compact`/`executeBash`/`subscribe`.
//! Grounded in the teacher's `event_bus.rs`-centred session shape, scaled
//! down to the single-session (no actor mesh) model spec.md §5 describes.

use crate::compaction::ContextCompactor;
use crate::config::{QueueMode, SessionConfig};
use crate::error::AgentError;
use crate::events::{EventBus, SharedEventBus};
use crate::extensions::{ExtensionDispatcher, SlashCommandDef};
use crate::scheduler::{SchedulerSettings, TurnScheduler};
use crate::tools::{ToolContext, ToolRegistry};
use crate::transcript::{Message, Transcript};
use pi_llm::{CancelSignal, ChatProvider};
use parking_lot::Mutex as SyncMutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

/// Result of `executeBash` (spec.md §4.F): runs outside the transcript,
/// bypassing the model entirely.
#[derive(Debug, Clone)]
pub struct BashResult {
    pub stdout: String,
    pub stderr: String,
    pub code: i32,
}

pub struct Session {
    config: SessionConfig,
    provider: Arc<dyn ChatProvider>,
    extensions: Arc<ExtensionDispatcher>,
    scheduler: TurnScheduler,
    compactor: ContextCompactor,
    tools: Arc<ToolRegistry>,
    commands: SyncMutex<Vec<SlashCommandDef>>,
    tool_ctx: Arc<dyn ToolContext>,
    transcript: AsyncMutex<Transcript>,
    queue: AsyncMutex<VecDeque<String>>,
    busy: AtomicBool,
    turn_cancel: SyncMutex<Option<CancelSignal>>,
    events: SharedEventBus,
    has_api_key: bool,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        provider: Arc<dyn ChatProvider>,
        tools: ToolRegistry,
        extensions: Vec<crate::extensions::LoadedExtension>,
        tool_ctx: Arc<dyn ToolContext>,
        has_api_key: bool,
    ) -> Self {
        let tools = Arc::new(tools);
        let extensions = Arc::new(ExtensionDispatcher::new(extensions, config.hook_timeout_ms));
        let events: SharedEventBus = Arc::new(EventBus::new());
        let scheduler_settings = SchedulerSettings {
            system_prompt: config.system_prompt.clone(),
            max_tokens: config.model.max_tokens,
            reasoning: config.reasoning_effort(),
            max_parallel_tools: config.max_parallel_tools,
        };
        let compactor = ContextCompactor::new().with_keep_tail(config.compaction_keep_tail);
        let scheduler = TurnScheduler::new(
            provider.clone(),
            tools.clone(),
            extensions.clone(),
            events.clone(),
            scheduler_settings,
        );
        Self {
            config,
            provider,
            extensions,
            scheduler,
            compactor,
            tools,
            commands: SyncMutex::new(Vec::new()),
            tool_ctx,
            transcript: AsyncMutex::new(Transcript::new()),
            queue: AsyncMutex::new(VecDeque::new()),
            busy: AtomicBool::new(false),
            turn_cancel: SyncMutex::new(None),
            events,
            has_api_key,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<crate::events::SessionEvent> {
        self.events.subscribe()
    }

    /// Run once before the first prompt (spec.md §4.D "session_start"):
    /// merge every extension-declared tool/command into this session, then
    /// run the `session_start` hooks. Spec.md §9: the registry is mutated
    /// only here and is read-only for the rest of the session's lifetime.
    pub async fn start(&self) {
        for tool in self.extensions.collect_tool_registrations() {
            self.tools.add(tool);
        }
        *self.commands.lock() = self.extensions.collect_command_registrations();

        let errors = self.extensions.dispatch_session_start().await;
        self.events.publish_hook_errors(errors);
    }

    /// Slash-commands registered by extensions during `start()`, alongside
    /// whatever built-ins the caller (an interactive CLI, out of scope
    /// here) already knows about (spec.md §6).
    pub fn registered_commands(&self) -> Vec<SlashCommandDef> {
        self.commands.lock().clone()
    }

    /// Names of every tool currently in the registry, including any merged
    /// in by `start()`.
    pub fn registered_tool_names(&self) -> Vec<String> {
        self.tools.names()
    }

    pub async fn shutdown(&self) {
        let errors = self.extensions.dispatch_session_shutdown().await;
        self.events.publish_hook_errors(errors);
    }

    /// Enqueue `text` and drive the scheduler (spec.md §4.E "Input queue").
    /// Rejects synchronously if no API key was configured for this
    /// session's provider (spec.md §7 `NoApiKey`).
    pub async fn prompt(&self, text: impl Into<String>) -> Result<(), AgentError> {
        if !self.has_api_key {
            return Err(AgentError::NoApiKey {
                provider: self.config.model.provider.clone(),
            });
        }
        self.queue.lock().await.push_back(text.into());
        self.drain_queue().await
    }

    /// Fire the active turn's cancel signal. Idempotent; a no-op if no turn
    /// is running (spec.md §5 "Cancellation").
    pub fn abort(&self) {
        if let Some(cancel) = self.turn_cancel.lock().clone() {
            cancel.fire();
        }
    }

    /// Compact the transcript (spec.md §4.G). Rejects with `Busy` while a
    /// turn is in progress.
    pub async fn compact(&self, custom_instructions: Option<&str>) -> Result<(), AgentError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(AgentError::Busy);
        }
        let mut transcript = self.transcript.lock().await;
        let outcome = self
            .compactor
            .compact(&mut transcript, self.provider.as_ref(), custom_instructions)
            .await?;
        self.events.publish_compaction(
            outcome.tokens_before,
            outcome.tokens_after,
            outcome.summary,
        );
        Ok(())
    }

    /// Run a shell command directly, outside the transcript, bypassing the
    /// model (spec.md §4.F). Rejected mid-turn, matching the `compact()`
    /// contract (open question in spec.md §9, resolved in DESIGN.md).
    pub async fn execute_bash(&self, command: &str) -> Result<BashResult, AgentError> {
        if self.busy.load(Ordering::SeqCst) {
            return Err(AgentError::Busy);
        }
        let output = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| AgentError::Internal(format!("failed to spawn shell: {e}")))?;
        Ok(BashResult {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code().unwrap_or(-1),
        })
    }

    /// Drain the queue one prompt (or, in `"all"` mode, one batch) at a
    /// time. A second concurrent call observes `busy` already set and
    /// returns immediately, trusting the active drain loop to pick up the
    /// entry it just queued.
    async fn drain_queue(&self) -> Result<(), AgentError> {
        if self.busy.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut outcome = Ok(());
        loop {
            let next_input = {
                let mut queue = self.queue.lock().await;
                if queue.is_empty() {
                    None
                } else {
                    match self.config.queue_mode {
                        QueueMode::OneAtATime => queue.pop_front(),
                        QueueMode::All => Some(queue.drain(..).collect::<Vec<_>>().join("\n\n")),
                    }
                }
            };
            let Some(input) = next_input else {
                break;
            };

            let cancel = CancelSignal::new();
            *self.turn_cancel.lock() = Some(cancel.clone());

            let run_result = {
                let mut transcript = self.transcript.lock().await;
                if let Err(e) = transcript.append(Message::user_text(input)) {
                    Err(e)
                } else {
                    self.scheduler
                        .run_prompt(&mut transcript, self.tool_ctx.clone(), cancel)
                        .await
                }
            };

            *self.turn_cancel.lock() = None;

            if let Err(e) = run_result {
                self.events.publish_error(e.to_string());
                outcome = Err(e);
                break;
            }
        }

        self.busy.store(false, Ordering::SeqCst);
        outcome
    }

    pub async fn transcript_snapshot(&self) -> Transcript {
        self.transcript.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::SessionEvent;
    use crate::extensions::{ExtensionHandler, LoadedExtension};
    use crate::tools::{ProgressUpdate, Tool, ToolError, ToolOutcome};
    use async_trait::async_trait;
    use pi_llm::{CancelSignal as Cancel, ProviderError, RawFrameStream, Transport};
    use serde_json::Value;
    use std::any::Any;
    use std::path::Path;
    use std::pin::Pin;

    struct ScriptedTransport {
        frames: Vec<&'static str>,
    }
    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn open_stream(
            &self,
            _request_body: Value,
            _cancel: Cancel,
        ) -> Result<RawFrameStream, ProviderError> {
            let frames = self.frames.clone();
            Ok(Box::pin(futures::stream::iter(
                frames.into_iter().map(|f| Ok(f.to_string())),
            )) as Pin<Box<_>>)
        }
    }

    struct NoopCtx;
    impl ToolContext for NoopCtx {
        fn session_id(&self) -> &str {
            "s"
        }
        fn cwd(&self) -> Option<&Path> {
            None
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn echo_session() -> Session {
        let frames = vec![
            r#"{"type":"message_start","message":{"usage":{"input_tokens":5,"output_tokens":0}}}"#,
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"text","text":""}}"#,
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"hi"}}"#,
            r#"{"type":"content_block_stop","index":0}"#,
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"},"usage":{"output_tokens":1}}"#,
            r#"{"type":"message_stop"}"#,
        ];
        let provider: Arc<dyn ChatProvider> = Arc::new(
            pi_llm::providers::anthropic::AnthropicAdapter::new(ScriptedTransport { frames }, "claude-test"),
        );
        Session::new(
            SessionConfig::new("anthropic", "claude-test"),
            provider,
            ToolRegistry::new(),
            Vec::<LoadedExtension>::new(),
            Arc::new(NoopCtx),
            true,
        )
    }

    #[tokio::test]
    async fn prompt_without_api_key_is_rejected_synchronously() {
        let mut session = echo_session();
        session.has_api_key = false;
        let err = session.prompt("hi").await.unwrap_err();
        assert!(matches!(err, AgentError::NoApiKey { .. }));
    }

    #[tokio::test]
    async fn prompt_runs_a_turn_and_emits_agent_end() {
        let session = echo_session();
        let mut rx = session.subscribe();
        session.prompt("say hi").await.unwrap();

        let transcript = session.transcript_snapshot().await;
        assert_eq!(transcript.messages().len(), 2);

        let mut saw_agent_end = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, SessionEvent::AgentEnd { .. }) {
                saw_agent_end = true;
            }
        }
        assert!(saw_agent_end);
    }

    struct GreeterTool;
    #[async_trait]
    impl Tool for GreeterTool {
        fn name(&self) -> &str {
            "greet"
        }
        fn description(&self) -> &str {
            "says hello"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(
            &self,
            _call_id: &str,
            _args: Value,
            _on_update: Option<ProgressUpdate>,
            _ctx: &dyn ToolContext,
            _cancel: Cancel,
        ) -> Result<ToolOutcome, ToolError> {
            Ok(ToolOutcome::text("hello"))
        }
    }

    struct RegisteringExtension;
    #[async_trait]
    impl ExtensionHandler for RegisteringExtension {
        fn register_tools(&self) -> Vec<Arc<dyn Tool>> {
            vec![Arc::new(GreeterTool)]
        }
        fn register_commands(&self) -> Vec<crate::extensions::SlashCommandDef> {
            vec![crate::extensions::SlashCommandDef {
                name: "greet".into(),
                description: "says hello".into(),
            }]
        }
    }

    #[tokio::test]
    async fn start_merges_extension_tools_and_commands_once() {
        let mut session = echo_session();
        session.extensions = Arc::new(crate::extensions::ExtensionDispatcher::new(
            vec![LoadedExtension {
                name: "greeter".into(),
                handlers: vec![Arc::new(RegisteringExtension)],
            }],
            session.config.hook_timeout_ms,
        ));

        assert!(session.registered_tool_names().is_empty());
        session.start().await;
        assert_eq!(session.registered_tool_names(), vec!["greet".to_string()]);
        assert_eq!(session.registered_commands().len(), 1);
        assert_eq!(session.registered_commands()[0].name, "greet");
    }

    #[tokio::test]
    async fn compact_rejects_while_busy() {
        let session = echo_session();
        session.busy.store(true, Ordering::SeqCst);
        let err = session.compact(None).await.unwrap_err();
        assert!(matches!(err, AgentError::Busy));
    }

    #[tokio::test]
    async fn abort_before_any_turn_is_a_harmless_no_op() {
        let session = echo_session();
        session.abort();
    }
}
