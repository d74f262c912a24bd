//! `ExtensionHandler`/`ExtensionDispatcher` — our `MiddlewareDriver`/
//! `CompositeDriver` analogue (teacher: `middleware/driver.rs`). Handlers
//! run sequentially per extension in registration order, all extensions in
//! load order, each wrapped in a `hookTimeoutMs` timeout; a handler that
//! times out or errors emits `hook_error` and the turn continues
//! (spec.md §4.D/§7).

use crate::tools::{Tool, ToolCallRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Returned by a `tool_call` handler to veto the call (spec.md §4.D).
#[derive(Debug, Clone)]
pub struct ToolCallBlock {
    pub reason: String,
}

/// Returned by a `branch` handler to select a branch (spec.md §4.D).
#[derive(Debug, Clone)]
pub struct BranchOutcome {
    pub branch: String,
}

/// A slash-command an extension declares at `session_start` (spec.md §6
/// "extensions may register more"). Execution is an interactive-mode/CLI
/// concern out of scope here; this is the registration record a CLI would
/// look up by name.
#[derive(Debug, Clone)]
pub struct SlashCommandDef {
    pub name: String,
    pub description: String,
}

/// One handler an extension installs. Every method defaults to a no-op so
/// an extension only overrides the events it cares about, the same shape
/// as the teacher's `MiddlewareDriver`.
#[async_trait]
pub trait ExtensionHandler: Send + Sync {
    async fn on_session_start(&self) {}
    async fn on_session_shutdown(&self) {}
    async fn on_turn_start(&self) {}
    async fn on_turn_end(&self) {}
    async fn on_agent_start(&self) {}
    async fn on_agent_end(&self) {}

    /// Called before executing a tool. Returning `Some` blocks the call
    /// with the given reason; first block wins across all handlers.
    async fn on_tool_call(&self, _call: &ToolCallRequest) -> Option<ToolCallBlock> {
        None
    }

    /// Called after a tool completes. Reserved for future result mutation
    /// (spec.md §4.D "may mutate result via return value (future)").
    async fn on_tool_result(&self, _call_id: &str, _is_error: bool) {}

    /// Explicit branch point; first non-`None` return across all handlers
    /// wins.
    async fn on_branch(&self, _branch_point: &str, _context: &Value) -> Option<BranchOutcome> {
        None
    }

    /// Tools to merge into the session's registry. Only consulted once, at
    /// `session_start` (spec.md §4.D/§9); calling this afterwards is not
    /// honoured, matching the write-capability spec.md §9 describes.
    fn register_tools(&self) -> Vec<Arc<dyn Tool>> {
        Vec::new()
    }

    /// Slash-commands to advertise alongside the built-ins (spec.md §6).
    fn register_commands(&self) -> Vec<SlashCommandDef> {
        Vec::new()
    }
}

/// An extension loaded at session start: a name (for diagnostics) plus its
/// handlers in registration order.
pub struct LoadedExtension {
    pub name: String,
    pub handlers: Vec<Arc<dyn ExtensionHandler>>,
}

/// Emitted to subscribers when a handler times out or is asked to run
/// after a terminal hook_error (spec.md §4.D).
#[derive(Debug, Clone)]
pub struct HookError {
    pub extension: String,
    pub event: &'static str,
    pub message: String,
}

/// Runs handlers from every loaded extension, in load order, with a
/// per-invocation timeout.
pub struct ExtensionDispatcher {
    extensions: Vec<LoadedExtension>,
    hook_timeout: Duration,
}

impl ExtensionDispatcher {
    pub fn new(extensions: Vec<LoadedExtension>, hook_timeout_ms: u64) -> Self {
        Self {
            extensions,
            hook_timeout: Duration::from_millis(hook_timeout_ms),
        }
    }

    pub fn extensions(&self) -> &[LoadedExtension] {
        &self.extensions
    }

    /// Collect every tool every handler of every loaded extension wants
    /// merged into the registry. Called exactly once, from `Session::start`,
    /// before the registry is ever read by a running turn (spec.md §4.D/§9).
    pub fn collect_tool_registrations(&self) -> Vec<Arc<dyn Tool>> {
        self.extensions
            .iter()
            .flat_map(|ext| {
                ext.handlers.iter().flat_map(|handler| {
                    let tools = handler.register_tools();
                    if !tools.is_empty() {
                        tracing::debug!(
                            extension = %ext.name,
                            count = tools.len(),
                            "registering extension tools"
                        );
                    }
                    tools
                })
            })
            .collect()
    }

    /// Collect every slash-command every handler of every loaded extension
    /// wants to advertise (spec.md §6). Same one-shot timing as
    /// [`Self::collect_tool_registrations`].
    pub fn collect_command_registrations(&self) -> Vec<SlashCommandDef> {
        self.extensions
            .iter()
            .flat_map(|ext| ext.handlers.iter().flat_map(|handler| handler.register_commands()))
            .collect()
    }

    async fn run_timed<F, Fut, T>(
        &self,
        extension_name: &str,
        event: &'static str,
        errors: &mut Vec<HookError>,
        f: F,
    ) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        match tokio::time::timeout(self.hook_timeout, f()).await {
            Ok(value) => Some(value),
            Err(_) => {
                errors.push(HookError {
                    extension: extension_name.to_string(),
                    event,
                    message: format!("timed out after {}ms", self.hook_timeout.as_millis()),
                });
                None
            }
        }
    }

    pub async fn dispatch_session_start(&self) -> Vec<HookError> {
        let mut errors = Vec::new();
        for ext in &self.extensions {
            for handler in &ext.handlers {
                self.run_timed(&ext.name, "session_start", &mut errors, || {
                    handler.on_session_start()
                })
                .await;
            }
        }
        errors
    }

    pub async fn dispatch_session_shutdown(&self) -> Vec<HookError> {
        let mut errors = Vec::new();
        for ext in &self.extensions {
            for handler in &ext.handlers {
                self.run_timed(&ext.name, "session_shutdown", &mut errors, || {
                    handler.on_session_shutdown()
                })
                .await;
            }
        }
        errors
    }

    pub async fn dispatch_turn_start(&self) -> Vec<HookError> {
        self.dispatch_ignored("turn_start", |h| h.on_turn_start())
            .await
    }

    pub async fn dispatch_turn_end(&self) -> Vec<HookError> {
        self.dispatch_ignored("turn_end", |h| h.on_turn_end()).await
    }

    pub async fn dispatch_agent_start(&self) -> Vec<HookError> {
        self.dispatch_ignored("agent_start", |h| h.on_agent_start())
            .await
    }

    pub async fn dispatch_agent_end(&self) -> Vec<HookError> {
        self.dispatch_ignored("agent_end", |h| h.on_agent_end()).await
    }

    async fn dispatch_ignored<F, Fut>(&self, event: &'static str, f: F) -> Vec<HookError>
    where
        F: Fn(&Arc<dyn ExtensionHandler>) -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        let mut errors = Vec::new();
        for ext in &self.extensions {
            for handler in &ext.handlers {
                self.run_timed(&ext.name, event, &mut errors, || f(handler)).await;
            }
        }
        errors
    }

    /// First-block-wins across every handler of every extension, in load
    /// order (spec.md §4.D). Returns the block (if any) plus any
    /// `hook_error`s observed along the way — handlers after the first
    /// block are never invoked.
    pub async fn dispatch_tool_call(
        &self,
        call: &ToolCallRequest,
    ) -> (Option<ToolCallBlock>, Vec<HookError>) {
        let mut errors = Vec::new();
        for ext in &self.extensions {
            for handler in &ext.handlers {
                if let Some(block) = self
                    .run_timed(&ext.name, "tool_call", &mut errors, || {
                        handler.on_tool_call(call)
                    })
                    .await
                    .flatten()
                {
                    return (Some(block), errors);
                }
            }
        }
        (None, errors)
    }

    pub async fn dispatch_tool_result(&self, call_id: &str, is_error: bool) -> Vec<HookError> {
        let mut errors = Vec::new();
        for ext in &self.extensions {
            for handler in &ext.handlers {
                self.run_timed(&ext.name, "tool_result", &mut errors, || {
                    handler.on_tool_result(call_id, is_error)
                })
                .await;
            }
        }
        errors
    }

    /// First-non-`None`-wins across every handler (spec.md §4.D).
    pub async fn dispatch_branch(
        &self,
        branch_point: &str,
        context: &Value,
    ) -> (Option<BranchOutcome>, Vec<HookError>) {
        let mut errors = Vec::new();
        for ext in &self.extensions {
            for handler in &ext.handlers {
                if let Some(outcome) = self
                    .run_timed(&ext.name, "branch", &mut errors, || {
                        handler.on_branch(branch_point, context)
                    })
                    .await
                    .flatten()
                {
                    return (Some(outcome), errors);
                }
            }
        }
        (None, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct BlockingHandler;
    #[async_trait]
    impl ExtensionHandler for BlockingHandler {
        async fn on_tool_call(&self, call: &ToolCallRequest) -> Option<ToolCallBlock> {
            if call.name == "bash" {
                Some(ToolCallBlock {
                    reason: "no rm".into(),
                })
            } else {
                None
            }
        }
    }

    struct SlowHandler;
    #[async_trait]
    impl ExtensionHandler for SlowHandler {
        async fn on_turn_start(&self) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    struct CountingHandler {
        calls: Arc<std::sync::atomic::AtomicUsize>,
    }
    #[async_trait]
    impl ExtensionHandler for CountingHandler {
        async fn on_tool_call(&self, _call: &ToolCallRequest) -> Option<ToolCallBlock> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            None
        }
    }

    #[tokio::test]
    async fn first_block_wins_and_short_circuits_later_handlers() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let dispatcher = ExtensionDispatcher::new(
            vec![LoadedExtension {
                name: "safety".into(),
                handlers: vec![
                    Arc::new(BlockingHandler),
                    Arc::new(CountingHandler { calls: calls.clone() }),
                ],
            }],
            1000,
        );
        let call = ToolCallRequest {
            call_id: "1".into(),
            name: "bash".into(),
            arguments: json!({"command": "rm -rf /"}),
        };
        let (block, errors) = dispatcher.dispatch_tool_call(&call).await;
        assert!(errors.is_empty());
        assert_eq!(block.unwrap().reason, "no rm");
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn non_blocking_call_runs_every_handler() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let dispatcher = ExtensionDispatcher::new(
            vec![LoadedExtension {
                name: "safety".into(),
                handlers: vec![Arc::new(CountingHandler { calls: calls.clone() })],
            }],
            1000,
        );
        let call = ToolCallRequest {
            call_id: "1".into(),
            name: "read".into(),
            arguments: json!({}),
        };
        let (block, _) = dispatcher.dispatch_tool_call(&call).await;
        assert!(block.is_none());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    struct NoopTool;
    #[async_trait]
    impl Tool for NoopTool {
        fn name(&self) -> &str {
            "noop"
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _call_id: &str,
            _args: Value,
            _on_update: Option<crate::tools::ProgressUpdate>,
            _ctx: &dyn crate::tools::ToolContext,
            _cancel: pi_llm::CancelSignal,
        ) -> Result<crate::tools::ToolOutcome, crate::tools::ToolError> {
            Ok(crate::tools::ToolOutcome::text("noop"))
        }
    }

    struct RegisteringHandler;
    #[async_trait]
    impl ExtensionHandler for RegisteringHandler {
        fn register_tools(&self) -> Vec<Arc<dyn Tool>> {
            vec![Arc::new(NoopTool)]
        }
        fn register_commands(&self) -> Vec<SlashCommandDef> {
            vec![SlashCommandDef {
                name: "hello".into(),
                description: "says hi".into(),
            }]
        }
    }

    #[tokio::test]
    async fn collects_tool_and_command_registrations_across_extensions() {
        let dispatcher = ExtensionDispatcher::new(
            vec![
                LoadedExtension {
                    name: "a".into(),
                    handlers: vec![Arc::new(RegisteringHandler)],
                },
                LoadedExtension {
                    name: "b".into(),
                    handlers: vec![Arc::new(BlockingHandler)],
                },
            ],
            1000,
        );
        let tools = dispatcher.collect_tool_registrations();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name(), "noop");

        let commands = dispatcher.collect_command_registrations();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].name, "hello");
    }

    #[tokio::test]
    async fn timeout_emits_hook_error_but_does_not_panic() {
        let dispatcher = ExtensionDispatcher::new(
            vec![LoadedExtension {
                name: "slow".into(),
                handlers: vec![Arc::new(SlowHandler)],
            }],
            5,
        );
        let errors = dispatcher.dispatch_turn_start().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].event, "turn_start");
    }
}
