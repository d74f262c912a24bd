//! Tool dispatch and bounded-concurrency execution (spec.md §4.C), grounded
//! in the teacher's use of `tokio::task::JoinSet` for bounded fan-out
//! (`event_bus.rs`'s observer tasks follow the same shape).

use super::context::{Tool, ToolContext, ToolError, ToolOutcome};
use super::registry::ToolRegistry;
use pi_llm::CancelSignal;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// A tool call extracted from an assistant message, in the order the model
/// requested it (spec.md §4.C "call order").
#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub call_id: String,
    pub name: String,
    pub arguments: Value,
}

/// The settled outcome of one dispatched call, still tagged with its call
/// id so the caller can append results in call order (spec.md invariant 2).
pub struct ToolCallResult {
    pub call_id: String,
    pub tool_name: String,
    pub outcome: ToolOutcome,
}

/// Dispatches a batch of tool calls from one assistant message with bounded
/// concurrency. Results are returned in the same order `calls` was given,
/// not completion order — callers append them to the transcript in that
/// order to satisfy spec.md §4.C/§3 invariant 2.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    max_parallel: usize,
}

impl ToolExecutor {
    pub fn new(registry: Arc<ToolRegistry>, max_parallel: usize) -> Self {
        Self {
            registry,
            max_parallel: max_parallel.max(1),
        }
    }

    /// Validate `arguments` against `tool`'s JSON-Schema, collecting every
    /// violation as `  - <jsonPointer>: <message>` (spec.md §4.C.2).
    fn validate(tool: &dyn Tool, arguments: &Value) -> Result<(), String> {
        let schema = tool.parameters();
        let validator = match jsonschema::validator_for(&schema) {
            Ok(v) => v,
            Err(e) => return Err(format!("  - <schema>: invalid tool schema: {e}")),
        };
        let errors: Vec<String> = validator
            .iter_errors(arguments)
            .map(|e| format!("  - {}: {}", e.instance_path, e))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }

    /// Run one already-resolved-and-validated call. Unknown-tool and
    /// schema-validation failures never reach this point; they're handled
    /// in [`Self::execute_all`] before dispatch.
    async fn run_one(
        tool: Arc<dyn Tool>,
        call: ToolCallRequest,
        ctx: Arc<dyn ToolContext>,
        cancel: CancelSignal,
    ) -> ToolCallResult {
        let outcome = match tool
            .execute(&call.call_id, call.arguments.clone(), None, ctx.as_ref(), cancel)
            .await
        {
            Ok(outcome) => outcome,
            Err(ToolError::InvalidArguments(msg)) => ToolOutcome::error(msg),
            Err(ToolError::Execution(msg)) => ToolOutcome::error(msg),
            Err(ToolError::Other(err)) => ToolOutcome::error(err.to_string()),
        };
        ToolCallResult {
            call_id: call.call_id,
            tool_name: call.name,
            outcome,
        }
    }

    /// Dispatch every call in `calls`, up to `max_parallel` concurrently,
    /// and return results in call order. Calls whose name isn't registered
    /// synthesise an `isError=true` result without ever touching the
    /// worker pool (spec.md §4.C.1).
    pub async fn execute_all(
        &self,
        calls: Vec<ToolCallRequest>,
        ctx: Arc<dyn ToolContext>,
        cancel: CancelSignal,
    ) -> Vec<ToolCallResult> {
        let mut results: Vec<Option<ToolCallResult>> = (0..calls.len()).map(|_| None).collect();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut join_set: JoinSet<(usize, ToolCallResult)> = JoinSet::new();

        for (index, call) in calls.into_iter().enumerate() {
            if cancel.is_fired() {
                results[index] = Some(ToolCallResult {
                    call_id: call.call_id,
                    tool_name: call.name,
                    outcome: ToolOutcome::error("aborted"),
                });
                continue;
            }

            let Some(tool) = self.registry.find(&call.name) else {
                results[index] = Some(ToolCallResult {
                    tool_name: call.name.clone(),
                    outcome: ToolOutcome::error(format!("unknown tool: {}", call.name)),
                    call_id: call.call_id,
                });
                continue;
            };

            if let Err(validation_errors) = Self::validate(tool.as_ref(), &call.arguments) {
                results[index] = Some(ToolCallResult {
                    tool_name: call.name.clone(),
                    outcome: ToolOutcome::error(format!(
                        "{validation_errors}\nreceived arguments: {}",
                        call.arguments
                    )),
                    call_id: call.call_id,
                });
                continue;
            }

            let semaphore = semaphore.clone();
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                (index, Self::run_one(tool, call, ctx, cancel).await)
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(join_err) => {
                    tracing::error!("tool task panicked: {join_err}");
                }
            }
        }

        results.into_iter().map(|r| r.expect("every slot filled")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::context::ProgressUpdate;
    use async_trait::async_trait;
    use serde_json::json;
    use std::any::Any;
    use std::time::Duration;
    use tokio::sync::Mutex;

    struct SleepTool {
        millis: u64,
        order: Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    }

    #[async_trait]
    impl Tool for SleepTool {
        fn name(&self) -> &str {
            self.label
        }
        fn description(&self) -> &str {
            "sleeps then records completion order"
        }
        fn parameters(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(
            &self,
            _call_id: &str,
            _args: Value,
            _on_update: Option<ProgressUpdate>,
            _ctx: &dyn ToolContext,
            _cancel: CancelSignal,
        ) -> Result<ToolOutcome, ToolError> {
            tokio::time::sleep(Duration::from_millis(self.millis)).await;
            self.order.lock().await.push(self.label);
            Ok(ToolOutcome::text(self.label))
        }
    }

    struct NoopCtx;
    impl ToolContext for NoopCtx {
        fn session_id(&self) -> &str {
            "s"
        }
        fn cwd(&self) -> Option<&std::path::Path> {
            None
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[tokio::test]
    async fn results_preserve_call_order_not_completion_order() {
        let completion_order = Arc::new(Mutex::new(Vec::new()));
        let registry = ToolRegistry::new();
        registry.add(Arc::new(SleepTool {
            millis: 100,
            order: completion_order.clone(),
            label: "slow",
        }));
        registry.add(Arc::new(SleepTool {
            millis: 10,
            order: completion_order.clone(),
            label: "fast",
        }));
        let executor = ToolExecutor::new(Arc::new(registry), 4);
        let calls = vec![
            ToolCallRequest {
                call_id: "a".into(),
                name: "slow".into(),
                arguments: json!({}),
            },
            ToolCallRequest {
                call_id: "b".into(),
                name: "fast".into(),
                arguments: json!({}),
            },
        ];
        let results = executor
            .execute_all(calls, Arc::new(NoopCtx), CancelSignal::new())
            .await;

        assert_eq!(results[0].call_id, "a");
        assert_eq!(results[1].call_id, "b");
        assert_eq!(*completion_order.lock().await, vec!["fast", "slow"]);
    }

    #[tokio::test]
    async fn unknown_tool_synthesises_error_without_aborting_others() {
        let executor = ToolExecutor::new(Arc::new(ToolRegistry::new()), 2);
        let results = executor
            .execute_all(
                vec![ToolCallRequest {
                    call_id: "a".into(),
                    name: "does-not-exist".into(),
                    arguments: json!({}),
                }],
                Arc::new(NoopCtx),
                CancelSignal::new(),
            )
            .await;
        assert!(results[0].outcome.is_error);
        assert!(results[0].outcome.canonical_output().contains("unknown tool"));
    }

    #[tokio::test]
    async fn schema_validation_failure_reports_json_pointer() {
        struct StrictTool;
        #[async_trait]
        impl Tool for StrictTool {
            fn name(&self) -> &str {
                "strict"
            }
            fn description(&self) -> &str {
                "requires an integer 'count'"
            }
            fn parameters(&self) -> Value {
                json!({
                    "type": "object",
                    "properties": {"count": {"type": "integer"}},
                    "required": ["count"]
                })
            }
            async fn execute(
                &self,
                _call_id: &str,
                _args: Value,
                _on_update: Option<ProgressUpdate>,
                _ctx: &dyn ToolContext,
                _cancel: CancelSignal,
            ) -> Result<ToolOutcome, ToolError> {
                Ok(ToolOutcome::text("ok"))
            }
        }
        let registry = ToolRegistry::new();
        registry.add(Arc::new(StrictTool));
        let executor = ToolExecutor::new(Arc::new(registry), 2);
        let results = executor
            .execute_all(
                vec![ToolCallRequest {
                    call_id: "a".into(),
                    name: "strict".into(),
                    arguments: json!({"count": "not a number"}),
                }],
                Arc::new(NoopCtx),
                CancelSignal::new(),
            )
            .await;
        assert!(results[0].outcome.is_error);
        assert!(results[0].outcome.canonical_output().contains("/count"));
    }
}
