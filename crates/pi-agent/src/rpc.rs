//! Line-delimited JSON RPC wire protocol (spec.md §6 "RPC mode wire
//! protocol"): reads one JSON command per stdin line, forwards every
//! session event plus `bash_end`/`compaction`/`error` as one JSON object
//! per stdout line. Grounded in the teacher's `stdio.rs` transport shape,
//! narrowed to this crate's single-session scope.

use crate::events::SessionEvent;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::Mutex as AsyncMutex;

/// One line of RPC input (spec.md §6).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RpcCommand {
    Prompt {
        message: String,
        #[serde(default)]
        attachments: Vec<serde_json::Value>,
    },
    Abort,
    Compact {
        #[serde(rename = "customInstructions")]
        custom_instructions: Option<String>,
    },
    Bash {
        command: String,
    },
}

/// One line of RPC output: every `SessionEvent`, plus the two RPC-only
/// shapes spec.md §6 adds (`bash_end`, `error`).
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RpcOutput {
    Session(SessionEvent),
    BashEnd {
        #[serde(rename = "type")]
        kind: &'static str,
        stdout: String,
        stderr: String,
        code: i32,
    },
    Error {
        #[serde(rename = "type")]
        kind: &'static str,
        error: String,
    },
}

impl RpcOutput {
    fn bash_end(stdout: String, stderr: String, code: i32) -> Self {
        RpcOutput::BashEnd {
            kind: "bash_end",
            stdout,
            stderr,
            code,
        }
    }

    fn error(error: String) -> Self {
        RpcOutput::Error { kind: "error", error }
    }
}

/// Drive `session` from line-delimited JSON on `stdin`, writing every
/// output line to `out`. Returns once stdin hits EOF (spec.md §6 "Exit
/// code: 0 on stdin EOF").
pub async fn run<R, W>(session: Arc<Session>, stdin: R, out: W) -> std::io::Result<()>
where
    R: tokio::io::AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let out = Arc::new(AsyncMutex::new(out));

    let forwarder = {
        let out = out.clone();
        let mut events = session.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let mut guard = out.lock().await;
                if write_line(&mut *guard, &RpcOutput::Session(event)).await.is_err() {
                    break;
                }
            }
        })
    };

    let mut lines = BufReader::new(stdin).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let command: Result<RpcCommand, _> = serde_json::from_str(&line);
        let output = match command {
            Ok(RpcCommand::Prompt { message, .. }) => {
                session.prompt(message).await.err().map(|e| e.to_string())
            }
            Ok(RpcCommand::Abort) => {
                session.abort();
                None
            }
            Ok(RpcCommand::Compact { custom_instructions }) => session
                .compact(custom_instructions.as_deref())
                .await
                .err()
                .map(|e| e.to_string()),
            Ok(RpcCommand::Bash { command }) => match session.execute_bash(&command).await {
                Ok(result) => {
                    let mut guard = out.lock().await;
                    write_line(
                        &mut *guard,
                        &RpcOutput::bash_end(result.stdout, result.stderr, result.code),
                    )
                    .await?;
                    None
                }
                Err(e) => Some(e.to_string()),
            },
            Err(e) => Some(format!("invalid command: {e}")),
        };

        if let Some(message) = output {
            let mut guard = out.lock().await;
            write_line(&mut *guard, &RpcOutput::error(message)).await?;
        }
    }

    forwarder.abort();
    Ok(())
}

async fn write_line<W: AsyncWrite + Unpin>(out: &mut W, value: &RpcOutput) -> std::io::Result<()> {
    let mut line = serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string());
    line.push('\n');
    out.write_all(line.as_bytes()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_command_parses_from_json() {
        let raw = r#"{"type":"prompt","message":"say hi"}"#;
        let command: RpcCommand = serde_json::from_str(raw).unwrap();
        assert!(matches!(command, RpcCommand::Prompt { message, .. } if message == "say hi"));
    }

    #[test]
    fn compact_command_parses_optional_instructions() {
        let raw = r#"{"type":"compact"}"#;
        let command: RpcCommand = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            command,
            RpcCommand::Compact {
                custom_instructions: None
            }
        ));
    }

    #[test]
    fn bash_end_serialises_with_tag() {
        let output = RpcOutput::bash_end("ok".into(), String::new(), 0);
        let json = serde_json::to_string(&output).unwrap();
        assert!(json.contains("\"type\":\"bash_end\""));
    }
}
