// SPDX-License-Identifier: MIT OR Apache-2.0
//! asb-exec
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Local agent invocation for Agent Switchboard.
//!
//! The executor spawns the configured agent command in a service working
//! directory, reads its stdout as streamed JSON chunks, classifies each
//! chunk, and forwards them synchronously through the caller's `on_output`
//! hook in production order. Stderr is surfaced through `tracing` at warn
//! level. A hard per-invocation timeout kills the process.

use asb_core::{InvokeOutcome, OutputChunk, TokenUsage};
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Errors from a local invocation.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    /// The agent command is empty or unparseable.
    #[error("invalid agent command: {0}")]
    InvalidCommand(String),

    /// The agent process could not be spawned.
    #[error("failed to spawn agent process: {0}")]
    Spawn(std::io::Error),

    /// Reading agent output failed.
    #[error("agent i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The invocation exceeded its hard timeout and was killed.
    #[error("agent invocation timed out after {secs}s")]
    Timeout {
        /// The configured timeout in seconds.
        secs: u64,
    },
}

/// One local invocation.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Prompt handed to the agent.
    pub prompt: String,
    /// Working directory to run in.
    pub cwd: PathBuf,
    /// Hard timeout for the whole invocation.
    pub timeout: Duration,
    /// Preferred model, if configured.
    pub model: Option<String>,
    /// Budget cap in US dollars, if configured.
    pub budget_cap: Option<f64>,
}

/// Spawns and supervises local agent processes.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    program: String,
    base_args: Vec<String>,
}

impl LocalExecutor {
    /// Build an executor from an agent command line (program plus leading
    /// arguments, whitespace-separated).
    pub fn new(agent_cmd: &str) -> Result<Self, ExecError> {
        let mut parts = agent_cmd.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| ExecError::InvalidCommand(agent_cmd.to_string()))?;
        Ok(Self {
            program,
            base_args: parts.collect(),
        })
    }

    /// Run one invocation, forwarding each output chunk through
    /// `on_output` as it is produced.
    ///
    /// A non-zero exit or an error result chunk yields an
    /// `InvokeOutcome { success: false, .. }`; spawn failures and the hard
    /// timeout surface as [`ExecError`].
    pub async fn invoke<F>(
        &self,
        req: InvokeRequest,
        mut on_output: F,
    ) -> Result<InvokeOutcome, ExecError>
    where
        F: FnMut(OutputChunk) + Send,
    {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.base_args)
            .arg("-p")
            .arg(&req.prompt)
            .args(["--output-format", "stream-json"])
            .current_dir(&req.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(model) = &req.model {
            cmd.args(["--model", model]);
        }
        if let Some(cap) = req.budget_cap {
            cmd.arg("--max-budget-usd").arg(cap.to_string());
        }

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(ExecError::Spawn)?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::Spawn(std::io::Error::other("stdout unavailable")))?;

        // Forward stderr via tracing.
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let trimmed = line.trim_end();
                    if !trimmed.is_empty() {
                        warn!(target: "asb_exec.stderr", "{trimmed}");
                    }
                }
            });
        }

        let run = async {
            let mut summary = ResultSummary::default();
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                match classify_line(&line) {
                    Classified::Chunk(chunk) => on_output(chunk),
                    Classified::Result(s) => summary = s,
                    Classified::Skip => {}
                }
            }
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((status, summary))
        };

        let (status, summary) = match tokio::time::timeout(req.timeout, run).await {
            Ok(result) => result?,
            Err(_) => {
                // `kill_on_drop` reaps the child once it goes out of scope.
                return Err(ExecError::Timeout {
                    secs: req.timeout.as_secs(),
                });
            }
        };

        let success = status.success() && !summary.is_error;
        let error = if success {
            None
        } else if summary.is_error {
            Some(
                summary
                    .error
                    .unwrap_or_else(|| "agent reported an error result".to_string()),
            )
        } else {
            Some(format!(
                "agent process exited with {}",
                status
                    .code()
                    .map_or_else(|| "signal".to_string(), |c| format!("code {c}"))
            ))
        };

        Ok(InvokeOutcome {
            success,
            duration_ms: started.elapsed().as_millis() as u64,
            cost_usd: summary.cost_usd,
            num_turns: summary.num_turns,
            token_usage: summary.token_usage,
            model: summary.model,
            error,
        })
    }
}

/// Terminal `result` chunk fields, parsed best-effort.
#[derive(Debug, Default)]
struct ResultSummary {
    is_error: bool,
    error: Option<String>,
    cost_usd: Option<f64>,
    num_turns: Option<u32>,
    token_usage: Option<TokenUsage>,
    model: Option<String>,
}

enum Classified {
    Chunk(OutputChunk),
    Result(ResultSummary),
    Skip,
}

/// Classify one stdout line.
///
/// JSON lines are tagged by their `type` field; anything that is not JSON
/// is forwarded as plain text rather than dropped.
fn classify_line(line: &str) -> Classified {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Classified::Skip;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(_) => {
            return Classified::Chunk(OutputChunk::Text {
                text: trimmed.to_string(),
            });
        }
    };

    let kind = value.get("type").and_then(Value::as_str).unwrap_or("");
    match kind {
        "text" | "assistant" => Classified::Chunk(OutputChunk::Text {
            text: string_field(&value, "text"),
        }),
        "tool_use" => Classified::Chunk(OutputChunk::ToolUse {
            tool_name: string_field(&value, "tool_name"),
            input: value.get("input").cloned().unwrap_or(Value::Null),
        }),
        "tool_result" => Classified::Chunk(OutputChunk::ToolResult {
            tool_name: string_field(&value, "tool_name"),
            output: value.get("output").cloned().unwrap_or(Value::Null),
            is_error: value
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        "thinking" => Classified::Chunk(OutputChunk::Thinking {
            text: string_field(&value, "text"),
        }),
        "status" | "system" => Classified::Chunk(OutputChunk::Status {
            message: string_field(&value, "message"),
        }),
        "result" => Classified::Result(ResultSummary {
            is_error: value
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            error: value
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string),
            cost_usd: value.get("cost_usd").and_then(Value::as_f64),
            num_turns: value
                .get("num_turns")
                .and_then(Value::as_u64)
                .map(|n| n as u32),
            token_usage: value.get("usage").map(|usage| TokenUsage {
                input_tokens: usage.get("input_tokens").and_then(Value::as_u64),
                output_tokens: usage.get("output_tokens").and_then(Value::as_u64),
            }),
            model: value
                .get("model")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        other => {
            debug!(kind = other, "skipping unrecognized agent chunk");
            Classified::Skip
        }
    }
}

fn string_field(value: &Value, field: &str) -> String {
    value
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fake_agent(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("fake-agent.sh");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path.display().to_string()
    }

    fn request(dir: &std::path::Path, timeout: Duration) -> InvokeRequest {
        InvokeRequest {
            prompt: "do the thing".into(),
            cwd: dir.to_path_buf(),
            timeout,
            model: None,
            budget_cap: None,
        }
    }

    #[tokio::test]
    async fn streams_chunks_in_order_and_parses_the_result() {
        let dir = tempfile::tempdir().unwrap();
        let agent = fake_agent(
            dir.path(),
            r#"echo '{"type":"text","text":"hello"}'
echo '{"type":"tool_use","tool_name":"write_file","input":{"path":"a"}}'
echo 'plain progress line'
echo '{"type":"result","cost_usd":0.12,"num_turns":3,"usage":{"input_tokens":100,"output_tokens":50}}'"#,
        );

        let executor = LocalExecutor::new(&agent).unwrap();
        let mut chunks = Vec::new();
        let outcome = executor
            .invoke(request(dir.path(), Duration::from_secs(10)), |c| {
                chunks.push(c);
            })
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.cost_usd, Some(0.12));
        assert_eq!(outcome.num_turns, Some(3));
        assert_eq!(
            outcome.token_usage,
            Some(TokenUsage {
                input_tokens: Some(100),
                output_tokens: Some(50),
            })
        );

        assert_eq!(chunks.len(), 3);
        assert!(matches!(&chunks[0], OutputChunk::Text { text } if text == "hello"));
        assert!(matches!(&chunks[1], OutputChunk::ToolUse { tool_name, .. } if tool_name == "write_file"));
        assert!(matches!(&chunks[2], OutputChunk::Text { text } if text == "plain progress line"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_a_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let agent = fake_agent(dir.path(), "echo '{\"type\":\"text\",\"text\":\"x\"}'\nexit 2");

        let executor = LocalExecutor::new(&agent).unwrap();
        let outcome = executor
            .invoke(request(dir.path(), Duration::from_secs(10)), |_| {})
            .await
            .unwrap();

        assert!(!outcome.success);
        assert!(outcome.error.as_deref().unwrap().contains("code 2"));
    }

    #[tokio::test]
    async fn error_result_chunk_is_a_failed_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let agent = fake_agent(
            dir.path(),
            r#"echo '{"type":"result","is_error":true,"error":"budget exhausted"}'"#,
        );

        let executor = LocalExecutor::new(&agent).unwrap();
        let outcome = executor
            .invoke(request(dir.path(), Duration::from_secs(10)), |_| {})
            .await
            .unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.error.as_deref(), Some("budget exhausted"));
    }

    #[tokio::test]
    async fn hard_timeout_kills_the_agent() {
        let dir = tempfile::tempdir().unwrap();
        let agent = fake_agent(dir.path(), "sleep 30");

        let executor = LocalExecutor::new(&agent).unwrap();
        let started = Instant::now();
        let err = executor
            .invoke(request(dir.path(), Duration::from_millis(300)), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, ExecError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = tempfile::tempdir().unwrap();
        let executor = LocalExecutor::new("/no/such/agent").unwrap();
        let err = executor
            .invoke(request(dir.path(), Duration::from_secs(1)), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn(_)));
    }

    #[test]
    fn empty_command_is_invalid() {
        assert!(matches!(
            LocalExecutor::new("   "),
            Err(ExecError::InvalidCommand(_))
        ));
    }
}
