//! Bash tool - execute shell commands against the conversation's persistent
//! shell session.
//!
//! - Configurable timeout (default 2 minutes, max 10 minutes)
//! - Working directory support (applies only to a freshly-spawned session;
//!   an existing session keeps whatever directory prior commands left it in)
//! - Output truncation for large outputs
//! - A non-zero exit status is a successful tool result, not a tool error;
//!   only a dead/unreachable session is a tool error.

use crate::{Tool, ToolContext, ToolError, ToolOutput, ToolResult, ToolStreamEvent};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

/// Default timeout in milliseconds (2 minutes).
const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Maximum timeout in milliseconds (10 minutes).
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Maximum output size in bytes before truncation.
const MAX_OUTPUT_SIZE: usize = 30_000;

/// Execute shell commands against the session's persistent shell.
pub struct BashTool;

#[derive(Debug, Deserialize)]
struct BashArgs {
    command: String,
    /// Description field sent by the model for logging purposes (not used
    /// in execution).
    #[serde(default)]
    _description: Option<String>,
    timeout: Option<u64>,
}

#[async_trait]
impl Tool for BashTool {
    fn id(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        r#"Executes a given bash command in the conversation's persistent shell.

Usage notes:
- The command argument is required.
- The shell persists across calls within a conversation: `cd` and exported
  variables from one command are visible to the next.
- You can specify an optional timeout in milliseconds (up to 600000ms / 10 minutes).
- Commands time out after 120000ms (2 minutes) by default.
- Output is truncated if it exceeds 30000 characters."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["command", "description"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "description": {
                    "type": "string",
                    "description": "Clear, concise description of what this command does"
                },
                "timeout": {
                    "type": "number",
                    "description": "Optional timeout in milliseconds (max 600000)"
                }
            }
        })
    }

    async fn execute_streaming(
        &self,
        args: Value,
        ctx: &ToolContext,
        tx: UnboundedSender<ToolStreamEvent>,
    ) -> ToolResult<ToolOutput> {
        let args: BashArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::InvalidInput(format!("invalid arguments: {e}")))?;

        if args.command.trim().is_empty() {
            return Err(ToolError::InvalidInput("command cannot be empty".into()));
        }

        let timeout_ms = args
            .timeout
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);
        let timeout = Duration::from_millis(timeout_ms);

        debug!(
            command = %args.command,
            conversation_id = %ctx.conversation_id,
            timeout_ms,
            "executing bash command"
        );

        let session = ctx
            .shell_pool
            .get_or_spawn(&ctx.conversation_id, &ctx.cwd)
            .await?;

        let mut output = String::new();
        let exec_fut = session.exec(&args.command, timeout, |chunk| {
            let sanitized = convoy_util::sanitize(&chunk);
            output.push_str(&sanitized);
            let _ = tx.send(ToolStreamEvent::Chunk(sanitized));
        });

        let result = tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => {
                let _ = session.interrupt().await;
                let _ = tx.send(ToolStreamEvent::Error(ToolError::Cancelled));
                return Err(ToolError::Cancelled);
            }
            result = exec_fut => result?,
        };

        if result.timed_out {
            let err = ToolError::Timeout(timeout);
            let _ = tx.send(ToolStreamEvent::Error(ToolError::Timeout(timeout)));
            return Err(err);
        }

        let (output, truncated) = truncate_output(&output, MAX_OUTPUT_SIZE);
        if truncated {
            warn!(command = %args.command, "output truncated to {} chars", MAX_OUTPUT_SIZE);
        }

        let title = if result.exit_code == 0 {
            truncate_command(&args.command)
        } else {
            format!(
                "{} (exit code: {})",
                truncate_command(&args.command),
                result.exit_code
            )
        };

        let final_output = ToolOutput::new(title, output).with_metadata(json!({
            "exit_code": result.exit_code,
            "truncated": truncated
        }));

        let _ = tx.send(ToolStreamEvent::Result(final_output.clone()));
        Ok(final_output)
    }
}

/// Truncate command for display in title.
fn truncate_command(cmd: &str) -> String {
    let first_line = cmd.lines().next().unwrap_or(cmd);
    if first_line.len() > 50 {
        format!("{}...", &first_line[..47])
    } else {
        first_line.to_string()
    }
}

/// Truncate output if too long.
fn truncate_output(output: &str, max_size: usize) -> (String, bool) {
    if output.len() <= max_size {
        return (output.to_string(), false);
    }

    // Keep first half and last portion.
    let keep_start = max_size * 2 / 3;
    let keep_end = max_size - keep_start - 100; // Leave room for truncation message.

    let start = &output[..keep_start];
    let end_start = output.len().saturating_sub(keep_end);
    let end = &output[end_start..];

    let truncated = format!(
        "{}\n\n... [truncated {} chars] ...\n\n{}",
        start,
        output.len() - keep_start - keep_end,
        end
    );

    (truncated, true)
}
