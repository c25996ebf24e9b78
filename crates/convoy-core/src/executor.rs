//! Drives one ToolCall through its lifecycle: validate, execute, persist,
//! broadcast.
//!
//! This is distinct from [`convoy_tools::ToolRegistry`], which only holds
//! the name -> tool map. The Executor owns the stateful part: loading and
//! updating the ToolCall row, appending streamed chunks to its `tool_result`
//! Block, and publishing Bus events, per §4.3.

use crate::bus::{ToolCallCanceled, ToolCallCompleted, ToolCallFailed, ToolCallProgress, ToolCallStarted};
use crate::conversation::ConversationRepository;
use crate::error::CoreResult;
use crate::model::ToolCallState;
use convoy_tools::{ToolContext, ToolError, ToolRegistry, ToolStreamEvent};
use convoy_util::sanitize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Runs ToolCalls to completion against the tool registry, persisting
/// progress through a [`ConversationRepository`].
#[derive(Clone)]
pub struct Executor {
    registry: Arc<ToolRegistry>,
    repo: ConversationRepository,
}

impl Executor {
    pub fn new(registry: Arc<ToolRegistry>, repo: ConversationRepository) -> Self {
        Self { registry, repo }
    }

    /// Run the ToolCall `tool_call_id`. No-op unless its `state=pending` —
    /// this check is the optimistic gate that guarantees exactly one
    /// Executor run per ToolCall id.
    pub async fn run(
        &self,
        conversation_id: &str,
        prompt_id: &str,
        tool_call_id: &str,
        cwd: PathBuf,
        shell_pool: Arc<convoy_tools::ShellSessionPool>,
        abort: CancellationToken,
    ) -> CoreResult<()> {
        let call = self.repo.get_tool_call(prompt_id, tool_call_id).await?;
        if call.state != ToolCallState::Pending {
            return Ok(());
        }

        let Some(tool) = self.registry.get(&call.tool_name).cloned() else {
            warn!(tool_name = %call.tool_name, tool_call_id, "unsupported tool");
            let message = format!("Unsupported tool: {}", call.tool_name);
            self.fail(
                conversation_id,
                prompt_id,
                tool_call_id,
                &call.message_id,
                &call.block_id,
                &message,
            )
            .await?;
            return Ok(());
        };

        self.repo
            .update_tool_call(prompt_id, tool_call_id, |c| c.start())
            .await?;
        self.repo
            .bus()
            .publish(ToolCallStarted {
                conversation_id: conversation_id.to_string(),
                prompt_id: prompt_id.to_string(),
                tool_call_id: tool_call_id.to_string(),
                tool_name: call.tool_name.clone(),
            })
            .await;

        let ctx = ToolContext {
            conversation_id: conversation_id.to_string(),
            prompt_id: prompt_id.to_string(),
            tool_call_id: tool_call_id.to_string(),
            abort,
            cwd,
            shell_pool,
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let args = call.request.clone();
        let message_id = call.message_id.clone();
        let block_id = call.block_id.clone();

        let run_handle = tokio::spawn(async move { tool.execute_streaming(args, &ctx, tx).await });

        while let Some(event) = rx.recv().await {
            match event {
                ToolStreamEvent::Chunk(chunk) => {
                    let chunk = sanitize(&chunk);
                    self.repo
                        .update_block(&message_id, &block_id, |b| b.append(&chunk))
                        .await?;
                    self.repo
                        .bus()
                        .publish(ToolCallProgress {
                            conversation_id: conversation_id.to_string(),
                            tool_call_id: tool_call_id.to_string(),
                            chunk,
                        })
                        .await;
                }
                // Result/Error are also returned by the join handle below;
                // the streamed copy exists for subscribers wanting interim
                // status, the awaited return value is canonical.
                ToolStreamEvent::Result(_) | ToolStreamEvent::Error(_) => {}
            }
        }

        match run_handle.await {
            Ok(Ok(output)) => {
                info!(tool_call_id, "tool call complete");
                let sanitized = sanitize(&output.output);
                self.repo
                    .update_tool_call(prompt_id, tool_call_id, |c| c.complete(&sanitized))
                    .await?;
                self.repo
                    .update_block(&message_id, &block_id, |b| {
                        b.content = sanitized.clone();
                        b.finalize();
                    })
                    .await?;
                self.repo
                    .bus()
                    .publish(ToolCallCompleted {
                        conversation_id: conversation_id.to_string(),
                        tool_call_id: tool_call_id.to_string(),
                        output: sanitized,
                    })
                    .await;
                Ok(())
            }
            Ok(Err(ToolError::Cancelled)) => {
                info!(tool_call_id, "tool call canceled");
                self.cancel(conversation_id, prompt_id, tool_call_id, &message_id, &block_id)
                    .await
            }
            Ok(Err(tool_error)) => {
                error!(tool_call_id, error = %tool_error, "tool call failed");
                self.fail(
                    conversation_id,
                    prompt_id,
                    tool_call_id,
                    &message_id,
                    &block_id,
                    &tool_error.to_string(),
                )
                .await
            }
            Err(join_error) => {
                error!(tool_call_id, error = %join_error, "tool call task panicked");
                self.fail(
                    conversation_id,
                    prompt_id,
                    tool_call_id,
                    &message_id,
                    &block_id,
                    "tool task panicked",
                )
                .await
            }
        }
    }

    async fn fail(
        &self,
        conversation_id: &str,
        prompt_id: &str,
        tool_call_id: &str,
        message_id: &str,
        block_id: &str,
        message: &str,
    ) -> CoreResult<()> {
        self.repo
            .update_tool_call(prompt_id, tool_call_id, |c| c.fail(message))
            .await?;
        self.repo
            .update_block(message_id, block_id, |b| {
                b.content = format!("Error: {message}");
                b.finalize();
            })
            .await?;
        self.repo
            .bus()
            .publish(ToolCallFailed {
                conversation_id: conversation_id.to_string(),
                tool_call_id: tool_call_id.to_string(),
                message: message.to_string(),
            })
            .await;
        Ok(())
    }

    async fn cancel(
        &self,
        conversation_id: &str,
        prompt_id: &str,
        tool_call_id: &str,
        message_id: &str,
        block_id: &str,
    ) -> CoreResult<()> {
        self.repo
            .update_tool_call(prompt_id, tool_call_id, |c| c.cancel())
            .await?;
        self.repo
            .update_block(message_id, block_id, |b| b.finalize())
            .await?;
        self.repo
            .bus()
            .publish(ToolCallCanceled {
                conversation_id: conversation_id.to_string(),
                tool_call_id: tool_call_id.to_string(),
            })
            .await;
        Ok(())
    }
}
