//! Prompt Engine — drives one Prompt to terminal completion.
//!
//! Given a newly-created, `created`-status Prompt, [`PromptEngine::run`]
//! opens a provider stream, materializes Blocks and PromptEvents as the
//! stream arrives, dispatches any tool_use blocks to the [`crate::Executor`]
//! fire-and-forget, and loops with a tool_result continuation turn until
//! the provider finishes without requesting further tools.
//!
//! A failed Prompt is a terminal *data* state, not a Rust `Err` — the same
//! philosophy the Executor applies to tool failures. `run` only returns
//! `Err` for genuine storage/IO failures; provider and cancellation
//! failures are recorded on the Prompt and Message rows and broadcast on
//! the Bus, then `run` returns `Ok(())`.

use crate::bus::{BlockDelta, BlockEnd, BlockStart, PromptCompleted, PromptFailed, PromptStarted};
use crate::conversation::ConversationRepository;
use crate::error::{CoreError, CoreResult};
use crate::executor::Executor;
use crate::model::{
    Block, BlockType, MessageRole, MessageStatus, PromptEvent, PromptStatus, ToolCall,
    ToolCallState,
};
use crate::retry::{classify_error, should_retry, sleep_with_cancel, RetryHelper, RETRY_MAX_ATTEMPTS};
use convoy_provider::{
    ContentPart, GenerateOptions, LanguageModel, Message as ProviderMessage, ProviderError,
    ProviderResult, Role as ProviderRole, StreamChunk, ToolDefinition,
};
use convoy_tools::ShellSessionPool;
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Safety bound on tool-result continuation rounds within a single Prompt,
/// so a provider that never stops requesting tools can't loop forever.
const MAX_STEPS: usize = 100;

/// Tunables for [`PromptEngine`].
#[derive(Debug, Clone)]
pub struct PromptEngineConfig {
    pub max_steps: usize,
    pub max_retry_attempts: u32,
}

impl Default for PromptEngineConfig {
    fn default() -> Self {
        Self {
            max_steps: MAX_STEPS,
            max_retry_attempts: RETRY_MAX_ATTEMPTS,
        }
    }
}

/// Drives Prompts against a [`LanguageModel`], persisting through a
/// [`ConversationRepository`] and dispatching tool calls via an
/// [`Executor`].
pub struct PromptEngine {
    provider: Arc<dyn LanguageModel>,
    repo: ConversationRepository,
    registry: Arc<convoy_tools::ToolRegistry>,
    executor: Executor,
    shell_pool: Arc<ShellSessionPool>,
    config: PromptEngineConfig,
}

/// Outcome of consuming one provider stream.
struct StepOutcome {
    has_tools: bool,
    assistant_content: Vec<ContentPart>,
    tool_call_ids_in_order: Vec<String>,
    tool_handles: Vec<JoinHandle<()>>,
}

/// A tool_use block whose JSON input is still streaming in.
struct PendingToolCall {
    block_id: String,
    buffer: String,
}

impl PromptEngine {
    pub fn new(
        provider: Arc<dyn LanguageModel>,
        repo: ConversationRepository,
        registry: Arc<convoy_tools::ToolRegistry>,
        shell_pool: Arc<ShellSessionPool>,
    ) -> Self {
        let executor = Executor::new(registry.clone(), repo.clone());
        Self {
            provider,
            repo,
            registry,
            executor,
            shell_pool,
            config: PromptEngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PromptEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Run `prompt_id` to completion. `cwd` is the working directory new
    /// Shell Sessions for this conversation's tool calls are spawned into.
    pub async fn run(
        &self,
        conversation_id: &str,
        prompt_id: &str,
        cwd: PathBuf,
        abort: CancellationToken,
    ) -> CoreResult<()> {
        let prompt = self.repo.get_prompt(conversation_id, prompt_id).await?;
        let mut messages = self.build_history(conversation_id, &prompt.message_id).await?;
        let tool_defs = self.tool_definitions();

        self.repo
            .update_prompt(conversation_id, prompt_id, |p| p.status = PromptStatus::Streaming)
            .await?;
        self.repo
            .bus()
            .publish(PromptStarted {
                conversation_id: conversation_id.to_string(),
                prompt_id: prompt_id.to_string(),
                message_id: prompt.message_id.clone(),
            })
            .await;

        let mut index_num: u32 = 0;
        let mut next_order: u32 = self.repo.blocks(&prompt.message_id).await?.len() as u32;
        let mut step = 0usize;

        let result: Result<(), String> = loop {
            step += 1;
            if step > self.config.max_steps {
                break Err(format!("prompt exceeded {} steps", self.config.max_steps));
            }
            if abort.is_cancelled() {
                break Err("canceled".to_string());
            }

            self.repo
                .update_prompt(conversation_id, prompt_id, |p| {
                    p.request = serde_json::to_value(&messages).unwrap_or(serde_json::Value::Null)
                })
                .await?;

            let options = GenerateOptions {
                system: prompt.system_message.clone(),
                tools: tool_defs.clone(),
                abort: Some(abort.clone()),
                ..Default::default()
            };

            let stream = match self.open_stream(messages.clone(), options, &abort).await {
                Ok(stream) => stream,
                Err(message) => break Err(message),
            };

            let outcome = match self
                .handle_stream(
                    conversation_id,
                    prompt_id,
                    &prompt.message_id,
                    stream,
                    &mut index_num,
                    &mut next_order,
                    cwd.clone(),
                    &abort,
                )
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => break Err(e.to_string()),
            };

            if !outcome.has_tools {
                break Ok(());
            }

            self.repo
                .update_prompt(conversation_id, prompt_id, |p| {
                    p.status = PromptStatus::WaitingForTools
                })
                .await?;
            if !outcome.tool_handles.is_empty() {
                tokio::select! {
                    _ = futures::future::join_all(outcome.tool_handles) => {}
                    _ = abort.cancelled() => {
                        debug!(
                            prompt_id,
                            "abort requested while waiting for tool calls to finish; not blocking on drain"
                        );
                    }
                }
            }
            self.repo
                .update_prompt(conversation_id, prompt_id, |p| {
                    p.status = PromptStatus::ReadyForContinuation
                })
                .await?;

            if !outcome.assistant_content.is_empty() {
                messages.push(ProviderMessage {
                    role: ProviderRole::Assistant,
                    content: outcome.assistant_content,
                });
            }

            let mut tool_result_content = Vec::new();
            for call_id in &outcome.tool_call_ids_in_order {
                let call = self.repo.get_tool_call(prompt_id, call_id).await?;
                tool_result_content.push(tool_call_to_content_part(&call));
            }
            if !tool_result_content.is_empty() {
                messages.push(ProviderMessage {
                    role: ProviderRole::Tool,
                    content: tool_result_content,
                });
            }
        };

        match result {
            Ok(()) => {
                self.repo
                    .update_prompt(conversation_id, prompt_id, |p| p.complete())
                    .await?;
                self.repo
                    .update_message(conversation_id, &prompt.message_id, |m| {
                        m.status = MessageStatus::Completed
                    })
                    .await?;
                self.repo
                    .bus()
                    .publish(PromptCompleted {
                        conversation_id: conversation_id.to_string(),
                        prompt_id: prompt_id.to_string(),
                    })
                    .await;
            }
            Err(message) => {
                error!(prompt_id, error = %message, "prompt failed");
                self.repo
                    .update_prompt(conversation_id, prompt_id, |p| p.fail(&message))
                    .await?;
                self.repo
                    .update_message(conversation_id, &prompt.message_id, |m| {
                        m.status = MessageStatus::Error
                    })
                    .await?;
                self.repo
                    .bus()
                    .publish(PromptFailed {
                        conversation_id: conversation_id.to_string(),
                        prompt_id: prompt_id.to_string(),
                        message,
                    })
                    .await;
            }
        }

        Ok(())
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.registry
            .all()
            .map(|t| ToolDefinition {
                name: t.id().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    /// Reconstruct the provider-facing history of every completed message
    /// preceding `up_to_message_id`.
    async fn build_history(
        &self,
        conversation_id: &str,
        up_to_message_id: &str,
    ) -> CoreResult<Vec<ProviderMessage>> {
        let messages = self.repo.messages(conversation_id).await?;
        let prompts = self.repo.prompts(conversation_id).await?;
        let mut history = Vec::new();

        for message in messages {
            if message.id == up_to_message_id {
                break;
            }
            if message.status != MessageStatus::Completed {
                continue;
            }
            let blocks = self.repo.blocks(&message.id).await?;

            match message.role {
                MessageRole::User => {
                    let text = concat_text_blocks(&blocks);
                    if !text.is_empty() {
                        history.push(ProviderMessage::user(text));
                    }
                }
                MessageRole::System => {
                    let text = concat_text_blocks(&blocks);
                    if !text.is_empty() {
                        history.push(ProviderMessage::system(text));
                    }
                }
                MessageRole::Assistant => {
                    let prompt = prompts.iter().find(|p| p.message_id == message.id);
                    let tool_calls = if let Some(p) = prompt {
                        self.repo.tool_calls(&p.id).await?
                    } else {
                        Vec::new()
                    };

                    let mut assistant_content = Vec::new();
                    let mut tool_result_content = Vec::new();
                    for block in &blocks {
                        match block.block_type {
                            BlockType::Text => {
                                assistant_content.push(ContentPart::text(block.content.clone()));
                            }
                            BlockType::ToolUse => {
                                let tool_name = block
                                    .metadata
                                    .get("toolName")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default();
                                let tool_use_id = block
                                    .metadata
                                    .get("toolUseId")
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default();
                                let input = serde_json::from_str(&block.content)
                                    .unwrap_or(serde_json::Value::Null);
                                assistant_content.push(ContentPart::tool_use(
                                    tool_use_id,
                                    tool_name,
                                    input,
                                ));
                            }
                            BlockType::ToolResult => {
                                if let Some(call) =
                                    tool_calls.iter().find(|c| c.block_id == block.id)
                                {
                                    tool_result_content.push(tool_call_to_content_part(call));
                                }
                            }
                            BlockType::Thinking | BlockType::Attachment => {}
                        }
                    }
                    if !assistant_content.is_empty() {
                        history.push(ProviderMessage {
                            role: ProviderRole::Assistant,
                            content: assistant_content,
                        });
                    }
                    if !tool_result_content.is_empty() {
                        history.push(ProviderMessage {
                            role: ProviderRole::Tool,
                            content: tool_result_content,
                        });
                    }
                }
            }
        }

        Ok(history)
    }

    /// Open a provider stream, retrying transient failures with bounded
    /// exponential backoff. The retry budget covers this one provider call,
    /// not the whole Prompt (§7, §9).
    async fn open_stream(
        &self,
        messages: Vec<ProviderMessage>,
        options: GenerateOptions,
        abort: &CancellationToken,
    ) -> Result<BoxStream<'static, ProviderResult<StreamChunk>>, String> {
        let mut retry = RetryHelper::new(self.config.max_retry_attempts);
        loop {
            match self.provider.generate(messages.clone(), options.clone()).await {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    let status = provider_error_status(&e);
                    let kind = classify_error(status, &e.to_string());
                    if !should_retry(&kind) {
                        return Err(format!("provider error: {e}"));
                    }
                    match retry.next_attempt(None) {
                        Some(delay) => {
                            warn!(
                                attempt = retry.current_attempt(),
                                delay_ms = delay.as_millis() as u64,
                                error = %e,
                                "retrying provider call"
                            );
                            if !sleep_with_cancel(delay, abort).await {
                                return Err("canceled".to_string());
                            }
                        }
                        None => {
                            return Err(format!(
                                "provider error after {} attempts: {e}",
                                retry.current_attempt()
                            ));
                        }
                    }
                }
            }
        }
    }

    /// Consume one provider stream to its end, materializing Blocks and the
    /// PromptEvent log and dispatching tool calls as their JSON finalizes.
    #[allow(clippy::too_many_arguments)]
    async fn handle_stream(
        &self,
        conversation_id: &str,
        prompt_id: &str,
        message_id: &str,
        mut stream: BoxStream<'static, ProviderResult<StreamChunk>>,
        index_num: &mut u32,
        next_order: &mut u32,
        cwd: PathBuf,
        abort: &CancellationToken,
    ) -> CoreResult<StepOutcome> {
        let mut assistant_content: Vec<ContentPart> = Vec::new();
        let mut current_text = String::new();
        let mut text_block_id: Option<String> = None;
        let mut reasoning_block_id: Option<String> = None;
        let mut pending_tools: HashMap<String, PendingToolCall> = HashMap::new();
        let mut tool_call_ids_in_order = Vec::new();
        let mut tool_handles = Vec::new();
        let mut has_tools = false;

        while let Some(chunk_result) = stream.next().await {
            if abort.is_cancelled() {
                break;
            }
            let chunk = chunk_result.map_err(CoreError::Provider)?;

            let (event_type, payload) = describe_chunk(&chunk);
            self.repo
                .append_prompt_event(PromptEvent::new(prompt_id, *index_num, event_type, payload))
                .await?;
            *index_num += 1;

            match chunk {
                StreamChunk::TextStart => {
                    let block = Block::new(message_id, Some(prompt_id.to_string()), BlockType::Text, *next_order);
                    *next_order += 1;
                    let block = self.repo.create_block(block).await?;
                    self.repo
                        .bus()
                        .publish(BlockStart {
                            conversation_id: conversation_id.to_string(),
                            message_id: message_id.to_string(),
                            block_id: block.id.clone(),
                            block_type: "text".to_string(),
                            order: block.order,
                        })
                        .await;
                    text_block_id = Some(block.id);
                }
                StreamChunk::TextDelta(delta) => {
                    current_text.push_str(&delta);
                    if let Some(block_id) = text_block_id.clone() {
                        self.repo
                            .update_block(message_id, &block_id, |b| b.append(&delta))
                            .await?;
                        self.repo
                            .bus()
                            .publish(BlockDelta {
                                conversation_id: conversation_id.to_string(),
                                message_id: message_id.to_string(),
                                block_id,
                                content: delta,
                            })
                            .await;
                    }
                }
                StreamChunk::TextEnd => {
                    if let Some(block_id) = text_block_id.take() {
                        self.repo
                            .update_block(message_id, &block_id, |b| b.finalize())
                            .await?;
                        self.repo
                            .bus()
                            .publish(BlockEnd {
                                conversation_id: conversation_id.to_string(),
                                message_id: message_id.to_string(),
                                block_id,
                            })
                            .await;
                    }
                    if !current_text.is_empty() {
                        assistant_content.push(ContentPart::text(std::mem::take(&mut current_text)));
                    }
                }
                StreamChunk::ReasoningStart => {
                    let block = Block::new(message_id, Some(prompt_id.to_string()), BlockType::Thinking, *next_order);
                    *next_order += 1;
                    let block = self.repo.create_block(block).await?;
                    self.repo
                        .bus()
                        .publish(BlockStart {
                            conversation_id: conversation_id.to_string(),
                            message_id: message_id.to_string(),
                            block_id: block.id.clone(),
                            block_type: "thinking".to_string(),
                            order: block.order,
                        })
                        .await;
                    reasoning_block_id = Some(block.id);
                }
                StreamChunk::ReasoningDelta(delta) => {
                    if let Some(block_id) = reasoning_block_id.clone() {
                        self.repo
                            .update_block(message_id, &block_id, |b| b.append(&delta))
                            .await?;
                        self.repo
                            .bus()
                            .publish(BlockDelta {
                                conversation_id: conversation_id.to_string(),
                                message_id: message_id.to_string(),
                                block_id,
                                content: delta,
                            })
                            .await;
                    }
                }
                StreamChunk::ReasoningEnd => {
                    if let Some(block_id) = reasoning_block_id.take() {
                        self.repo
                            .update_block(message_id, &block_id, |b| b.finalize())
                            .await?;
                        self.repo
                            .bus()
                            .publish(BlockEnd {
                                conversation_id: conversation_id.to_string(),
                                message_id: message_id.to_string(),
                                block_id,
                            })
                            .await;
                    }
                }
                StreamChunk::ToolCallStart { id, name } => {
                    let mut block = Block::new(message_id, Some(prompt_id.to_string()), BlockType::ToolUse, *next_order);
                    *next_order += 1;
                    block.metadata = serde_json::json!({"toolName": name, "toolUseId": id});
                    let block = self.repo.create_block(block).await?;
                    self.repo
                        .bus()
                        .publish(BlockStart {
                            conversation_id: conversation_id.to_string(),
                            message_id: message_id.to_string(),
                            block_id: block.id.clone(),
                            block_type: "tool_use".to_string(),
                            order: block.order,
                        })
                        .await;
                    pending_tools.insert(
                        id,
                        PendingToolCall {
                            block_id: block.id,
                            buffer: String::new(),
                        },
                    );
                }
                StreamChunk::ToolCallDelta { id, delta } => {
                    if let Some(pending) = pending_tools.get_mut(&id) {
                        pending.buffer.push_str(&delta);
                        self.repo
                            .update_block(message_id, &pending.block_id, |b| b.append(&delta))
                            .await?;
                        self.repo
                            .bus()
                            .publish(BlockDelta {
                                conversation_id: conversation_id.to_string(),
                                message_id: message_id.to_string(),
                                block_id: pending.block_id.clone(),
                                content: delta,
                            })
                            .await;
                    }
                }
                StreamChunk::ToolCall { id, name, arguments } => {
                    let (block_id, buffer) = match pending_tools.remove(&id) {
                        Some(pending) => {
                            let buffer = if arguments.is_empty() { pending.buffer } else { arguments };
                            (pending.block_id, buffer)
                        }
                        None => {
                            let mut block = Block::new(message_id, Some(prompt_id.to_string()), BlockType::ToolUse, *next_order);
                            *next_order += 1;
                            block.metadata = serde_json::json!({"toolName": name, "toolUseId": id});
                            block.content = arguments.clone();
                            let block = self.repo.create_block(block).await?;
                            self.repo
                                .bus()
                                .publish(BlockStart {
                                    conversation_id: conversation_id.to_string(),
                                    message_id: message_id.to_string(),
                                    block_id: block.id.clone(),
                                    block_type: "tool_use".to_string(),
                                    order: block.order,
                                })
                                .await;
                            (block.id, arguments)
                        }
                    };

                    match serde_json::from_str::<serde_json::Value>(&buffer) {
                        Ok(input) => {
                            self.repo
                                .update_block(message_id, &block_id, |b| {
                                    b.content = buffer.clone();
                                    b.finalize();
                                })
                                .await?;
                            self.repo
                                .bus()
                                .publish(BlockEnd {
                                    conversation_id: conversation_id.to_string(),
                                    message_id: message_id.to_string(),
                                    block_id: block_id.clone(),
                                })
                                .await;

                            assistant_content.push(ContentPart::tool_use(id.clone(), name.clone(), input.clone()));

                            let result_block = Block::new(
                                message_id,
                                Some(prompt_id.to_string()),
                                BlockType::ToolResult,
                                *next_order,
                            );
                            *next_order += 1;
                            let result_block = self.repo.create_block(result_block).await?;

                            let call = ToolCall::new(prompt_id, message_id, &result_block.id, &id, &name, input);
                            let call = self.repo.create_tool_call(call).await?;
                            tool_call_ids_in_order.push(call.id.clone());
                            has_tools = true;

                            let executor = self.executor.clone();
                            let conv = conversation_id.to_string();
                            let prm = prompt_id.to_string();
                            let call_id = call.id.clone();
                            let pool = self.shell_pool.clone();
                            let abort_clone = abort.clone();
                            let cwd_clone = cwd.clone();
                            tool_handles.push(tokio::spawn(async move {
                                if let Err(e) = executor.run(&conv, &prm, &call_id, cwd_clone, pool, abort_clone).await {
                                    error!(tool_call_id = %call_id, error = %e, "executor run failed");
                                }
                            }));
                        }
                        Err(parse_error) => {
                            warn!(tool_call_id = %id, error = %parse_error, "tool_use JSON parse failed, skipping tool call");
                            self.repo
                                .update_block(message_id, &block_id, |b| {
                                    b.content = buffer.clone();
                                    b.finalize();
                                })
                                .await?;
                            self.repo
                                .append_prompt_event(PromptEvent::new(
                                    prompt_id,
                                    *index_num,
                                    "tool_parse_error",
                                    serde_json::json!({
                                        "tool_use_id": id,
                                        "tool_name": name,
                                        "error": parse_error.to_string(),
                                    }),
                                ))
                                .await?;
                            *index_num += 1;
                        }
                    }
                }
                StreamChunk::ToolObserved { .. } | StreamChunk::ToolResultObserved { .. } => {
                    // Externally-executed tool calls, relevant only to CLI-style
                    // providers; this Engine always executes tools itself.
                }
                StreamChunk::FinishStep { usage, finish_reason } => {
                    debug!(
                        input = usage.input_tokens,
                        output = usage.output_tokens,
                        reason = ?finish_reason,
                        "step finished"
                    );
                }
                StreamChunk::Error(message) => {
                    return Err(CoreError::Provider(ProviderError::internal(message)));
                }
            }
        }

        // Defensively finalize anything the provider left open.
        if let Some(block_id) = text_block_id {
            self.repo.update_block(message_id, &block_id, |b| b.finalize()).await?;
        }
        if let Some(block_id) = reasoning_block_id {
            self.repo.update_block(message_id, &block_id, |b| b.finalize()).await?;
        }

        Ok(StepOutcome {
            has_tools,
            assistant_content,
            tool_call_ids_in_order,
            tool_handles,
        })
    }
}

fn concat_text_blocks(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter(|b| b.block_type == BlockType::Text)
        .map(|b| b.content.as_str())
        .collect::<Vec<_>>()
        .join("")
}

fn tool_call_to_content_part(call: &ToolCall) -> ContentPart {
    if call.state == ToolCallState::Error {
        ContentPart::ToolResult {
            tool_use_id: call.api_tool_call_id.clone(),
            content: call.error.clone().unwrap_or_default(),
            is_error: Some(true),
        }
    } else {
        ContentPart::tool_result(call.api_tool_call_id.clone(), call.output.clone())
    }
}

fn provider_error_status(e: &ProviderError) -> Option<u16> {
    match e {
        ProviderError::ApiError { status, .. } => Some(*status),
        ProviderError::RateLimited { .. } => Some(429),
        _ => None,
    }
}

fn describe_chunk(chunk: &StreamChunk) -> (&'static str, serde_json::Value) {
    match chunk {
        StreamChunk::TextStart => ("text_start", serde_json::json!({})),
        StreamChunk::TextDelta(delta) => ("text_delta", serde_json::json!({"delta": delta})),
        StreamChunk::TextEnd => ("text_end", serde_json::json!({})),
        StreamChunk::ReasoningStart => ("reasoning_start", serde_json::json!({})),
        StreamChunk::ReasoningDelta(delta) => ("reasoning_delta", serde_json::json!({"delta": delta})),
        StreamChunk::ReasoningEnd => ("reasoning_end", serde_json::json!({})),
        StreamChunk::ToolCallStart { id, name } => {
            ("tool_call_start", serde_json::json!({"id": id, "name": name}))
        }
        StreamChunk::ToolCallDelta { id, delta } => {
            ("tool_call_delta", serde_json::json!({"id": id, "delta": delta}))
        }
        StreamChunk::ToolCall { id, name, arguments } => (
            "tool_call",
            serde_json::json!({"id": id, "name": name, "arguments": arguments}),
        ),
        StreamChunk::ToolObserved { id, name, input } => (
            "tool_observed",
            serde_json::json!({"id": id, "name": name, "input": input}),
        ),
        StreamChunk::ToolResultObserved { id, success, output } => (
            "tool_result_observed",
            serde_json::json!({"id": id, "success": success, "output": output}),
        ),
        StreamChunk::FinishStep { usage, finish_reason } => (
            "finish_step",
            serde_json::json!({"usage": usage, "finish_reason": finish_reason}),
        ),
        StreamChunk::Error(message) => ("error", serde_json::json!({"message": message})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::conversation::ConversationRepository;
    use crate::model::{Conversation, Message, Prompt};
    use convoy_provider::mock::MockProvider;
    use convoy_provider::model::anthropic::claude_sonnet_4_5;
    use convoy_storage::json::JsonStorage;
    use convoy_tools::ToolRegistry;

    fn test_engine() -> (PromptEngine, ConversationRepository) {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.keep());
        let repo = ConversationRepository::new(storage, Bus::new());
        let registry = Arc::new(ToolRegistry::with_builtins());
        let shell_pool = Arc::new(ShellSessionPool::new("/bin/bash"));
        let provider: Arc<dyn LanguageModel> =
            Arc::new(MockProvider::with_text_response(claude_sonnet_4_5(), "Hello there!"));
        let engine = PromptEngine::new(provider, repo.clone(), registry, shell_pool);
        (engine, repo)
    }

    #[tokio::test]
    async fn test_simple_text_turn_completes_prompt_and_message() {
        let (engine, repo) = test_engine();
        let conversation = repo
            .create_conversation(Conversation::new("usr_1", "Chat"))
            .await
            .unwrap();
        let user_message = repo
            .create_message(Message::queued_user(&conversation.id, 1))
            .await
            .unwrap();
        repo.update_message(&conversation.id, &user_message.id, |m| {
            m.status = MessageStatus::Completed;
        })
        .await
        .unwrap();
        let assistant_message = repo
            .create_message(Message::processing_assistant(&conversation.id))
            .await
            .unwrap();
        let prompt = repo
            .create_prompt(Prompt::new(&conversation.id, &assistant_message.id, "mock", None))
            .await
            .unwrap();

        engine
            .run(
                &conversation.id,
                &prompt.id,
                std::env::temp_dir(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let prompt = repo.get_prompt(&conversation.id, &prompt.id).await.unwrap();
        assert_eq!(prompt.status, PromptStatus::Completed);
        let message = repo
            .get_message(&conversation.id, &assistant_message.id)
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Completed);

        let blocks = repo.blocks(&assistant_message.id).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].content, "Hello there!");
        assert!(blocks[0].is_finalized);
    }

    #[tokio::test]
    async fn test_tool_round_trip_creates_paired_blocks_and_tool_call() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.keep());
        let repo = ConversationRepository::new(storage, Bus::new());
        let registry = Arc::new(ToolRegistry::with_builtins());
        let shell_pool = Arc::new(ShellSessionPool::new("/bin/bash"));
        let mock = MockProvider::new(claude_sonnet_4_5());
        mock.expect_tool_call("call_1", "bash", r#"{"command":"echo hi"}"#);
        let provider: Arc<dyn LanguageModel> = Arc::new(mock);
        let engine = PromptEngine::new(provider, repo.clone(), registry, shell_pool);

        let conversation = repo
            .create_conversation(Conversation::new("usr_1", "Chat"))
            .await
            .unwrap();
        let assistant_message = repo
            .create_message(Message::processing_assistant(&conversation.id))
            .await
            .unwrap();
        let prompt = repo
            .create_prompt(Prompt::new(&conversation.id, &assistant_message.id, "mock", None))
            .await
            .unwrap();

        engine
            .run(
                &conversation.id,
                &prompt.id,
                std::env::temp_dir(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let prompt = repo.get_prompt(&conversation.id, &prompt.id).await.unwrap();
        assert_eq!(prompt.status, PromptStatus::Completed);

        let blocks = repo.blocks(&assistant_message.id).await.unwrap();
        assert!(blocks.iter().any(|b| b.block_type == BlockType::ToolUse));
        assert!(blocks.iter().any(|b| b.block_type == BlockType::ToolResult));
        assert!(blocks.iter().all(|b| b.is_finalized));
    }

    #[tokio::test]
    async fn test_tool_call_json_split_across_delta_boundaries_reassembles() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.keep());
        let repo = ConversationRepository::new(storage, Bus::new());
        let registry = Arc::new(ToolRegistry::with_builtins());
        let shell_pool = Arc::new(ShellSessionPool::new("/bin/bash"));
        let mock = MockProvider::new(claude_sonnet_4_5());
        // Split `{"command":"echo hi"}` across three deltas, none of which
        // is valid JSON on its own, plus a trailing `ToolCall` chunk whose
        // own `arguments` is empty — forcing reassembly from `pending.buffer`
        // rather than from the final chunk (§8 boundary behavior).
        mock.expect_raw(vec![
            StreamChunk::ToolCallStart {
                id: "call_split".to_string(),
                name: "bash".to_string(),
            },
            StreamChunk::ToolCallDelta {
                id: "call_split".to_string(),
                delta: r#"{"comma"#.to_string(),
            },
            StreamChunk::ToolCallDelta {
                id: "call_split".to_string(),
                delta: r#"nd":"echo"#.to_string(),
            },
            StreamChunk::ToolCallDelta {
                id: "call_split".to_string(),
                delta: r#" hi"}"#.to_string(),
            },
            StreamChunk::ToolCall {
                id: "call_split".to_string(),
                name: "bash".to_string(),
                arguments: String::new(),
            },
            StreamChunk::FinishStep {
                usage: convoy_provider::stream::Usage::new(10, 5),
                finish_reason: convoy_provider::stream::FinishReason::ToolUse,
            },
        ]);
        let provider: Arc<dyn LanguageModel> = Arc::new(mock);
        let engine = PromptEngine::new(provider, repo.clone(), registry, shell_pool);

        let conversation = repo
            .create_conversation(Conversation::new("usr_1", "Chat"))
            .await
            .unwrap();
        let assistant_message = repo
            .create_message(Message::processing_assistant(&conversation.id))
            .await
            .unwrap();
        let prompt = repo
            .create_prompt(Prompt::new(&conversation.id, &assistant_message.id, "mock", None))
            .await
            .unwrap();

        engine
            .run(
                &conversation.id,
                &prompt.id,
                std::env::temp_dir(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        let tool_calls = repo.tool_calls(&prompt.id).await.unwrap();
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(
            tool_calls[0].request,
            serde_json::json!({"command": "echo hi"})
        );
    }

    #[tokio::test]
    async fn test_malformed_tool_call_json_records_parse_error_without_tool_call() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.keep());
        let repo = ConversationRepository::new(storage, Bus::new());
        let registry = Arc::new(ToolRegistry::with_builtins());
        let shell_pool = Arc::new(ShellSessionPool::new("/bin/bash"));
        let mock = MockProvider::new(claude_sonnet_4_5());
        mock.expect_raw(vec![
            StreamChunk::ToolCallStart {
                id: "call_bad".to_string(),
                name: "bash".to_string(),
            },
            StreamChunk::ToolCall {
                id: "call_bad".to_string(),
                name: "bash".to_string(),
                arguments: r#"{"command": "echo hi""#.to_string(),
            },
            StreamChunk::FinishStep {
                usage: convoy_provider::stream::Usage::new(10, 5),
                finish_reason: convoy_provider::stream::FinishReason::EndTurn,
            },
        ]);
        let provider: Arc<dyn LanguageModel> = Arc::new(mock);
        let engine = PromptEngine::new(provider, repo.clone(), registry, shell_pool);

        let conversation = repo
            .create_conversation(Conversation::new("usr_1", "Chat"))
            .await
            .unwrap();
        let assistant_message = repo
            .create_message(Message::processing_assistant(&conversation.id))
            .await
            .unwrap();
        let prompt = repo
            .create_prompt(Prompt::new(&conversation.id, &assistant_message.id, "mock", None))
            .await
            .unwrap();

        engine
            .run(
                &conversation.id,
                &prompt.id,
                std::env::temp_dir(),
                CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(repo.tool_calls(&prompt.id).await.unwrap().is_empty());

        let events = repo.prompt_events(&prompt.id).await.unwrap();
        assert!(events.iter().any(|e| e.event_type == "tool_parse_error"));

        let blocks = repo.blocks(&assistant_message.id).await.unwrap();
        let tool_use_block = blocks.iter().find(|b| b.block_type == BlockType::ToolUse).unwrap();
        assert!(tool_use_block.is_finalized);
        assert_eq!(tool_use_block.content, r#"{"command": "echo hi""#);
    }
}
