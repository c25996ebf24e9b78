//! Tool registry, executor and PTY shell sessions for convoy.
//!
//! A tool is a name-keyed entry `{name, description, inputSchema,
//! executeStreaming}`. The Executor drives a ToolCall through its streaming
//! contract; the only tool wired up by default is `bash`, which dispatches
//! into a persistent per-conversation [`shell::ShellSession`] acquired from
//! the [`pool::ShellSessionPool`].

pub mod error;
pub mod pool;
pub mod registry;
pub mod shell;

pub mod bash;

pub use error::{ToolError, ToolResult};
pub use pool::ShellSessionPool;
pub use registry::ToolRegistry;

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Context provided to a tool for the duration of one ToolCall.
pub struct ToolContext {
    /// Conversation this ToolCall belongs to; also the Shell Session key.
    pub conversation_id: String,
    /// Prompt this ToolCall was issued from.
    pub prompt_id: String,
    /// The ToolCall's own id, for logging/tracing correlation.
    pub tool_call_id: String,
    /// Cancellation token, tripped if the ToolCall or its Prompt is aborted.
    pub abort: CancellationToken,
    /// Working directory new shell sessions are spawned into.
    pub cwd: PathBuf,
    /// Pool of persistent shell sessions, one per conversation.
    pub shell_pool: Arc<ShellSessionPool>,
}

/// Final result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Title/summary of the operation.
    pub title: String,
    /// Full output text.
    pub output: String,
    /// Tool-specific metadata (e.g. exit code).
    pub metadata: Value,
}

impl ToolOutput {
    pub fn new(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            output: output.into(),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// One event emitted by a tool while it runs.
///
/// The Executor sanitizes and appends each `Chunk` to the ToolCall's output
/// and the associated Block as it arrives; `Result` or `Error` ends the run.
#[derive(Debug, Clone)]
pub enum ToolStreamEvent {
    /// A piece of incremental output, in emission order.
    Chunk(String),
    /// The tool completed; this carries the canonical final output.
    Result(ToolOutput),
    /// The tool itself failed (a transport-level failure, not e.g. a
    /// non-zero command exit status, which is a successful `Result`).
    Error(ToolError),
}

/// A tool the registry can dispatch a ToolCall to.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable name this tool is registered under.
    fn id(&self) -> &str;

    /// Description surfaced to the model.
    fn description(&self) -> &str;

    /// JSON Schema the tool's arguments are validated against before execution.
    fn parameters_schema(&self) -> Value;

    /// Run the tool, streaming [`ToolStreamEvent`]s to `tx` as they occur.
    ///
    /// The returned `Ok(ToolOutput)` is the canonical final result; a tool
    /// that already streamed a terminal `ToolStreamEvent::Result` down `tx`
    /// should return that same value here so callers that only await the
    /// return value (rather than draining `tx`) still observe it.
    async fn execute_streaming(
        &self,
        args: Value,
        ctx: &ToolContext,
        tx: tokio::sync::mpsc::UnboundedSender<ToolStreamEvent>,
    ) -> ToolResult<ToolOutput>;
}

/// A boxed tool for dynamic dispatch.
pub type BoxedTool = Arc<dyn Tool>;
