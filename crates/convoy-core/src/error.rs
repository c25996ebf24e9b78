//! Error types for the core crate.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Conversation/message/prompt/block/tool-call lookup or invariant error.
    #[error("conversation error: {0}")]
    Conversation(#[from] ConversationError),

    /// Provider-level error surfaced from a Prompt Engine call.
    #[error("provider error: {0}")]
    Provider(#[from] convoy_provider::ProviderError),

    /// Tool execution error surfaced from the Executor.
    #[error("tool error: {0}")]
    Tool(#[from] convoy_tools::ToolError),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] convoy_storage::StorageError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid JSON/JSONC syntax.
    #[error("invalid config at {path}: {message}")]
    InvalidJson { path: String, message: String },

    /// Config validation failed.
    #[error("config validation failed: {message}")]
    Validation { message: String },

    /// Config file not found (not an error for optional configs).
    #[error("config file not found: {path}")]
    NotFound { path: String },

    /// Environment variable not found during substitution.
    #[error("environment variable not found: {name}")]
    EnvVarNotFound { name: String },

    /// File reference not found during substitution.
    #[error("file reference not found: {path}")]
    FileRefNotFound { path: String },

    /// Invalid path (e.g., could not determine config directory).
    #[error("invalid path: {0}")]
    InvalidPath(String),
}

/// Conversation-domain lookup and invariant errors.
#[derive(Debug, Error)]
pub enum ConversationError {
    #[error("conversation not found: {id}")]
    ConversationNotFound { id: String },

    #[error("message not found: {id}")]
    MessageNotFound { id: String },

    #[error("prompt not found: {id}")]
    PromptNotFound { id: String },

    #[error("block not found: {id}")]
    BlockNotFound { id: String },

    #[error("tool call not found: {id}")]
    ToolCallNotFound { id: String },

    /// A queued message was edited or deleted after it left `status=queued`.
    #[error("message {id} is no longer queued")]
    NotQueued { id: String },

    /// A second prompt was about to start while one was already active
    /// for the conversation.
    #[error("conversation {id} already has an active prompt")]
    PromptAlreadyActive { id: String },
}

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
