//! Core business logic for convoy.
//!
//! This crate provides the central coordination layer for convoy:
//! - Conversation/Message/Prompt/Block/ToolCall data model and persistence
//! - The Prompt Engine driving one provider turn to completion
//! - The Executor driving one ToolCall to completion
//! - Configuration management (multi-source, JSONC support)
//! - Event bus for inter-component communication

pub mod bus;
pub mod config;
pub mod conversation;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod model;
pub mod prompt;
pub mod retry;

pub use bus::{
    Bus, BlockDelta, BlockEnd, BlockStart, BusEvent, Event, MessageCreated, MessageUpdated,
    PromptCompleted, PromptFailed, PromptStarted, SequencedEvent, ToolCallCanceled,
    ToolCallCompleted, ToolCallFailed, ToolCallProgress, ToolCallStarted,
};
pub use config::Config;
pub use conversation::ConversationRepository;
pub use coordinator::{ConversationCoordinator, ConversationSnapshot, ConversationStream, MessageSnapshot};
pub use error::{ConfigError, ConversationError, CoreError, CoreResult};
pub use executor::Executor;
pub use model::{
    Block, BlockType, Conversation, Message, MessageRole, MessageStatus, Prompt, PromptEvent,
    PromptStatus, ToolCall, ToolCallState, User,
};
pub use prompt::{PromptEngine, PromptEngineConfig};
pub use retry::{
    calculate_delay, classify_error, should_retry, RateLimitInfo, RetryHelper, RetryableError,
};
