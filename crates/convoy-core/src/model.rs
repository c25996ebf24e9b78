//! The conversation data model: Conversation, Message, Prompt, Block,
//! PromptEvent and ToolCall, plus the status/state enums that drive their
//! lifecycles.
//!
//! Every entity id is a prefixed ULID from [`convoy_util::Identifier`];
//! Conversation ids are descending (recency-first), everything else is
//! ascending (creation order).

use convoy_util::Identifier;
use serde::{Deserialize, Serialize};

/// A user, the owner of conversations. Identity only; auth lives outside
/// the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub created_at: i64,
}

impl User {
    pub fn new() -> Self {
        Self {
            id: Identifier::user(),
            created_at: now_millis(),
        }
    }
}

impl Default for User {
    fn default() -> Self {
        Self::new()
    }
}

/// A conversation between a user and the assistant.
///
/// `active_prompt_id` is non-null exactly while a prompt is streaming; it
/// is the serialization point the Coordinator enforces, not merely
/// informational.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_prompt_id: Option<String>,
}

impl Conversation {
    pub fn new(user_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Identifier::conversation(),
            user_id: user_id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
            active_prompt_id: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

/// Role a [`Message`] plays in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Lifecycle status of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Queued,
    Processing,
    Completed,
    Error,
}

/// One turn's worth of content, either from the user or the assistant.
///
/// A completed message is immutable: its blocks all have `is_finalized =
/// true`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub role: MessageRole,
    pub status: MessageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_order: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Message {
    /// A new user message, queued with the given queue order.
    pub fn queued_user(conversation_id: impl Into<String>, queue_order: u64) -> Self {
        let now = now_millis();
        Self {
            id: Identifier::message(),
            conversation_id: conversation_id.into(),
            role: MessageRole::User,
            status: MessageStatus::Queued,
            queue_order: Some(queue_order),
            created_at: now,
            updated_at: now,
        }
    }

    /// A new assistant message, immediately `processing`, driven by a
    /// Prompt about to be created against it.
    pub fn processing_assistant(conversation_id: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Identifier::message(),
            conversation_id: conversation_id.into(),
            role: MessageRole::Assistant,
            status: MessageStatus::Processing,
            queue_order: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

/// Lifecycle status of a [`Prompt`].
///
/// Progresses `created -> streaming -> (waiting_for_tools ->
/// ready_for_continuation -> streaming)* -> (completed | error)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptStatus {
    Created,
    Streaming,
    WaitingForTools,
    ReadyForContinuation,
    Completed,
    Error,
}

impl PromptStatus {
    /// Whether a Conversation with a Prompt in this status counts toward
    /// the single-active-prompt invariant.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PromptStatus::Streaming
                | PromptStatus::WaitingForTools
                | PromptStatus::ReadyForContinuation
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PromptStatus::Completed | PromptStatus::Error)
    }
}

/// One provider invocation plus its tool-driven continuations, bound to
/// one assistant [`Message`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub id: String,
    pub conversation_id: String,
    pub message_id: String,
    pub status: PromptStatus,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    /// Structured snapshot of the request last sent to the provider.
    pub request: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl Prompt {
    pub fn new(
        conversation_id: impl Into<String>,
        message_id: impl Into<String>,
        model: impl Into<String>,
        system_message: Option<String>,
    ) -> Self {
        Self {
            id: Identifier::prompt(),
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            status: PromptStatus::Created,
            model: model.into(),
            system_message,
            request: serde_json::Value::Null,
            error: None,
            created_at: now_millis(),
            completed_at: None,
        }
    }

    pub fn complete(&mut self) {
        self.status = PromptStatus::Completed;
        self.completed_at = Some(now_millis());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = PromptStatus::Error;
        self.error = Some(message.into());
        self.completed_at = Some(now_millis());
    }
}

/// Content type of a [`Block`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockType {
    Text,
    Thinking,
    ToolUse,
    ToolResult,
    Attachment,
}

/// A contiguous piece of message content of one type.
///
/// `order` is stable and unique within a message, assigned monotonically
/// at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    pub message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt_id: Option<String>,
    pub block_type: BlockType,
    pub order: u32,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub is_finalized: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Block {
    pub fn new(
        message_id: impl Into<String>,
        prompt_id: Option<String>,
        block_type: BlockType,
        order: u32,
    ) -> Self {
        let now = now_millis();
        Self {
            id: Identifier::block(),
            message_id: message_id.into(),
            prompt_id,
            block_type,
            order,
            content: String::new(),
            metadata: serde_json::Value::Null,
            is_finalized: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn append(&mut self, delta: &str) {
        self.content.push_str(delta);
        self.updated_at = now_millis();
    }

    pub fn finalize(&mut self) {
        self.is_finalized = true;
        self.updated_at = now_millis();
    }
}

/// One raw provider (or synthesized) event in a Prompt's append-only log.
///
/// `(prompt_id, index_num)` is unique; replaying the log from an empty
/// Blocks/ToolCalls slate reconstructs identical state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptEvent {
    pub id: String,
    pub prompt_id: String,
    pub index_num: u32,
    #[serde(rename = "type")]
    pub event_type: String,
    pub payload: serde_json::Value,
}

impl PromptEvent {
    pub fn new(
        prompt_id: impl Into<String>,
        index_num: u32,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Identifier::prompt_event(),
            prompt_id: prompt_id.into(),
            index_num,
            event_type: event_type.into(),
            payload,
        }
    }
}

/// State of a [`ToolCall`].
///
/// Progresses monotonically `pending -> executing -> (complete | error |
/// canceled)`; no backward transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallState {
    Pending,
    Executing,
    Complete,
    Error,
    Canceled,
}

impl ToolCallState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ToolCallState::Complete | ToolCallState::Error | ToolCallState::Canceled
        )
    }
}

/// One provider-requested tool invocation within a Prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub prompt_id: String,
    /// Owning assistant message; the Block lives under this message's key
    /// scope.
    pub message_id: String,
    /// The `tool_result` Block this call's output is streamed into.
    pub block_id: String,
    /// Provider-assigned id for this tool use (correlates the tool_result
    /// continuation turn back to the request).
    pub api_tool_call_id: String,
    pub tool_name: String,
    pub state: ToolCallState,
    pub request: serde_json::Value,
    #[serde(default)]
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

impl ToolCall {
    pub fn new(
        prompt_id: impl Into<String>,
        message_id: impl Into<String>,
        block_id: impl Into<String>,
        api_tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        request: serde_json::Value,
    ) -> Self {
        Self {
            id: Identifier::tool_call(),
            prompt_id: prompt_id.into(),
            message_id: message_id.into(),
            block_id: block_id.into(),
            api_tool_call_id: api_tool_call_id.into(),
            tool_name: tool_name.into(),
            state: ToolCallState::Pending,
            request,
            output: String::new(),
            error: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn start(&mut self) {
        self.state = ToolCallState::Executing;
        self.started_at = Some(now_millis());
    }

    pub fn complete(&mut self, output: impl Into<String>) {
        self.state = ToolCallState::Complete;
        self.output = output.into();
        self.completed_at = Some(now_millis());
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        self.state = ToolCallState::Error;
        self.error = Some(message.into());
        self.completed_at = Some(now_millis());
    }

    pub fn cancel(&mut self) {
        self.state = ToolCallState::Canceled;
        self.completed_at = Some(now_millis());
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_id_descending_prefix() {
        let conv = Conversation::new("usr_1", "Hello");
        assert!(conv.id.starts_with("cnv_"));
        assert!(conv.active_prompt_id.is_none());
    }

    #[test]
    fn test_prompt_status_is_active() {
        assert!(PromptStatus::Streaming.is_active());
        assert!(PromptStatus::WaitingForTools.is_active());
        assert!(PromptStatus::ReadyForContinuation.is_active());
        assert!(!PromptStatus::Created.is_active());
        assert!(!PromptStatus::Completed.is_active());
        assert!(!PromptStatus::Error.is_active());
    }

    #[test]
    fn test_prompt_complete_and_fail() {
        let mut prompt = Prompt::new("cnv_1", "msg_1", "claude-sonnet", None);
        assert_eq!(prompt.status, PromptStatus::Created);
        prompt.complete();
        assert_eq!(prompt.status, PromptStatus::Completed);
        assert!(prompt.completed_at.is_some());

        let mut prompt2 = Prompt::new("cnv_1", "msg_1", "claude-sonnet", None);
        prompt2.fail("boom");
        assert_eq!(prompt2.status, PromptStatus::Error);
        assert_eq!(prompt2.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_block_append_and_finalize() {
        let mut block = Block::new("msg_1", Some("prm_1".to_string()), BlockType::Text, 0);
        block.append("Hello");
        block.append(", world!");
        assert_eq!(block.content, "Hello, world!");
        assert!(!block.is_finalized);
        block.finalize();
        assert!(block.is_finalized);
    }

    #[test]
    fn test_tool_call_lifecycle() {
        let mut call = ToolCall::new(
            "prm_1",
            "msg_1",
            "blk_1",
            "tlc_api_1",
            "bash",
            serde_json::json!({}),
        );
        assert_eq!(call.state, ToolCallState::Pending);
        call.start();
        assert_eq!(call.state, ToolCallState::Executing);
        call.complete("ok");
        assert!(call.state.is_terminal());
        assert_eq!(call.output, "ok");
    }

    #[test]
    fn test_tool_call_state_is_terminal() {
        assert!(!ToolCallState::Pending.is_terminal());
        assert!(!ToolCallState::Executing.is_terminal());
        assert!(ToolCallState::Complete.is_terminal());
        assert!(ToolCallState::Error.is_terminal());
        assert!(ToolCallState::Canceled.is_terminal());
    }

    #[test]
    fn test_message_role_serialization() {
        let json = serde_json::to_string(&MessageRole::User).unwrap();
        assert_eq!(json, "\"user\"");
    }
}
