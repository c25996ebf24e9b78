//! Durable storage for the conversation data model.
//!
//! `ConversationRepository` is the Event Store of §2: every entity is a
//! JSON document under [`convoy_storage::json::JsonStorage`], written with
//! an atomic rename so no partial entity is ever observable. Every mutation
//! that changes user-visible state also publishes the matching [`crate::bus`]
//! event; the Coordinator and Prompt Engine build on top of this rather than
//! touching storage directly.

use crate::bus::{Bus, MessageCreated, MessageUpdated};
use crate::error::{ConversationError, CoreResult};
use crate::model::{Block, Conversation, Message, Prompt, PromptEvent, ToolCall};
use convoy_storage::json::JsonStorage;
use convoy_storage::Storage;

/// CRUD + query operations over Conversations and everything owned by them.
#[derive(Clone)]
pub struct ConversationRepository {
    storage: JsonStorage,
    bus: Bus,
}

impl ConversationRepository {
    pub fn new(storage: JsonStorage, bus: Bus) -> Self {
        Self { storage, bus }
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    // ========================================================================
    // Conversation
    // ========================================================================

    pub async fn create_conversation(&self, conversation: Conversation) -> CoreResult<Conversation> {
        let key = ["conversation", &conversation.id];
        self.storage.write(&key, &conversation).await?;
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: &str) -> CoreResult<Conversation> {
        let key = ["conversation", id];
        self.storage
            .read(&key)
            .await?
            .ok_or_else(|| ConversationError::ConversationNotFound { id: id.to_string() }.into())
    }

    pub async fn update_conversation<F>(&self, id: &str, f: F) -> CoreResult<Conversation>
    where
        F: FnOnce(&mut Conversation) + Send,
    {
        let key = ["conversation", id];
        let mut conversation: Conversation = self.storage.read(&key).await?.ok_or_else(|| {
            ConversationError::ConversationNotFound { id: id.to_string() }
        })?;
        f(&mut conversation);
        conversation.touch();
        self.storage.write(&key, &conversation).await?;
        Ok(conversation)
    }

    /// Set (or clear) the serialization point. Non-null iff a Prompt for
    /// this conversation is in an active status.
    pub async fn set_active_prompt(&self, id: &str, prompt_id: Option<String>) -> CoreResult<()> {
        self.update_conversation(id, |c| c.active_prompt_id = prompt_id)
            .await?;
        Ok(())
    }

    pub async fn delete_conversation(&self, id: &str) -> CoreResult<()> {
        for message in self.messages(id).await? {
            self.delete_message(id, &message.id).await?;
        }
        for prompt in self.prompts(id).await? {
            self.delete_prompt(id, &prompt.id).await?;
        }
        let key = ["conversation", id];
        self.storage.remove(&key).await?;
        Ok(())
    }

    pub async fn list_conversations(&self, user_id: &str) -> CoreResult<Vec<Conversation>> {
        let prefix = ["conversation"];
        let keys = self.storage.list(&prefix).await?;

        let mut conversations = Vec::new();
        for key in keys {
            let key_refs: Vec<&str> = key.iter().map(|s| s.as_str()).collect();
            if let Some(conversation) = self.storage.read::<Conversation>(&key_refs).await? {
                if conversation.user_id == user_id {
                    conversations.push(conversation);
                }
            }
        }

        // Conversation ids are descending (recency-first); a plain
        // lexicographic sort already yields most-recent-first.
        conversations.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(conversations)
    }

    // ========================================================================
    // Message
    // ========================================================================

    pub async fn create_message(&self, message: Message) -> CoreResult<Message> {
        let key = ["message", &message.conversation_id, &message.id];
        self.storage.write(&key, &message).await?;
        self.bus
            .publish(MessageCreated {
                conversation_id: message.conversation_id.clone(),
                message_id: message.id.clone(),
                role: format!("{:?}", message.role).to_lowercase(),
            })
            .await;
        Ok(message)
    }

    pub async fn get_message(&self, conversation_id: &str, message_id: &str) -> CoreResult<Message> {
        let key = ["message", conversation_id, message_id];
        self.storage
            .read(&key)
            .await?
            .ok_or_else(|| ConversationError::MessageNotFound { id: message_id.to_string() }.into())
    }

    pub async fn update_message<F>(
        &self,
        conversation_id: &str,
        message_id: &str,
        f: F,
    ) -> CoreResult<Message>
    where
        F: FnOnce(&mut Message) + Send,
    {
        let key = ["message", conversation_id, message_id];
        let mut message: Message = self.storage.read(&key).await?.ok_or_else(|| {
            ConversationError::MessageNotFound {
                id: message_id.to_string(),
            }
        })?;
        f(&mut message);
        message.touch();
        self.storage.write(&key, &message).await?;
        self.bus
            .publish(MessageUpdated {
                conversation_id: message.conversation_id.clone(),
                message_id: message.id.clone(),
                status: format!("{:?}", message.status).to_lowercase(),
            })
            .await;
        Ok(message)
    }

    pub async fn delete_message(&self, conversation_id: &str, message_id: &str) -> CoreResult<()> {
        for block in self.blocks(message_id).await? {
            self.delete_block(message_id, &block.id).await?;
        }
        let key = ["message", conversation_id, message_id];
        self.storage.remove(&key).await?;
        Ok(())
    }

    /// All messages in a conversation, oldest first.
    pub async fn messages(&self, conversation_id: &str) -> CoreResult<Vec<Message>> {
        let prefix = ["message", conversation_id];
        let keys = self.storage.list(&prefix).await?;

        let mut messages = Vec::new();
        for key in keys {
            let key_refs: Vec<&str> = key.iter().map(|s| s.as_str()).collect();
            if let Some(message) = self.storage.read::<Message>(&key_refs).await? {
                messages.push(message);
            }
        }
        messages.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(messages)
    }

    /// Highest `queue_order` currently in use, for assigning the next one.
    pub async fn max_queue_order(&self, conversation_id: &str) -> CoreResult<u64> {
        let messages = self.messages(conversation_id).await?;
        Ok(messages.iter().filter_map(|m| m.queue_order).max().unwrap_or(0))
    }

    /// Queued user messages, lowest `queue_order` first.
    pub async fn queued_messages(&self, conversation_id: &str) -> CoreResult<Vec<Message>> {
        let mut queued: Vec<Message> = self
            .messages(conversation_id)
            .await?
            .into_iter()
            .filter(|m| m.queue_order.is_some())
            .collect();
        queued.sort_by_key(|m| m.queue_order.unwrap_or(u64::MAX));
        Ok(queued)
    }

    // ========================================================================
    // Prompt
    // ========================================================================

    pub async fn create_prompt(&self, prompt: Prompt) -> CoreResult<Prompt> {
        let key = ["prompt", &prompt.conversation_id, &prompt.id];
        self.storage.write(&key, &prompt).await?;
        Ok(prompt)
    }

    pub async fn get_prompt(&self, conversation_id: &str, prompt_id: &str) -> CoreResult<Prompt> {
        let key = ["prompt", conversation_id, prompt_id];
        self.storage
            .read(&key)
            .await?
            .ok_or_else(|| ConversationError::PromptNotFound { id: prompt_id.to_string() }.into())
    }

    pub async fn update_prompt<F>(
        &self,
        conversation_id: &str,
        prompt_id: &str,
        f: F,
    ) -> CoreResult<Prompt>
    where
        F: FnOnce(&mut Prompt) + Send,
    {
        let key = ["prompt", conversation_id, prompt_id];
        let mut prompt: Prompt = self.storage.read(&key).await?.ok_or_else(|| {
            ConversationError::PromptNotFound {
                id: prompt_id.to_string(),
            }
        })?;
        f(&mut prompt);
        self.storage.write(&key, &prompt).await?;
        Ok(prompt)
    }

    async fn delete_prompt(&self, conversation_id: &str, prompt_id: &str) -> CoreResult<()> {
        for event in self.prompt_events(prompt_id).await? {
            let key = ["prompt_event", prompt_id, &event.id];
            self.storage.remove(&key).await?;
        }
        for call in self.tool_calls(prompt_id).await? {
            let key = ["tool_call", prompt_id, &call.id];
            self.storage.remove(&key).await?;
        }
        let key = ["prompt", conversation_id, prompt_id];
        self.storage.remove(&key).await?;
        Ok(())
    }

    pub async fn prompts(&self, conversation_id: &str) -> CoreResult<Vec<Prompt>> {
        let prefix = ["prompt", conversation_id];
        let keys = self.storage.list(&prefix).await?;

        let mut prompts = Vec::new();
        for key in keys {
            let key_refs: Vec<&str> = key.iter().map(|s| s.as_str()).collect();
            if let Some(prompt) = self.storage.read::<Prompt>(&key_refs).await? {
                prompts.push(prompt);
            }
        }
        prompts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(prompts)
    }

    // ========================================================================
    // Block
    // ========================================================================

    pub async fn create_block(&self, block: Block) -> CoreResult<Block> {
        let key = ["block", &block.message_id, &block.id];
        self.storage.write(&key, &block).await?;
        Ok(block)
    }

    pub async fn get_block(&self, message_id: &str, block_id: &str) -> CoreResult<Block> {
        let key = ["block", message_id, block_id];
        self.storage
            .read(&key)
            .await?
            .ok_or_else(|| ConversationError::BlockNotFound { id: block_id.to_string() }.into())
    }

    pub async fn update_block<F>(
        &self,
        message_id: &str,
        block_id: &str,
        f: F,
    ) -> CoreResult<Block>
    where
        F: FnOnce(&mut Block) + Send,
    {
        let key = ["block", message_id, block_id];
        let mut block: Block = self.storage.read(&key).await?.ok_or_else(|| {
            ConversationError::BlockNotFound {
                id: block_id.to_string(),
            }
        })?;
        f(&mut block);
        self.storage.write(&key, &block).await?;
        Ok(block)
    }

    async fn delete_block(&self, message_id: &str, block_id: &str) -> CoreResult<()> {
        let key = ["block", message_id, block_id];
        self.storage.remove(&key).await?;
        Ok(())
    }

    /// Blocks of a message, ordered by `order`.
    pub async fn blocks(&self, message_id: &str) -> CoreResult<Vec<Block>> {
        let prefix = ["block", message_id];
        let keys = self.storage.list(&prefix).await?;

        let mut blocks = Vec::new();
        for key in keys {
            let key_refs: Vec<&str> = key.iter().map(|s| s.as_str()).collect();
            if let Some(block) = self.storage.read::<Block>(&key_refs).await? {
                blocks.push(block);
            }
        }
        blocks.sort_by_key(|b| b.order);
        Ok(blocks)
    }

    // ========================================================================
    // PromptEvent
    // ========================================================================

    pub async fn append_prompt_event(&self, event: PromptEvent) -> CoreResult<PromptEvent> {
        let key = ["prompt_event", &event.prompt_id, &event.id];
        self.storage.write(&key, &event).await?;
        Ok(event)
    }

    /// The append-only log for one prompt, in `index_num` order.
    pub async fn prompt_events(&self, prompt_id: &str) -> CoreResult<Vec<PromptEvent>> {
        let prefix = ["prompt_event", prompt_id];
        let keys = self.storage.list(&prefix).await?;

        let mut events = Vec::new();
        for key in keys {
            let key_refs: Vec<&str> = key.iter().map(|s| s.as_str()).collect();
            if let Some(event) = self.storage.read::<PromptEvent>(&key_refs).await? {
                events.push(event);
            }
        }
        events.sort_by_key(|e| e.index_num);
        Ok(events)
    }

    // ========================================================================
    // ToolCall
    // ========================================================================

    pub async fn create_tool_call(&self, call: ToolCall) -> CoreResult<ToolCall> {
        let key = ["tool_call", &call.prompt_id, &call.id];
        self.storage.write(&key, &call).await?;
        Ok(call)
    }

    pub async fn get_tool_call(&self, prompt_id: &str, tool_call_id: &str) -> CoreResult<ToolCall> {
        let key = ["tool_call", prompt_id, tool_call_id];
        self.storage.read(&key).await?.ok_or_else(|| {
            ConversationError::ToolCallNotFound {
                id: tool_call_id.to_string(),
            }
            .into()
        })
    }

    pub async fn update_tool_call<F>(
        &self,
        prompt_id: &str,
        tool_call_id: &str,
        f: F,
    ) -> CoreResult<ToolCall>
    where
        F: FnOnce(&mut ToolCall) + Send,
    {
        let key = ["tool_call", prompt_id, tool_call_id];
        let mut call: ToolCall = self.storage.read(&key).await?.ok_or_else(|| {
            ConversationError::ToolCallNotFound {
                id: tool_call_id.to_string(),
            }
        })?;
        f(&mut call);
        self.storage.write(&key, &call).await?;
        Ok(call)
    }

    /// Tool calls issued within one prompt, in the order they were created.
    pub async fn tool_calls(&self, prompt_id: &str) -> CoreResult<Vec<ToolCall>> {
        let prefix = ["tool_call", prompt_id];
        let keys = self.storage.list(&prefix).await?;

        let mut calls = Vec::new();
        for key in keys {
            let key_refs: Vec<&str> = key.iter().map(|s| s.as_str()).collect();
            if let Some(call) = self.storage.read::<ToolCall>(&key_refs).await? {
                calls.push(call);
            }
        }
        calls.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BlockType, MessageRole, MessageStatus};

    fn test_storage() -> JsonStorage {
        let dir = tempfile::tempdir().unwrap();
        JsonStorage::new(dir.keep())
    }

    #[tokio::test]
    async fn test_conversation_crud() {
        let repo = ConversationRepository::new(test_storage(), Bus::new());

        let conversation = Conversation::new("usr_1", "First chat");
        let created = repo.create_conversation(conversation).await.unwrap();
        assert!(!created.id.is_empty());

        let fetched = repo.get_conversation(&created.id).await.unwrap();
        assert_eq!(fetched.title, "First chat");

        let updated = repo
            .update_conversation(&created.id, |c| c.title = "Renamed".to_string())
            .await
            .unwrap();
        assert_eq!(updated.title, "Renamed");

        repo.delete_conversation(&created.id).await.unwrap();
        assert!(repo.get_conversation(&created.id).await.is_err());
    }

    #[tokio::test]
    async fn test_list_conversations_filters_by_user_and_sorts_recency_first() {
        let repo = ConversationRepository::new(test_storage(), Bus::new());

        let a = repo
            .create_conversation(Conversation::new("usr_1", "A"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        let b = repo
            .create_conversation(Conversation::new("usr_1", "B"))
            .await
            .unwrap();
        repo.create_conversation(Conversation::new("usr_2", "Other user"))
            .await
            .unwrap();

        let listed = repo.list_conversations("usr_1").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, b.id);
        assert_eq!(listed[1].id, a.id);
    }

    #[tokio::test]
    async fn test_queue_ordering() {
        let repo = ConversationRepository::new(test_storage(), Bus::new());
        let conversation = repo
            .create_conversation(Conversation::new("usr_1", "Chat"))
            .await
            .unwrap();

        let m1 = Message::queued_user(&conversation.id, 1);
        let m2 = Message::queued_user(&conversation.id, 2);
        repo.create_message(m1).await.unwrap();
        repo.create_message(m2).await.unwrap();

        let queued = repo.queued_messages(&conversation.id).await.unwrap();
        assert_eq!(queued.len(), 2);
        assert_eq!(queued[0].queue_order, Some(1));
        assert_eq!(queued[1].queue_order, Some(2));

        assert_eq!(repo.max_queue_order(&conversation.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_message_status_transition_publishes_update() {
        let bus = Bus::new();
        let mut rx = bus.subscribe::<MessageUpdated>().await;
        let repo = ConversationRepository::new(test_storage(), bus);

        let conversation = repo
            .create_conversation(Conversation::new("usr_1", "Chat"))
            .await
            .unwrap();
        let message = repo
            .create_message(Message::queued_user(&conversation.id, 1))
            .await
            .unwrap();

        repo.update_message(&conversation.id, &message.id, |m| {
            m.status = MessageStatus::Processing;
        })
        .await
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event.status, "processing");
    }

    #[tokio::test]
    async fn test_block_ordering_and_append() {
        let repo = ConversationRepository::new(test_storage(), Bus::new());
        let conversation = repo
            .create_conversation(Conversation::new("usr_1", "Chat"))
            .await
            .unwrap();
        let message = repo
            .create_message(Message::processing_assistant(&conversation.id))
            .await
            .unwrap();

        let second = Block::new(&message.id, None, BlockType::Text, 1);
        let first = Block::new(&message.id, None, BlockType::Text, 0);
        repo.create_block(second).await.unwrap();
        let first = repo.create_block(first).await.unwrap();

        repo.update_block(&message.id, &first.id, |b| b.append("hello"))
            .await
            .unwrap();

        let blocks = repo.blocks(&message.id).await.unwrap();
        assert_eq!(blocks[0].order, 0);
        assert_eq!(blocks[0].content, "hello");
        assert_eq!(blocks[1].order, 1);
    }

    #[tokio::test]
    async fn test_prompt_event_log_orders_by_index() {
        let repo = ConversationRepository::new(test_storage(), Bus::new());
        let conversation = repo
            .create_conversation(Conversation::new("usr_1", "Chat"))
            .await
            .unwrap();
        let message = repo
            .create_message(Message::processing_assistant(&conversation.id))
            .await
            .unwrap();
        let prompt = repo
            .create_prompt(Prompt::new(&conversation.id, &message.id, "mock", None))
            .await
            .unwrap();

        for i in (0..5).rev() {
            repo.append_prompt_event(PromptEvent::new(&prompt.id, i, "chunk", serde_json::json!({})))
                .await
                .unwrap();
        }

        let events = repo.prompt_events(&prompt.id).await.unwrap();
        let indices: Vec<u32> = events.iter().map(|e| e.index_num).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_role_label_lowercased_in_event() {
        let bus = Bus::new();
        let mut rx = bus.subscribe::<MessageCreated>().await;
        let repo = ConversationRepository::new(test_storage(), bus);
        let conversation = repo
            .create_conversation(Conversation::new("usr_1", "Chat"))
            .await
            .unwrap();
        repo.create_message(Message::queued_user(&conversation.id, 1))
            .await
            .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event.role, "user");
    }
}
