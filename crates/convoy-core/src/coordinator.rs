//! Conversation Coordinator — owns the user-message queue, the
//! single-active-prompt invariant, and attach semantics over the
//! Subscriber Bus (§4.5/§4.6).
//!
//! The Prompt Engine only knows how to drive one Prompt; the Coordinator
//! is what decides *when* a new Prompt starts, serializes access to a
//! Conversation via `active_prompt_id`, and rolls a failed turn's
//! triggering user Message back to `queued` so the caller can resubmit or
//! edit it — the Engine has no notion of which Message triggered it, only
//! the Coordinator does.

use crate::bus::{Bus, BusEvent};
use crate::conversation::ConversationRepository;
use crate::error::{ConversationError, CoreError, CoreResult};
use crate::model::{
    Block, BlockType, Conversation, Message, MessageRole, MessageStatus, Prompt, PromptStatus,
    ToolCall,
};
use crate::prompt::PromptEngine;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// One Message plus everything rendering it requires.
#[derive(Debug, Clone, Serialize)]
pub struct MessageSnapshot {
    pub message: Message,
    pub blocks: Vec<Block>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

/// A point-in-time render of a whole Conversation.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    pub conversation: Conversation,
    pub messages: Vec<MessageSnapshot>,
}

/// Snapshot plus a live tail of Bus events for this conversation, with any
/// in-flight Prompt replayed synthetically so an observer attaching
/// mid-stream can still render complete state from events alone (§4.6).
pub struct ConversationStream {
    pub snapshot: ConversationSnapshot,
    pub events: mpsc::UnboundedReceiver<BusEvent>,
}

/// Coordinates Prompt Engine runs against a persisted Conversation store.
pub struct ConversationCoordinator {
    repo: ConversationRepository,
    engine: Arc<PromptEngine>,
    default_model: String,
    cwd: PathBuf,
    active_aborts: Arc<Mutex<HashMap<String, CancellationToken>>>,
    /// Per-conversation lock serializing the single-active-prompt
    /// check-and-set in `process_queue`. `JsonStorage`'s read-then-write has
    /// no CAS of its own, so without this two concurrent `queue_message`
    /// calls on the same conversation could both observe
    /// `active_prompt_id == None` and both start a Prompt.
    queue_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl ConversationCoordinator {
    pub fn new(repo: ConversationRepository, engine: Arc<PromptEngine>, default_model: impl Into<String>, cwd: PathBuf) -> Self {
        Self {
            repo,
            engine,
            default_model: default_model.into(),
            cwd,
            active_aborts: Arc::new(Mutex::new(HashMap::new())),
            queue_locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn queue_lock(&self, conversation_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.queue_locks.lock().await;
        locks
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn bus(&self) -> &Bus {
        self.repo.bus()
    }

    // ========================================================================
    // Conversation-level operations
    // ========================================================================

    pub async fn create_conversation(&self, user_id: &str, title: impl Into<String>) -> CoreResult<Conversation> {
        self.repo.create_conversation(Conversation::new(user_id, title)).await
    }

    pub async fn list_conversations(&self, user_id: &str) -> CoreResult<Vec<Conversation>> {
        self.repo.list_conversations(user_id).await
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> CoreResult<ConversationSnapshot> {
        self.snapshot(conversation_id).await
    }

    pub async fn set_title(&self, conversation_id: &str, title: impl Into<String>) -> CoreResult<Conversation> {
        let title = title.into();
        self.repo
            .update_conversation(conversation_id, move |c| c.title = title)
            .await
    }

    pub async fn delete_conversation(&self, conversation_id: &str) -> CoreResult<()> {
        self.active_aborts.lock().await.remove(conversation_id);
        self.queue_locks.lock().await.remove(conversation_id);
        self.repo.delete_conversation(conversation_id).await
    }

    async fn snapshot(&self, conversation_id: &str) -> CoreResult<ConversationSnapshot> {
        let conversation = self.repo.get_conversation(conversation_id).await?;
        let messages = self.repo.messages(conversation_id).await?;
        let prompts = self.repo.prompts(conversation_id).await?;

        let mut snapshots = Vec::with_capacity(messages.len());
        for message in messages {
            let blocks = self.repo.blocks(&message.id).await?;
            let tool_calls = if message.role == MessageRole::Assistant {
                let mut calls = Vec::new();
                if let Some(prompt) = prompts.iter().find(|p| p.message_id == message.id) {
                    calls = self.repo.tool_calls(&prompt.id).await?;
                }
                calls
            } else {
                Vec::new()
            };
            snapshots.push(MessageSnapshot { message, blocks, tool_calls });
        }

        Ok(ConversationSnapshot { conversation, messages: snapshots })
    }

    // ========================================================================
    // Queue
    // ========================================================================

    /// Insert a queued user Message and, if no Prompt is currently active
    /// for this conversation, kick off `process_queue`.
    pub async fn queue_message(&self, conversation_id: &str, content: impl Into<String>) -> CoreResult<Message> {
        let queue_order = self.repo.max_queue_order(conversation_id).await? + 1;
        let message = self
            .repo
            .create_message(Message::queued_user(conversation_id, queue_order))
            .await?;

        let mut block = Block::new(&message.id, None, BlockType::Text, 0);
        block.content = content.into();
        self.repo.create_block(block).await?;

        // `process_queue` itself re-checks `active_prompt_id` under the
        // per-conversation queue lock, so it's always safe to call
        // unconditionally here — the check-and-set race lives entirely
        // inside `process_queue`, not split across this caller too.
        self.process_queue(conversation_id).await?;

        Ok(message)
    }

    /// Replace the content of a still-queued Message. Rejected once it has
    /// left `status=queued` (§8 boundary behavior).
    pub async fn edit_queued_message(&self, conversation_id: &str, message_id: &str, content: impl Into<String>) -> CoreResult<()> {
        let message = self.repo.get_message(conversation_id, message_id).await?;
        if message.status != MessageStatus::Queued {
            return Err(CoreError::Conversation(ConversationError::NotQueued {
                id: message_id.to_string(),
            }));
        }
        let blocks = self.repo.blocks(message_id).await?;
        let content = content.into();
        if let Some(block) = blocks.first() {
            self.repo
                .update_block(message_id, &block.id, move |b| b.content = content)
                .await?;
        }
        Ok(())
    }

    /// Remove a still-queued Message. Rejected once it has left
    /// `status=queued`.
    pub async fn delete_queued_message(&self, conversation_id: &str, message_id: &str) -> CoreResult<()> {
        let message = self.repo.get_message(conversation_id, message_id).await?;
        if message.status != MessageStatus::Queued {
            return Err(CoreError::Conversation(ConversationError::NotQueued {
                id: message_id.to_string(),
            }));
        }
        self.repo.delete_message(conversation_id, message_id).await
    }

    /// Dequeue the lowest-`queue_order` Message and drive a Prompt for it,
    /// if no Prompt is already active. Runs the turn in a detached task;
    /// returns once the turn has been *started*, not once it completes.
    pub async fn process_queue(&self, conversation_id: &str) -> CoreResult<()> {
        let lock = self.queue_lock(conversation_id).await;
        let _guard = lock.lock().await;

        let conversation = self.repo.get_conversation(conversation_id).await?;
        if conversation.active_prompt_id.is_some() {
            return Ok(());
        }

        let queued = self.repo.queued_messages(conversation_id).await?;
        let Some(user_message) = queued.into_iter().next() else {
            return Ok(());
        };

        self.repo
            .update_message(conversation_id, &user_message.id, |m| m.status = MessageStatus::Processing)
            .await?;
        for block in self.repo.blocks(&user_message.id).await? {
            self.repo
                .update_block(&user_message.id, &block.id, |b| b.finalize())
                .await?;
        }
        self.repo
            .update_message(conversation_id, &user_message.id, |m| m.status = MessageStatus::Completed)
            .await?;

        let assistant_message = self
            .repo
            .create_message(Message::processing_assistant(conversation_id))
            .await?;
        let prompt = self
            .repo
            .create_prompt(Prompt::new(conversation_id, &assistant_message.id, &self.default_model, None))
            .await?;
        self.repo.set_active_prompt(conversation_id, Some(prompt.id.clone())).await?;

        let abort = CancellationToken::new();
        self.active_aborts
            .lock()
            .await
            .insert(conversation_id.to_string(), abort.clone());

        let coordinator = self.clone_for_task();
        let conversation_id = conversation_id.to_string();
        let prompt_id = prompt.id.clone();
        let user_message_id = user_message.id.clone();

        tokio::spawn(async move {
            coordinator
                .run_and_settle(&conversation_id, &prompt_id, &user_message_id, abort)
                .await;
        });

        Ok(())
    }

    async fn run_and_settle(&self, conversation_id: &str, prompt_id: &str, user_message_id: &str, abort: CancellationToken) {
        let result = self.engine.run(conversation_id, prompt_id, self.cwd.clone(), abort).await;
        self.active_aborts.lock().await.remove(conversation_id);

        if let Err(e) = result {
            error!(conversation_id, prompt_id, error = %e, "prompt engine returned storage error");
            let _ = self.repo.set_active_prompt(conversation_id, None).await;
            return;
        }

        let prompt = match self.repo.get_prompt(conversation_id, prompt_id).await {
            Ok(p) => p,
            Err(e) => {
                error!(conversation_id, prompt_id, error = %e, "failed to reload prompt after run");
                return;
            }
        };

        let _ = self.repo.set_active_prompt(conversation_id, None).await;

        match prompt.status {
            PromptStatus::Completed => {
                if let Err(e) = self.process_queue(conversation_id).await {
                    error!(conversation_id, error = %e, "failed to advance queue after completion");
                }
            }
            PromptStatus::Error => {
                warn!(conversation_id, prompt_id, "prompt failed, rolling triggering message back to queued");
                if let Err(e) = self
                    .repo
                    .update_message(conversation_id, user_message_id, |m| m.status = MessageStatus::Queued)
                    .await
                {
                    error!(conversation_id, error = %e, "failed to roll back triggering message");
                }
                // Deliberately not recursing into process_queue: a failed
                // turn is not auto-retried (§7); the rolled-back message
                // waits for the caller to resubmit or edit it.
            }
            other => {
                warn!(conversation_id, prompt_id, status = ?other, "prompt left non-terminal after engine run returned");
            }
        }
    }

    fn clone_for_task(&self) -> Arc<Self> {
        Arc::new(Self {
            repo: self.repo.clone(),
            engine: self.engine.clone(),
            default_model: self.default_model.clone(),
            cwd: self.cwd.clone(),
            active_aborts: self.active_aborts.clone(),
            queue_locks: self.queue_locks.clone(),
        })
    }

    // ========================================================================
    // Active prompt
    // ========================================================================

    pub async fn get_active_prompt(&self, conversation_id: &str) -> CoreResult<Option<Prompt>> {
        let conversation = self.repo.get_conversation(conversation_id).await?;
        match conversation.active_prompt_id {
            Some(prompt_id) => Ok(Some(self.repo.get_prompt(conversation_id, &prompt_id).await?)),
            None => Ok(None),
        }
    }

    pub async fn cancel_active_prompt(&self, conversation_id: &str) -> CoreResult<()> {
        if let Some(token) = self.active_aborts.lock().await.get(conversation_id) {
            token.cancel();
            info!(conversation_id, "cancellation requested for active prompt");
        }
        Ok(())
    }

    // ========================================================================
    // Subscriber Bus attach
    // ========================================================================

    /// Attach to a conversation: a snapshot plus a live event sequence. If a
    /// Prompt is active at attach time, synthesizes `prompt-started`
    /// followed by `block-start`/`block-delta` for every non-finalized
    /// Block before switching to real-time events, so an observer can
    /// render complete state from events alone (§4.6).
    pub async fn stream_conversation(&self, conversation_id: &str) -> CoreResult<ConversationStream> {
        let mut wildcard = self.bus().subscribe_all();
        let snapshot = self.snapshot(conversation_id).await?;

        let (tx, rx) = mpsc::unbounded_channel();

        if let Some(prompt_id) = snapshot.conversation.active_prompt_id.clone() {
            if let Ok(prompt) = self.repo.get_prompt(conversation_id, &prompt_id).await {
                let _ = tx.send(synthetic_event(
                    "prompt-started",
                    serde_json::json!({
                        "conversation_id": conversation_id,
                        "prompt_id": prompt.id,
                        "message_id": prompt.message_id,
                    }),
                ));
            }
            for message_snapshot in &snapshot.messages {
                for block in &message_snapshot.blocks {
                    if block.is_finalized {
                        continue;
                    }
                    let _ = tx.send(synthetic_event(
                        "block-start",
                        serde_json::json!({
                            "conversation_id": conversation_id,
                            "message_id": block.message_id,
                            "block_id": block.id,
                            "block_type": block.block_type,
                            "order": block.order,
                        }),
                    ));
                    let _ = tx.send(synthetic_event(
                        "block-delta",
                        serde_json::json!({
                            "conversation_id": conversation_id,
                            "message_id": block.message_id,
                            "block_id": block.id,
                            "content": block.content,
                        }),
                    ));
                }
            }
        }

        let conversation_id = conversation_id.to_string();
        tokio::spawn(async move {
            loop {
                match wildcard.recv().await {
                    Ok(event) => {
                        let belongs = event
                            .payload
                            .get("conversation_id")
                            .and_then(|v| v.as_str())
                            .map(|id| id == conversation_id)
                            .unwrap_or(false);
                        if belongs && tx.send(event).is_err() {
                            break;
                        }
                    }
                    // The wildcard relay is a bounded internal buffer (see
                    // `DEFAULT_CAPACITY`); a lagging subscriber skips the
                    // missed events rather than ending its stream.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(conversation_id, skipped, "wildcard bus subscriber lagged; resuming");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(ConversationStream { snapshot, events: rx })
    }
}

/// Build a `BusEvent` outside the Bus's own sequence space (seq=0), marking
/// it as a synthetic attach-time replay frame rather than a real published
/// event.
fn synthetic_event(event_type: &str, payload: serde_json::Value) -> BusEvent {
    BusEvent {
        seq: 0,
        event_type: event_type.to_string(),
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use convoy_provider::mock::MockProvider;
    use convoy_provider::model::anthropic::claude_sonnet_4_5;
    use convoy_provider::LanguageModel;
    use convoy_storage::json::JsonStorage;
    use convoy_tools::{ShellSessionPool, ToolRegistry};

    fn test_coordinator(provider: Arc<dyn LanguageModel>) -> ConversationCoordinator {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.keep());
        let bus = Bus::new();
        let repo = ConversationRepository::new(storage, bus);
        let registry = Arc::new(ToolRegistry::with_builtins());
        let shell_pool = Arc::new(ShellSessionPool::new("/bin/bash"));
        let engine = Arc::new(PromptEngine::new(provider, repo.clone(), registry, shell_pool));
        ConversationCoordinator::new(repo, engine, "mock", std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_queue_message_triggers_processing_and_completes() {
        let provider: Arc<dyn LanguageModel> =
            Arc::new(MockProvider::with_text_response(claude_sonnet_4_5(), "Hi!"));
        let coordinator = test_coordinator(provider);

        let conversation = coordinator.create_conversation("usr_1", "Chat").await.unwrap();
        coordinator
            .queue_message(&conversation.id, "Hello there")
            .await
            .unwrap();

        for _ in 0..50 {
            let snapshot = coordinator.get_conversation(&conversation.id).await.unwrap();
            if snapshot.conversation.active_prompt_id.is_none() && snapshot.messages.len() == 2 {
                assert_eq!(snapshot.messages[0].message.status, MessageStatus::Completed);
                assert_eq!(snapshot.messages[1].message.status, MessageStatus::Completed);
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("conversation did not settle");
    }

    #[tokio::test]
    async fn test_edit_queued_message_rejected_once_processing() {
        let provider: Arc<dyn LanguageModel> =
            Arc::new(MockProvider::with_text_response(claude_sonnet_4_5(), "Hi!"));
        let coordinator = test_coordinator(provider);

        let conversation = coordinator.create_conversation("usr_1", "Chat").await.unwrap();
        let message = coordinator.queue_message(&conversation.id, "First").await.unwrap();

        for _ in 0..50 {
            let reloaded = coordinator
                .repo
                .get_message(&conversation.id, &message.id)
                .await
                .unwrap();
            if reloaded.status != MessageStatus::Queued {
                let err = coordinator
                    .edit_queued_message(&conversation.id, &message.id, "Changed")
                    .await
                    .unwrap_err();
                assert!(matches!(
                    err,
                    CoreError::Conversation(ConversationError::NotQueued { .. })
                ));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("message never left queued");
    }

    #[tokio::test]
    async fn test_second_message_queues_behind_active_prompt() {
        let provider: Arc<dyn LanguageModel> = Arc::new(MockProvider::new(claude_sonnet_4_5()));
        let coordinator = test_coordinator(provider);

        let conversation = coordinator.create_conversation("usr_1", "Chat").await.unwrap();
        coordinator.queue_message(&conversation.id, "First").await.unwrap();
        let second = coordinator.queue_message(&conversation.id, "Second").await.unwrap();

        assert_eq!(second.queue_order, Some(2));
    }
}
