//! Event bus for inter-component communication.
//!
//! The event bus provides a publish/subscribe mechanism for components
//! to communicate without direct coupling. Events are typed and can
//! carry arbitrary payload data. Every published event is additionally
//! wrapped with a monotonically increasing, process-wide sequence number,
//! so a transport layer built on top of the Bus can expose a stable event
//! id and detect gaps on a lagging receiver.
//!
//! # Example
//!
//! ```ignore
//! let bus = Bus::new();
//!
//! let mut rx = bus.subscribe::<PromptStarted>().await;
//! tokio::spawn(async move {
//!     while let Ok(event) = rx.recv().await {
//!         println!("prompt started: {}", event.event.prompt_id);
//!     }
//! });
//!
//! bus.publish(PromptStarted { conversation_id: "cnv_1".into(), prompt_id: "prm_1".into() }).await;
//! ```

use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::RwLock;

/// Capacity of the internal wildcard relay channel every `BusEvent` is
/// fanned out through before `ConversationCoordinator::stream_conversation`
/// re-delivers it to a subscriber's own `mpsc::unbounded_channel`. This is an
/// internal buffer, not the externally-visible per-subscriber queue: a
/// subscriber that reads slower than this fills up only loses events from
/// the shared relay (reported via `RecvError::Lagged` and resumed, see
/// `stream_conversation`), never from its own channel, which stays unbounded
/// as §4.6 requires. A documented, bounded internal relay bounds memory when
/// a subscriber disappears without unsubscribing; 256 is generous relative
/// to a single Prompt's burst rate of Block/Tool events.
const DEFAULT_CAPACITY: usize = 256;

/// Trait for events that can be published on the bus.
pub trait Event: Clone + Send + Sync + 'static {
    /// Event type name for serialization/logging.
    fn event_type() -> &'static str;
}

/// An event wrapped with the sequence number it was published with.
#[derive(Debug, Clone)]
pub struct SequencedEvent<E> {
    /// Monotonically increasing, process-wide; not per-conversation.
    pub seq: u64,
    pub event: E,
}

/// The event bus for pub/sub communication.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

struct BusInner {
    /// Typed channels by TypeId.
    channels: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    /// Wildcard subscribers (receive all events as JSON).
    wildcard: broadcast::Sender<BusEvent>,
    /// Process-wide sequence counter, shared across every event type.
    sequence: AtomicU64,
}

/// A serialized event for wildcard subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub seq: u64,
    /// Event type name.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload as JSON.
    pub payload: serde_json::Value,
}

impl Bus {
    /// Create a new event bus.
    pub fn new() -> Self {
        let (wildcard, _) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                channels: RwLock::new(HashMap::new()),
                wildcard,
                sequence: AtomicU64::new(0),
            }),
        }
    }

    /// Publish an event to all subscribers, stamping it with the next
    /// sequence number.
    pub async fn publish<E: Event + Serialize>(&self, event: E) -> u64 {
        let seq = self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        let type_id = TypeId::of::<E>();

        let channels = self.inner.channels.read().await;
        if let Some(sender) = channels.get(&type_id) {
            if let Some(tx) = sender.downcast_ref::<broadcast::Sender<SequencedEvent<E>>>() {
                let _ = tx.send(SequencedEvent {
                    seq,
                    event: event.clone(),
                });
            }
        }
        drop(channels);

        if let Ok(payload) = serde_json::to_value(&event) {
            let _ = self.inner.wildcard.send(BusEvent {
                seq,
                event_type: E::event_type().to_string(),
                payload,
            });
        }

        seq
    }

    /// Subscribe to events of type E.
    pub async fn subscribe<E: Event>(&self) -> broadcast::Receiver<SequencedEvent<E>> {
        let type_id = TypeId::of::<E>();

        {
            let channels = self.inner.channels.read().await;
            if let Some(sender) = channels.get(&type_id) {
                if let Some(tx) = sender.downcast_ref::<broadcast::Sender<SequencedEvent<E>>>() {
                    return tx.subscribe();
                }
            }
        }

        let mut channels = self.inner.channels.write().await;
        let (tx, rx) = broadcast::channel::<SequencedEvent<E>>(DEFAULT_CAPACITY);
        channels.insert(type_id, Box::new(tx));
        rx
    }

    /// Subscribe to all events (wildcard), as JSON.
    pub fn subscribe_all(&self) -> broadcast::Receiver<BusEvent> {
        self.inner.wildcard.subscribe()
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Event taxonomy
// ============================================================================

/// A user or assistant Message was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageCreated {
    pub conversation_id: String,
    pub message_id: String,
    pub role: String,
}

impl Event for MessageCreated {
    fn event_type() -> &'static str {
        "message-created"
    }
}

/// A Message's status or content changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageUpdated {
    pub conversation_id: String,
    pub message_id: String,
    pub status: String,
}

impl Event for MessageUpdated {
    fn event_type() -> &'static str {
        "message-updated"
    }
}

/// A Prompt began driving provider calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptStarted {
    pub conversation_id: String,
    pub prompt_id: String,
    pub message_id: String,
}

impl Event for PromptStarted {
    fn event_type() -> &'static str {
        "prompt-started"
    }
}

/// A Prompt reached `completed`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptCompleted {
    pub conversation_id: String,
    pub prompt_id: String,
}

impl Event for PromptCompleted {
    fn event_type() -> &'static str {
        "prompt-completed"
    }
}

/// A Prompt reached `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptFailed {
    pub conversation_id: String,
    pub prompt_id: String,
    pub message: String,
}

impl Event for PromptFailed {
    fn event_type() -> &'static str {
        "prompt-failed"
    }
}

/// A Block was created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockStart {
    pub conversation_id: String,
    pub message_id: String,
    pub block_id: String,
    pub block_type: String,
    pub order: u32,
}

impl Event for BlockStart {
    fn event_type() -> &'static str {
        "block-start"
    }
}

/// Incremental content was appended to a Block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDelta {
    pub conversation_id: String,
    pub message_id: String,
    pub block_id: String,
    pub content: String,
}

impl Event for BlockDelta {
    fn event_type() -> &'static str {
        "block-delta"
    }
}

/// A Block was finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockEnd {
    pub conversation_id: String,
    pub message_id: String,
    pub block_id: String,
}

impl Event for BlockEnd {
    fn event_type() -> &'static str {
        "block-end"
    }
}

/// A ToolCall transitioned to `executing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallStarted {
    pub conversation_id: String,
    pub prompt_id: String,
    pub tool_call_id: String,
    pub tool_name: String,
}

impl Event for ToolCallStarted {
    fn event_type() -> &'static str {
        "tool-call-started"
    }
}

/// A ToolCall emitted an output chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallProgress {
    pub conversation_id: String,
    pub tool_call_id: String,
    pub chunk: String,
}

impl Event for ToolCallProgress {
    fn event_type() -> &'static str {
        "tool-call-progress"
    }
}

/// A ToolCall reached `complete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallCompleted {
    pub conversation_id: String,
    pub tool_call_id: String,
    pub output: String,
}

impl Event for ToolCallCompleted {
    fn event_type() -> &'static str {
        "tool-call-completed"
    }
}

/// A ToolCall reached `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallFailed {
    pub conversation_id: String,
    pub tool_call_id: String,
    pub message: String,
}

impl Event for ToolCallFailed {
    fn event_type() -> &'static str {
        "tool-call-failed"
    }
}

/// A ToolCall reached `canceled`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallCanceled {
    pub conversation_id: String,
    pub tool_call_id: String,
}

impl Event for ToolCallCanceled {
    fn event_type() -> &'static str {
        "tool-call-canceled"
    }
}
