use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::cache::CacheKey;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// The Socket.IO namespace connection was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connected {
    pub sid: Option<String>,
}

/// The event channel lost its transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnected;

/// An event pushed by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundEvent {
    pub name: String,
    pub data: Value,
}

impl InboundEvent {
    /// The conversation the event refers to, when its payload names one.
    pub fn conversation_id(&self) -> Option<&str> {
        self.data.get("conversationId").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    /// Rendered with destructive styling (failed uploads, lost messages).
    Destructive,
}

/// A user-facing notification, terminal at the UI layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub title: String,
    pub description: String,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            severity: Severity::Info,
            title: title.into(),
            description: description.into(),
        }
    }

    pub fn destructive(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            severity: Severity::Destructive,
            title: title.into(),
            description: description.into(),
        }
    }
}

/// What changed in the chat cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    ChatsReplaced,
    ChatSelected(String),
    MessagesReplaced(String),
    MessageAppended { chat_id: String, message_id: String },
    AssistantToggled { chat_ids: Vec<String>, enabled: bool },
    Invalidated(CacheKey),
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for each event type.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Connection events
    (connected, Arc<Connected>),
    (disconnected, Arc<Disconnected>),

    // Server-pushed events
    (inbound, Arc<InboundEvent>),

    // Local state
    (cache_changed, Arc<CacheChange>),
    (notice, Arc<Notice>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Publish a notice. Nobody listening is fine.
    pub fn notify(&self, notice: Notice) {
        let _ = self.notice.send(Arc::new(notice));
    }

    pub(crate) fn publish_change(&self, change: CacheChange) {
        let _ = self.cache_changed.send(Arc::new(change));
    }
}
