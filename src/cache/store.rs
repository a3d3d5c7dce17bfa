use dashmap::DashMap;
use log::{debug, trace};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::entry::{CacheEntry, CacheKey, Freshness};
use crate::api::ChatBackend;
use crate::error::ApiError;
use crate::types::events::{CacheChange, EventBus, InboundEvent};
use crate::types::{Chat, ChatMessages, Message};

/// Which conversations an assistant toggle applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantScope {
    Chat(String),
    /// Every conversation of the operator account.
    All { user_id: String },
}

/// Which cache regions an optimistic append touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    pub log_appended: bool,
    pub list_updated: bool,
}

impl AppendOutcome {
    pub fn is_noop(&self) -> bool {
        !self.log_appended && !self.list_updated
    }
}

/// Owner of the cached chat list and per-chat message logs.
///
/// Entries are created by the first successful fetch and replaced by later
/// fetches. Local mutations go through [`select_chat`](Self::select_chat),
/// [`append_message`](Self::append_message) and
/// [`set_assistant_enabled`](Self::set_assistant_enabled); each of them is a
/// no-op when the entry it targets was never fetched.
pub struct ChatCacheStore {
    backend: Arc<dyn ChatBackend>,
    bus: Arc<EventBus>,
    chats: RwLock<Option<CacheEntry<Vec<Chat>>>>,
    threads: DashMap<String, CacheEntry<ChatMessages>>,
    chats_freshness: Freshness,
    messages_freshness: Freshness,
}

/// Most recent first. The sort is stable, so ties keep their prior order;
/// chats without a last message sink to the bottom.
fn sort_by_recency(chats: &mut [Chat]) {
    chats.sort_by(|a, b| b.last_activity().cmp(&a.last_activity()));
}

impl ChatCacheStore {
    pub fn new(backend: Arc<dyn ChatBackend>, bus: Arc<EventBus>) -> Self {
        Self {
            backend,
            bus,
            chats: RwLock::new(None),
            threads: DashMap::new(),
            chats_freshness: Freshness::NeverStale,
            messages_freshness: Freshness::NeverStale,
        }
    }

    pub fn with_freshness(mut self, chats: Freshness, messages: Freshness) -> Self {
        self.chats_freshness = chats;
        self.messages_freshness = messages;
        self
    }

    // --- selectors ---

    /// Snapshot of the cached chat list, `None` while cold.
    pub async fn chats(&self) -> Option<Vec<Chat>> {
        self.chats.read().await.as_ref().map(|e| e.data().clone())
    }

    pub async fn chat(&self, chat_id: &str) -> Option<Chat> {
        let chats = self.chats.read().await;
        chats
            .as_ref()
            .and_then(|e| e.data().iter().find(|c| c.id == chat_id).cloned())
    }

    /// Snapshot of one conversation's cached log, `None` while cold.
    pub fn messages(&self, chat_id: &str) -> Option<ChatMessages> {
        self.threads.get(chat_id).map(|e| e.data().clone())
    }

    /// `None` when the key was never fetched.
    pub async fn is_stale(&self, key: &CacheKey) -> Option<bool> {
        match key {
            CacheKey::Chats => self.chats.read().await.as_ref().map(CacheEntry::is_stale),
            CacheKey::Chat(id) => self.threads.get(id).map(|e| e.is_stale()),
        }
    }

    // --- fetching ---

    /// Cached chat list while fresh, otherwise a new snapshot from the backend.
    pub async fn fetch_chats(&self) -> Result<Vec<Chat>, ApiError> {
        if let Some(entry) = self.chats.read().await.as_ref()
            && !entry.is_stale()
        {
            trace!("chats served from cache");
            return Ok(entry.data().clone());
        }
        self.refresh_chats().await
    }

    /// Fetch the chat list and replace the cached one.
    pub async fn refresh_chats(&self) -> Result<Vec<Chat>, ApiError> {
        let chats = self.backend.fetch_chats().await?;
        debug!("Fetched {} chats", chats.len());
        *self.chats.write().await = Some(CacheEntry::new(chats.clone(), self.chats_freshness));
        self.bus.publish_change(CacheChange::ChatsReplaced);
        Ok(chats)
    }

    /// Cached message log while fresh, otherwise a new snapshot.
    pub async fn fetch_chat_messages(&self, chat_id: &str) -> Result<ChatMessages, ApiError> {
        if let Some(entry) = self.threads.get(chat_id)
            && !entry.is_stale()
        {
            trace!("chat/{chat_id} served from cache");
            return Ok(entry.data().clone());
        }
        self.refresh_chat_messages(chat_id).await
    }

    pub async fn refresh_chat_messages(&self, chat_id: &str) -> Result<ChatMessages, ApiError> {
        let log = self.backend.fetch_chat_messages(chat_id).await?;
        debug!("Fetched {} messages for chat {chat_id}", log.messages.len());
        self.threads.insert(
            chat_id.to_string(),
            CacheEntry::new(log.clone(), self.messages_freshness),
        );
        self.bus
            .publish_change(CacheChange::MessagesReplaced(chat_id.to_string()));
        Ok(log)
    }

    // --- mutations ---

    /// Reset the unread counter of a chat in the cached list.
    ///
    /// Local only: the server is not told that the chat was read. Returns
    /// whether anything changed; selecting an already-read chat is a no-op.
    pub async fn select_chat(&self, chat_id: &str) -> bool {
        let mut guard = self.chats.write().await;
        let Some(entry) = guard.as_mut() else {
            return false;
        };
        let Some(chat) = entry.data_mut().iter_mut().find(|c| c.id == chat_id) else {
            return false;
        };
        if chat.new_client_messages_count == 0 {
            return false;
        }
        chat.new_client_messages_count = 0;
        drop(guard);

        debug!("Chat {chat_id} marked read locally");
        self.bus
            .publish_change(CacheChange::ChatSelected(chat_id.to_string()));
        true
    }

    /// Optimistically record a message sent to `conversation_id`.
    ///
    /// The message is appended to the conversation's log (insertion order is
    /// authoritative, timestamps are not compared), becomes the chat's
    /// `last_message`, and the chat list is re-sorted by recency. Regions
    /// that were never fetched are left alone.
    pub async fn append_message(&self, conversation_id: &str, message: Message) -> AppendOutcome {
        let message_id = message.id.clone();
        let mut outcome = AppendOutcome::default();

        if let Some(mut entry) = self.threads.get_mut(conversation_id) {
            entry.data_mut().messages.push(message.clone());
            outcome.log_appended = true;
        }

        {
            let mut guard = self.chats.write().await;
            if let Some(entry) = guard.as_mut() {
                let chats = entry.data_mut();
                if let Some(chat) = chats.iter_mut().find(|c| c.id == conversation_id) {
                    chat.last_message = Some(message);
                    sort_by_recency(chats);
                    outcome.list_updated = true;
                }
            }
        }

        if outcome.is_noop() {
            trace!("append to cold chat {conversation_id} ignored");
        } else {
            self.bus.publish_change(CacheChange::MessageAppended {
                chat_id: conversation_id.to_string(),
                message_id,
            });
        }
        outcome
    }

    /// Patch the assistant flag of cached conversations. This mirrors an
    /// emitted toggle event; it is not confirmed by the server. Returns the
    /// ids of the entries that were patched.
    pub async fn set_assistant_enabled(&self, enabled: bool, scope: &AssistantScope) -> Vec<String> {
        let mut patched = Vec::new();
        match scope {
            AssistantScope::Chat(chat_id) => {
                if let Some(mut entry) = self.threads.get_mut(chat_id) {
                    entry.data_mut().thread.enabled = enabled;
                    patched.push(chat_id.clone());
                }
            }
            AssistantScope::All { .. } => {
                for mut entry in self.threads.iter_mut() {
                    entry.value_mut().data_mut().thread.enabled = enabled;
                    patched.push(entry.key().clone());
                }
            }
        }

        if !patched.is_empty() {
            patched.sort();
            self.bus.publish_change(CacheChange::AssistantToggled {
                chat_ids: patched.clone(),
                enabled,
            });
        }
        patched
    }

    // --- invalidation ---

    /// Mark an entry stale so the next fetch goes to the backend. The cached
    /// data stays readable until then.
    pub async fn invalidate(&self, key: &CacheKey) {
        let found = match key {
            CacheKey::Chats => match self.chats.write().await.as_mut() {
                Some(entry) => {
                    entry.invalidate();
                    true
                }
                None => false,
            },
            CacheKey::Chat(id) => match self.threads.get_mut(id) {
                Some(mut entry) => {
                    entry.invalidate();
                    true
                }
                None => false,
            },
        };
        if found {
            debug!("Invalidated {key}");
            self.bus.publish_change(CacheChange::Invalidated(key.clone()));
        }
    }

    /// Invalidation hook for server events that name a conversation.
    pub async fn handle_inbound(&self, event: &InboundEvent) {
        if let Some(chat_id) = event.conversation_id() {
            debug!("{} touches chat {chat_id}", event.name);
            self.invalidate(&CacheKey::Chats).await;
            self.invalidate(&CacheKey::Chat(chat_id.to_string())).await;
        }
    }
}
