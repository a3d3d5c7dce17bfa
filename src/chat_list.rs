//! Sidebar projection of the cached chat list.

use log::debug;

use crate::cache::ChatCacheStore;
use crate::types::Chat;

/// One displayed sidebar entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRow {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub unread: u32,
    pub selected: bool,
    pub last_activity: Option<i64>,
}

impl ChatRow {
    fn from_chat(chat: &Chat, selected: Option<&str>) -> Self {
        Self {
            id: chat.id.clone(),
            title: chat.display_name().to_string(),
            preview: chat
                .last_message
                .as_ref()
                .map(|m| m.preview_text())
                .unwrap_or_default(),
            unread: chat.new_client_messages_count,
            selected: selected == Some(chat.id.as_str()),
            last_activity: chat.last_activity(),
        }
    }
}

/// Search text and selection of the sidebar. Holds no chat data; rows are
/// derived from the cache on demand.
#[derive(Debug, Clone, Default)]
pub struct ChatListView {
    search: String,
    selected: Option<String>,
}

impl ChatListView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(&self) -> &str {
        &self.search
    }

    pub fn set_search(&mut self, search: impl Into<String>) {
        self.search = search.into();
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    /// Chats whose display name contains the search text, ignoring case, in
    /// cache order. An empty search matches everything.
    pub fn visible<'a>(&self, chats: &'a [Chat]) -> Vec<&'a Chat> {
        let needle = self.search.trim().to_lowercase();
        chats
            .iter()
            .filter(|c| needle.is_empty() || c.display_name().to_lowercase().contains(&needle))
            .collect()
    }

    /// Rows to display, empty while the chat list has not been fetched.
    pub async fn rows(&self, store: &ChatCacheStore) -> Vec<ChatRow> {
        let Some(chats) = store.chats().await else {
            return Vec::new();
        };
        self.visible(&chats)
            .into_iter()
            .map(|chat| ChatRow::from_chat(chat, self.selected()))
            .collect()
    }

    /// Make `chat_id` the selected chat and reset its unread counter in the
    /// cache. Returns whether the cache changed.
    pub async fn select(&mut self, store: &ChatCacheStore, chat_id: &str) -> bool {
        if self.selected.as_deref() != Some(chat_id) {
            debug!("Selected chat {chat_id}");
            self.selected = Some(chat_id.to_string());
        }
        store.select_chat(chat_id).await
    }
}
