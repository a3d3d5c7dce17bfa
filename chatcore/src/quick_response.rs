//! Predefined text + media templates and their expansion into messages.

use serde::{Deserialize, Serialize};

use crate::error::ComposeError;
use crate::ids::MessageIdGenerator;
use crate::media::Media;
use crate::time::Clock;
use crate::types::{Message, MessageBody};

/// Character that switches the composer input into quick-response lookup.
pub const TRIGGER: char = '/';

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickResponse {
    pub id: String,
    pub shortcut: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub media: Vec<Media>,
}

impl QuickResponse {
    /// Expand into the messages to send, in send order: the text first (when
    /// the template has any), then one message per media item. Every message
    /// gets its own id and timestamp.
    pub fn expand(&self, ids: &MessageIdGenerator, clock: &dyn Clock) -> Vec<Message> {
        let mut messages = Vec::with_capacity(1 + self.media.len());

        let content = self.content.trim();
        if !content.is_empty() {
            let timestamp = clock.now_millis();
            messages.push(Message::business(
                ids.next_id(timestamp),
                timestamp,
                MessageBody::Text(content.to_string()),
            ));
        }

        for media in &self.media {
            let timestamp = clock.now_millis();
            messages.push(Message::business(
                ids.next_id(timestamp),
                timestamp,
                MessageBody::captioned(media.clone().normalized(), None),
            ));
        }

        messages
    }
}

/// Check a batch before any of it is sent: it must not be empty and every
/// message must carry content or media.
pub fn validate_batch(messages: &[Message]) -> Result<(), ComposeError> {
    if messages.is_empty() {
        return Err(ComposeError::EmptyBatch);
    }
    match messages.iter().position(|m| !m.is_well_formed()) {
        Some(index) => Err(ComposeError::MalformedMessage { index }),
        None => Ok(()),
    }
}

/// Quick responses available to the composer, ordered by shortcut.
#[derive(Debug, Clone, Default)]
pub struct QuickResponseIndex {
    entries: Vec<QuickResponse>,
}

impl QuickResponseIndex {
    pub fn new(mut entries: Vec<QuickResponse>) -> Self {
        entries.sort_by_key(|qr| qr.shortcut.to_lowercase());
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&QuickResponse> {
        self.entries.iter().find(|qr| qr.id == id)
    }

    /// Autocomplete for composer input. Only input starting with [`TRIGGER`]
    /// produces suggestions; the rest of the input is matched as a
    /// case-insensitive shortcut prefix.
    pub fn suggest(&self, input: &str) -> Vec<&QuickResponse> {
        let Some(typed) = input.strip_prefix(TRIGGER) else {
            return Vec::new();
        };
        let typed = typed.to_lowercase();
        self.entries
            .iter()
            .filter(|qr| qr.shortcut.to_lowercase().starts_with(&typed))
            .collect()
    }
}
