use serde::{Deserialize, Serialize};

use super::message::Message;

/// The counterpart of a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatClient {
    #[serde(default)]
    pub profile_name: String,
    #[serde(default)]
    pub identifier: String,
}

/// A conversation as listed in the sidebar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: String,
    #[serde(default)]
    pub client: ChatClient,
    /// Denormalized copy of the newest message, for list display.
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Unread counter for counterpart messages.
    #[serde(default)]
    pub new_client_messages_count: u32,
}

impl Chat {
    pub fn new(id: impl Into<String>, client: ChatClient) -> Self {
        Self {
            id: id.into(),
            client,
            last_message: None,
            new_client_messages_count: 0,
        }
    }

    /// Timestamp of `last_message`, if any.
    pub fn last_activity(&self) -> Option<i64> {
        self.last_message.as_ref().map(|m| m.timestamp)
    }

    /// Profile name, falling back to the identifier and then the chat id.
    pub fn display_name(&self) -> &str {
        if !self.client.profile_name.is_empty() {
            &self.client.profile_name
        } else if !self.client.identifier.is_empty() {
            &self.client.identifier
        } else {
            &self.id
        }
    }
}

/// Assistant settings attached to a conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantThread {
    #[serde(default)]
    pub enabled: bool,
}

/// Message log of one conversation, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessages {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub thread: AssistantThread,
}
