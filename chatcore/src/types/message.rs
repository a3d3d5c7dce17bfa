use serde::{Deserialize, Serialize};

use crate::media::Media;

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The counterpart (client) of the conversation.
    User,
    /// The automated assistant answering on the business' behalf.
    Assistant,
    /// The operator using the console.
    Business,
}

/// What a well-formed message carries. At least one of text or media is
/// always present; media with a caption carries both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Text(String),
    Media(Media),
    TextWithMedia(String, Media),
}

impl MessageBody {
    /// Build a body from loose parts, rejecting the empty combination.
    pub fn from_parts(content: String, media: Option<Media>) -> Option<Self> {
        match (content.is_empty(), media) {
            (true, None) => None,
            (false, None) => Some(MessageBody::Text(content)),
            (true, Some(media)) => Some(MessageBody::Media(media)),
            (false, Some(media)) => Some(MessageBody::TextWithMedia(content, media)),
        }
    }

    /// Media body whose text is `caption`, or the media's own caption when
    /// none is given. Blank captions yield a bare media body.
    pub fn captioned(media: Media, caption: Option<&str>) -> Self {
        let caption = caption
            .or(media.caption.as_deref())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if caption.is_empty() {
            MessageBody::Media(media)
        } else {
            MessageBody::TextWithMedia(caption, media)
        }
    }

    pub fn into_parts(self) -> (String, Option<Media>) {
        match self {
            MessageBody::Text(content) => (content, None),
            MessageBody::Media(media) => (String::new(), Some(media)),
            MessageBody::TextWithMedia(content, media) => (content, Some(media)),
        }
    }
}

/// A chat message as exchanged with the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    #[serde(default)]
    pub content: String,
    pub role: Role,
    /// Milliseconds since the Unix epoch, stamped by the sending side.
    pub timestamp: i64,
    #[serde(default)]
    pub media: Option<Media>,
}

impl Message {
    pub fn new(id: String, role: Role, timestamp: i64, body: MessageBody) -> Self {
        let (content, media) = body.into_parts();
        Self {
            id,
            content,
            role,
            timestamp,
            media,
        }
    }

    /// Shorthand for an operator-authored message.
    pub fn business(id: String, timestamp: i64, body: MessageBody) -> Self {
        Self::new(id, Role::Business, timestamp, body)
    }

    /// The typed view of this message, or `None` when it carries nothing.
    pub fn body(&self) -> Option<MessageBody> {
        MessageBody::from_parts(self.content.clone(), self.media.clone())
    }

    pub fn is_well_formed(&self) -> bool {
        !self.content.is_empty() || self.media.is_some()
    }

    /// Get the preview text for chat list display.
    ///
    /// Returns:
    /// - For text-only messages: the message content
    /// - For media messages: "[MediaType] caption" or just "[MediaType]"
    pub fn preview_text(&self) -> String {
        if let Some(media) = &self.media {
            let label = media.kind.display_label();
            let caption = media
                .caption
                .as_ref()
                .filter(|c| !c.is_empty())
                .or_else(|| Some(&self.content).filter(|c| !c.is_empty()));

            if let Some(text) = caption {
                format!("{} {}", label, text)
            } else {
                label.to_string()
            }
        } else {
            self.content.clone()
        }
    }
}

/// Payload of the `newBusinessMessage` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutgoingMessage {
    pub conversation_id: String,
    pub message: Message,
}
