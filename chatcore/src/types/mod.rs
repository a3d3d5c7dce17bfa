mod chat;
mod message;

pub use chat::{AssistantThread, Chat, ChatClient, ChatMessages};
pub use message::{Message, MessageBody, OutgoingMessage, Role};
