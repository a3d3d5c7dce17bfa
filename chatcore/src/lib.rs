//! Platform-agnostic core of the chat console: data model, wire framing,
//! message construction helpers and the traits the runtime layer plugs
//! transports and HTTP clients into.

pub mod error;
pub mod frame;
pub mod ids;
pub mod media;
pub mod net;
pub mod quick_response;
pub mod time;
pub mod types;

pub use error::{ComposeError, FrameError};
pub use media::{Media, MediaKind};
pub use types::{
    AssistantThread, Chat, ChatClient, ChatMessages, Message, MessageBody, OutgoingMessage, Role,
};
