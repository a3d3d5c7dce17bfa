use thiserror::Error;

/// Reasons a compose action is refused before anything reaches the network,
/// or aborted while preparing an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComposeError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("quick response produced no messages")]
    EmptyBatch,
    #[error("message {index} in batch has neither content nor media")]
    MalformedMessage { index: usize },
    #[error("media upload failed: {0}")]
    Upload(String),
    #[error("no chat is selected")]
    NoChatSelected,
    #[error("unknown quick response {0}")]
    UnknownQuickResponse(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown engine.io packet type {0:?}")]
    UnknownPacket(char),
    #[error("unknown socket.io packet type {0:?}")]
    UnknownSocketPacket(char),
    #[error("invalid packet payload: {0}")]
    InvalidPayload(String),
}
