use std::time::Duration;
use thiserror::Error;

pub use chatcore::error::{ComposeError, FrameError};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("event channel is not connected")]
    NotConnected,
    #[error("transport send failed: {0}")]
    Send(String),
    #[error("failed to serialize payload for {event}: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no acknowledgement for {event} within {timeout:?}")]
    AckTimeout { event: String, timeout: Duration },
    #[error("connection closed before {event} was acknowledged")]
    AckDropped { event: String },
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("failed to open event channel: {0}")]
    Connect(String),
    #[error("client builder is missing {0}")]
    Incomplete(&'static str),
}
