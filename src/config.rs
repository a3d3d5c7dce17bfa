//! Client configuration.
//!
//! Values come from the environment (`CHATDESK_*`) or are set directly
//! through the builder-style setters; the binary layers command-line flags
//! on top.

use std::time::Duration;

use crate::cache::Freshness;
use crate::error::ConfigError;

pub const ENV_API_URL: &str = "CHATDESK_API_URL";
pub const ENV_SOCKET_URL: &str = "CHATDESK_SOCKET_URL";
pub const ENV_USER_ID: &str = "CHATDESK_USER_ID";
pub const ENV_TOKEN: &str = "CHATDESK_TOKEN";
pub const ENV_ACK_TIMEOUT_MS: &str = "CHATDESK_ACK_TIMEOUT_MS";

const SOCKET_IO_PATH: &str = "/socket.io/";
const SOCKET_IO_QUERY: &str = "EIO=4&transport=websocket";

/// How outbound events are delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delivery {
    /// Emit and move on; the caller never learns whether the server got it.
    #[default]
    FireAndForget,
    /// Request a Socket.IO acknowledgement and report a missing one.
    Acknowledged { timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API, e.g. `https://api.example.com/api`.
    pub api_url: String,
    /// Base URL of the Socket.IO server. Defaults to the API origin.
    pub socket_url: String,
    /// Operator account id, sent with account-wide events.
    pub user_id: String,
    pub auth_token: Option<String>,
    pub delivery: Delivery,
    pub chats_freshness: Freshness,
    pub messages_freshness: Freshness,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        let api_url = trim_trailing_slash(api_url.into());
        let socket_url = origin_of(&api_url).to_string();
        Self {
            api_url,
            socket_url,
            user_id: user_id.into(),
            auth_token: None,
            delivery: Delivery::default(),
            chats_freshness: Freshness::NeverStale,
            messages_freshness: Freshness::NeverStale,
        }
    }

    pub fn with_socket_url(mut self, socket_url: impl Into<String>) -> Self {
        self.socket_url = trim_trailing_slash(socket_url.into());
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_freshness(mut self, chats: Freshness, messages: Freshness) -> Self {
        self.chats_freshness = chats;
        self.messages_freshness = messages;
        self
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let api_url = get(ENV_API_URL).ok_or(ConfigError::Missing(ENV_API_URL))?;
        let user_id = get(ENV_USER_ID).ok_or(ConfigError::Missing(ENV_USER_ID))?;

        let mut config = Self::new(api_url, user_id);
        if let Some(socket_url) = get(ENV_SOCKET_URL) {
            config = config.with_socket_url(socket_url);
        }
        if let Some(token) = get(ENV_TOKEN) {
            config = config.with_auth_token(token);
        }
        if let Some(raw) = get(ENV_ACK_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                key: ENV_ACK_TIMEOUT_MS,
                value: raw.clone(),
            })?;
            config = config.with_delivery(Delivery::Acknowledged {
                timeout: Duration::from_millis(millis),
            });
        }
        Ok(config)
    }

    /// WebSocket endpoint of the Socket.IO server.
    pub fn websocket_url(&self) -> String {
        let base = if let Some(rest) = self.socket_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.socket_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            self.socket_url.clone()
        };

        if base.contains(SOCKET_IO_PATH) {
            base
        } else {
            format!("{base}{SOCKET_IO_PATH}?{SOCKET_IO_QUERY}")
        }
    }
}

fn trim_trailing_slash(mut url: String) -> String {
    while url.ends_with('/') {
        url.pop();
    }
    url
}

/// `scheme://host[:port]` part of a URL.
fn origin_of(url: &str) -> &str {
    let host_start = url.find("://").map(|i| i + 3).unwrap_or(0);
    match url[host_start..].find('/') {
        Some(path_start) => &url[..host_start + path_start],
        None => url,
    }
}
