// Re-export core modules
pub use chatcore::{frame, ids, media, quick_response, time};

// Core types are re-exported, but events (with EventBus) live here because they need tokio
pub mod types {
    pub use chatcore::types::*;
    pub use chatcore::{Media, MediaKind};
    pub mod events;
}

pub mod api;
pub mod cache;
pub mod chat_list;
pub mod client;
pub mod composer;
pub mod config;
pub mod error;
pub mod http;
pub mod socket;
pub mod transport;
pub mod upload;

// Test doubles, also used by the integration tests
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
