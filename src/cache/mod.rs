//! In-memory cache of the chat list and per-chat message logs.
//!
//! The store is the only writer of cached data. Components read through its
//! selectors and mutate through its named operations.

mod entry;
mod store;

pub use entry::{CacheEntry, CacheKey, Freshness};
pub use store::{AppendOutcome, AssistantScope, ChatCacheStore};
