use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Identifies a cache region.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    /// The chat list, `"chats"`.
    Chats,
    /// One conversation's message log, `("chat", id)`.
    Chat(String),
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::Chats => write!(f, "chats"),
            CacheKey::Chat(id) => write!(f, "chat/{id}"),
        }
    }
}

/// When a fetched value stops being served from cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Fresh until explicitly invalidated.
    #[default]
    NeverStale,
    StaleAfter(Duration),
}

/// A cached value plus the bookkeeping that decides whether to refetch it.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    data: T,
    fetched_at: Instant,
    freshness: Freshness,
    invalidated: bool,
}

impl<T> CacheEntry<T> {
    pub fn new(data: T, freshness: Freshness) -> Self {
        Self {
            data,
            fetched_at: Instant::now(),
            freshness,
            invalidated: false,
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut T {
        &mut self.data
    }

    pub fn fetched_at(&self) -> Instant {
        self.fetched_at
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub fn is_stale(&self) -> bool {
        if self.invalidated {
            return true;
        }
        match self.freshness {
            Freshness::NeverStale => false,
            Freshness::StaleAfter(ttl) => self.fetched_at.elapsed() >= ttl,
        }
    }

    pub(crate) fn invalidate(&mut self) {
        self.invalidated = true;
    }
}
