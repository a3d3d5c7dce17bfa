use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

const ID_PREFIX: &str = "BM";

/// Generates ids for outbound messages.
///
/// Ids must never repeat within a session, otherwise two optimistic appends
/// would be indistinguishable in the cache. Each id hashes the timestamp, a
/// per-generator salt, a monotonically increasing counter and fresh random
/// bytes, so two calls in the same millisecond still differ.
#[derive(Debug)]
pub struct MessageIdGenerator {
    salt: [u8; 16],
    counter: AtomicU64,
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        let mut salt = [0u8; 16];
        rand::rng().fill_bytes(&mut salt);
        Self {
            salt,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self, timestamp_ms: i64) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut data = Vec::with_capacity(8 + 16 + 8 + 16);
        data.extend_from_slice(&timestamp_ms.to_be_bytes());
        data.extend_from_slice(&self.salt);
        data.extend_from_slice(&seq.to_be_bytes());

        let mut random_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut random_bytes);
        data.extend_from_slice(&random_bytes);

        let hash = Sha256::digest(&data);
        format!(
            "{ID_PREFIX}{hash}",
            hash = hex::encode(&hash[..10]).to_uppercase()
        )
    }
}
