//! Key-value store collaborator used for sessions, counters, block lists and
//! the token blacklist.
//!
//! Transport failures (`StoreError`) are distinct from a key miss (`Ok(None)`),
//! callers decide their own fail-open/fail-closed policy. All coordination is
//! done through single-key atomic operations plus TTL expiry; there are no
//! distributed locks.

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

pub mod memory;
pub mod redis;

pub use memory::InMemoryStore;
pub use redis::RedisStore;

/// Transport-level store failure. A missing key is not an error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out after {0}ms")]
    Timeout(u64),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Redis-like async key-value interface with TTL semantics.
///
/// `incr` must be a single atomic round trip; rate limiting and failure
/// counters depend on it to avoid lost updates under concurrent requests.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Set a value. `ttl_seconds = None` leaves the key without expiry.
    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> StoreResult<()>;

    async fn del(&self, key: &str) -> StoreResult<()>;

    /// Atomically increment a counter key, returning the new value.
    /// Missing keys start at zero.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    async fn expire(&self, key: &str, ttl_seconds: u64) -> StoreResult<()>;

    /// Glob-style key scan. O(n) over the key space; acceptable for
    /// administrative paths only.
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    async fn publish(&self, channel: &str, message: &str) -> StoreResult<()>;

    /// Subscribe to a channel, receiving messages on the returned channel.
    async fn subscribe(&self, channel: &str) -> StoreResult<UnboundedReceiver<String>>;
}

/// Match a key against a glob pattern supporting only a trailing `*`,
/// which is the only shape the crate uses (`session:*`, `blocked_ip:*`).
#[must_use]
pub(crate) fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}
