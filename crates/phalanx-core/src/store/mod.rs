//! State store adapter
//!
//! All shared truth — tasks, agents, phases, locks, the merge queue and
//! notification lists — lives behind [`StateStore`]. The production backend
//! is Redis ([`RedisStore`]); [`MemoryStore`] backs tests and degraded local
//! runs. Atomicity relies on the store's primitives (set-if-absent with TTL,
//! list push/pop), never on in-process mutexes.

pub mod keys;
mod memory;
mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisStore;

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// A live pub/sub subscription.
///
/// Messages published to the channel after `subscribe` returns are delivered
/// in order. Durability is weaker than stored state: consumers must drain the
/// durable pending lists at startup rather than relying on pub/sub alone.
pub struct Subscription {
    rx: mpsc::Receiver<String>,
}

impl Subscription {
    /// Wrap a receiver; used by store implementations.
    pub(crate) fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }

    /// Receive the next message, or `None` once the subscription is closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// Durable key/value + hash + list + lock + pub/sub primitives.
///
/// Implementations retry transient connection errors internally with
/// exponential backoff and surface [`StoreError::Transient`] on exhaustion.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Get a string value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a string value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a key; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Atomic set-if-absent with TTL. Returns true when the key was set,
    /// false when it already existed. This is the claim-lock primitive.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool>;

    /// Set a TTL on an existing key.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Get one hash field.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Set one hash field.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Set one hash field only if absent. Returns true when written.
    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    /// Delete one hash field; returns whether it existed.
    async fn hdel(&self, key: &str, field: &str) -> Result<bool>;

    /// Get all fields of a hash.
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Number of fields in a hash.
    async fn hlen(&self, key: &str) -> Result<usize>;

    /// Append to the tail of a list; returns the new length.
    async fn rpush(&self, key: &str, value: &str) -> Result<usize>;

    /// Blocking pop from the head of a list, waiting up to `timeout`.
    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    /// List length.
    async fn llen(&self, key: &str) -> Result<usize>;

    /// Inclusive range of list elements (negative indices count from the tail).
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Trim a list to the inclusive range.
    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()>;

    /// Publish to a channel; returns the number of receiving subscribers.
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;

    /// Subscribe to a channel.
    async fn subscribe(&self, channel: &str) -> Result<Subscription>;

    /// Liveness probe.
    async fn ping(&self) -> Result<()>;
}
