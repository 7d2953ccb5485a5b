//! In-memory state store (tests and degraded local runs)
//!
//! Implements the same primitives as the Redis adapter over process-local
//! maps. Not durable: a restart loses everything, which is why production
//! deployments use [`super::RedisStore`].

use super::{Result, StateStore, Subscription};
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc};

/// Poll cadence for the blocking-pop emulation.
const BLPOP_POLL: Duration = Duration::from_millis(10);

#[derive(Default)]
struct MemoryInner {
    strings: HashMap<String, String>,
    expirations: HashMap<String, Instant>,
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
    channels: HashMap<String, broadcast::Sender<String>>,
}

impl MemoryInner {
    /// Drop the key if its TTL has elapsed.
    fn purge_expired(&mut self, key: &str) {
        if let Some(expiry) = self.expirations.get(key) {
            if Instant::now() >= *expiry {
                self.expirations.remove(key);
                self.strings.remove(key);
            }
        }
    }

    fn channel(&mut self, name: &str) -> broadcast::Sender<String> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(256).0)
            .clone()
    }
}

/// In-memory [`StateStore`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut inner = self.lock()?;
        inner.purge_expired(key);
        Ok(inner.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner.expirations.remove(key);
        inner.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        inner.purge_expired(key);
        inner.expirations.remove(key);
        Ok(inner.strings.remove(key).is_some())
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let mut inner = self.lock()?;
        inner.purge_expired(key);
        if inner.strings.contains_key(key) {
            return Ok(false);
        }
        inner.strings.insert(key.to_string(), value.to_string());
        inner
            .expirations
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(true)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.lock()?;
        if inner.strings.contains_key(key) || inner.hashes.contains_key(key) {
            inner
                .expirations
                .insert(key.to_string(), Instant::now() + ttl);
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let inner = self.lock()?;
        Ok(inner
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut inner = self.lock()?;
        inner
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let mut inner = self.lock()?;
        Ok(inner
            .hashes
            .get_mut(key)
            .map_or(false, |hash| hash.remove(field).is_some()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        let inner = self.lock()?;
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner.hashes.get(key).map_or(0, HashMap::len))
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let mut inner = self.lock()?;
        let list = inner.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len())
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut inner = self.lock()?;
                if let Some(list) = inner.lists.get_mut(key) {
                    if let Some(value) = list.pop_front() {
                        return Ok(Some(value));
                    }
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            tokio::time::sleep(remaining.min(BLPOP_POLL)).await;
        }
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let inner = self.lock()?;
        Ok(inner.lists.get(key).map_or(0, VecDeque::len))
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let inner = self.lock()?;
        let Some(list) = inner.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start >= len || stop < 0 || start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        let kept = self.lrange(key, start, stop).await?;
        let mut inner = self.lock()?;
        inner.lists.insert(key.to_string(), kept.into());
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let sender = {
            let mut inner = self.lock()?;
            inner.channel(channel)
        };
        Ok(sender.send(payload.to_string()).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut receiver = {
            let mut inner = self.lock()?;
            inner.channel(channel).subscribe()
        };
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    // Slow subscribers skip lagged messages rather than
                    // blocking the publisher.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        Ok(Subscription::new(rx))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_kv_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_expiry() {
        let store = MemoryStore::new();
        assert!(store
            .set_nx_ex("lock", "agent-1", Duration::from_millis(30))
            .await
            .unwrap());
        assert!(!store
            .set_nx_ex("lock", "agent-2", Duration::from_millis(30))
            .await
            .unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("agent-1"));

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(store
            .set_nx_ex("lock", "agent-2", Duration::from_secs(5))
            .await
            .unwrap());
        assert_eq!(store.get("lock").await.unwrap().as_deref(), Some("agent-2"));
    }

    #[tokio::test]
    async fn test_hash_operations() {
        let store = MemoryStore::new();
        store.hset("h", "a", "1").await.unwrap();
        assert!(!store.hset_nx("h", "a", "2").await.unwrap());
        assert!(store.hset_nx("h", "b", "2").await.unwrap());
        assert_eq!(store.hlen("h").await.unwrap(), 2);
        assert_eq!(store.hget("h", "a").await.unwrap().as_deref(), Some("1"));
        assert!(store.hdel("h", "a").await.unwrap());
        assert_eq!(store.hgetall("h").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_preserves_fifo_order() {
        let store = MemoryStore::new();
        for value in ["a", "b", "c"] {
            store.rpush("q", value).await.unwrap();
        }
        assert_eq!(store.llen("q").await.unwrap(), 3);
        for expected in ["a", "b", "c"] {
            let popped = store.blpop("q", Duration::from_millis(10)).await.unwrap();
            assert_eq!(popped.as_deref(), Some(expected));
        }
        assert_eq!(
            store.blpop("q", Duration::from_millis(10)).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_blpop_wakes_on_push() {
        let store = MemoryStore::new();
        let waiter = store.clone();
        let handle =
            tokio::spawn(async move { waiter.blpop("q", Duration::from_secs(5)).await.unwrap() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.rpush("q", "wake").await.unwrap();
        assert_eq!(handle.await.unwrap().as_deref(), Some("wake"));
    }

    #[tokio::test]
    async fn test_lrange_and_ltrim() {
        let store = MemoryStore::new();
        for value in ["a", "b", "c", "d"] {
            store.rpush("l", value).await.unwrap();
        }
        assert_eq!(store.lrange("l", 0, -1).await.unwrap().len(), 4);
        assert_eq!(store.lrange("l", -2, -1).await.unwrap(), vec!["c", "d"]);
        store.ltrim("l", -2, -1).await.unwrap();
        assert_eq!(store.lrange("l", 0, -1).await.unwrap(), vec!["c", "d"]);
    }

    #[tokio::test]
    async fn test_pubsub_delivery() {
        let store = MemoryStore::new();
        let mut sub = store.subscribe("events").await.unwrap();
        // Forwarder task needs a tick to attach.
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.publish("events", "hello").await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .unwrap();
        assert_eq!(received.as_deref(), Some("hello"));
    }
}
