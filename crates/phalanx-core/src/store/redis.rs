//! Redis-backed state store (for production)
//!
//! Durable shared truth: tasks and phases must survive coordinator restarts,
//! so the Redis instance must be configured with persistence (data loss on
//! restart is a fatal misconfiguration, not something this adapter can paper
//! over).
//!
//! Every operation retries transient connection failures with exponential
//! backoff (base 1s, factor 2, max 5 attempts) before surfacing
//! [`StoreError::Transient`].

use super::{Result, StateStore, Subscription};
use crate::error::StoreError;
use crate::util::retry::{retry_with_backoff, RetryConfig, RetryError};
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Whether a Redis error is a connection-level failure worth retrying.
fn is_transient(e: &redis::RedisError) -> bool {
    e.is_timeout()
        || e.is_connection_refusal()
        || e.is_connection_dropped()
        || e.kind() == redis::ErrorKind::IoError
}

/// Redis-backed [`StateStore`].
pub struct RedisStore {
    client: redis::Client,
    retry: RetryConfig,
}

impl RedisStore {
    /// Create a new Redis store.
    ///
    /// # Errors
    ///
    /// Returns an error if the Redis URL is invalid.
    pub fn new(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(Self {
            client,
            retry: RetryConfig::default(),
        })
    }

    /// Override the retry policy (tests shorten the delays).
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn connection(&self) -> std::result::Result<redis::aio::MultiplexedConnection, redis::RedisError> {
        self.client.get_multiplexed_async_connection().await
    }

    /// Run an operation under the retry policy, mapping exhaustion to a
    /// typed transient error.
    async fn run<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, redis::RedisError>>,
    {
        retry_with_backoff(&self.retry, f, is_transient)
            .await
            .map_err(|e: RetryError<redis::RedisError>| {
                if is_transient(&e.last_error) {
                    StoreError::Transient {
                        attempts: e.attempts,
                        message: e.last_error.to_string(),
                    }
                } else {
                    StoreError::Backend(e.last_error.to_string())
                }
            })
    }
}

#[async_trait]
impl StateStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.run(|| async move {
            let mut conn = self.connection().await?;
            redis::cmd("GET")
                .arg(key)
                .query_async::<Option<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.run(|| async move {
            let mut conn = self.connection().await?;
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let deleted = self
            .run(|| async move {
                let mut conn = self.connection().await?;
                redis::cmd("DEL")
                    .arg(key)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(deleted > 0)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let secs = ttl.as_secs().max(1);
        let reply = self
            .run(|| async move {
                let mut conn = self.connection().await?;
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("NX")
                    .arg("EX")
                    .arg(secs)
                    .query_async::<Option<String>>(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let secs = ttl.as_secs().max(1);
        self.run(|| async move {
            let mut conn = self.connection().await?;
            redis::cmd("EXPIRE")
                .arg(key)
                .arg(secs)
                .query_async::<i64>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.run(|| async move {
            let mut conn = self.connection().await?;
            redis::cmd("HGET")
                .arg(key)
                .arg(field)
                .query_async::<Option<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.run(|| async move {
            let mut conn = self.connection().await?;
            redis::cmd("HSET")
                .arg(key)
                .arg(field)
                .arg(value)
                .query_async::<i64>(&mut conn)
                .await
        })
        .await?;
        Ok(())
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let written = self
            .run(|| async move {
                let mut conn = self.connection().await?;
                redis::cmd("HSETNX")
                    .arg(key)
                    .arg(field)
                    .arg(value)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(written > 0)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<bool> {
        let deleted = self
            .run(|| async move {
                let mut conn = self.connection().await?;
                redis::cmd("HDEL")
                    .arg(key)
                    .arg(field)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(deleted > 0)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>> {
        self.run(|| async move {
            let mut conn = self.connection().await?;
            redis::cmd("HGETALL")
                .arg(key)
                .query_async::<HashMap<String, String>>(&mut conn)
                .await
        })
        .await
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        let len = self
            .run(|| async move {
                let mut conn = self.connection().await?;
                redis::cmd("HLEN")
                    .arg(key)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(len.max(0) as usize)
    }

    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let len = self
            .run(|| async move {
                let mut conn = self.connection().await?;
                redis::cmd("RPUSH")
                    .arg(key)
                    .arg(value)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(len.max(0) as usize)
    }

    async fn blpop(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        // A blocking pop parks its connection, so acquire a dedicated one
        // instead of reusing a shared multiplexed connection.
        let secs = timeout.as_secs().max(1);
        let reply = self
            .run(|| async move {
                let mut conn = self.connection().await?;
                redis::cmd("BLPOP")
                    .arg(key)
                    .arg(secs)
                    .query_async::<Option<(String, String)>>(&mut conn)
                    .await
            })
            .await?;
        Ok(reply.map(|(_, value)| value))
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let len = self
            .run(|| async move {
                let mut conn = self.connection().await?;
                redis::cmd("LLEN")
                    .arg(key)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(len.max(0) as usize)
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        self.run(|| async move {
            let mut conn = self.connection().await?;
            redis::cmd("LRANGE")
                .arg(key)
                .arg(start)
                .arg(stop)
                .query_async::<Vec<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<()> {
        self.run(|| async move {
            let mut conn = self.connection().await?;
            redis::cmd("LTRIM")
                .arg(key)
                .arg(start)
                .arg(stop)
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let receivers = self
            .run(|| async move {
                let mut conn = self.connection().await?;
                redis::cmd("PUBLISH")
                    .arg(channel)
                    .arg(payload)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await?;
        Ok(receivers.max(0) as usize)
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| StoreError::Backend(format!("pubsub connection failed: {e}")))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| StoreError::Backend(format!("subscribe failed: {e}")))?;

        let (tx, rx) = mpsc::channel(64);
        let channel_name = channel.to_string();
        tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                match msg.get_payload::<String>() {
                    Ok(payload) => {
                        if tx.send(payload).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(channel = %channel_name, error = %e, "dropping undecodable pubsub payload");
                    }
                }
            }
            debug!(channel = %channel_name, "pubsub forwarder stopped");
        });

        Ok(Subscription::new(rx))
    }

    async fn ping(&self) -> Result<()> {
        self.run(|| async move {
            let mut conn = self.connection().await?;
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await?;
        Ok(())
    }
}

#[cfg(test)]
// Redis tests require a running instance; run with:
//   cargo test -p phalanx-core --features redis-tests
#[cfg(feature = "redis-tests")]
mod tests {
    use super::*;
    use crate::store::keys;

    fn store() -> RedisStore {
        RedisStore::new("redis://127.0.0.1:6379").unwrap()
    }

    #[tokio::test]
    async fn test_lock_set_nx_ex() {
        let store = store();
        let key = keys::task_lock("redis-test-lock");
        store.delete(&key).await.unwrap();

        assert!(store
            .set_nx_ex(&key, "agent-1", Duration::from_secs(5))
            .await
            .unwrap());
        assert!(!store
            .set_nx_ex(&key, "agent-2", Duration::from_secs(5))
            .await
            .unwrap());
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("agent-1"));

        store.delete(&key).await.unwrap();
    }

    #[tokio::test]
    async fn test_fifo_round_trip() {
        let store = store();
        let key = "phalanx:test:fifo";
        store.delete(key).await.unwrap();

        store.rpush(key, "a").await.unwrap();
        store.rpush(key, "b").await.unwrap();
        let first = store.blpop(key, Duration::from_secs(1)).await.unwrap();
        assert_eq!(first.as_deref(), Some("a"));

        store.delete(key).await.unwrap();
    }
}
