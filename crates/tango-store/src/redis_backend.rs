//! Shared backing: an external key/value + list server (Redis).
//!
//! Queues map to Redis lists (`RPUSH`/`BLPOP`, FIFO order preserved), maps to
//! Redis hashes (`HSET`/`HGET`/...), and counters to a plain string key
//! incremented with `INCR`. Values are serialised as JSON so that a
//! `TangoJob` or `TangoMachine` round-trips without loss across process
//! restarts — the queue/map contents are the only state that survives a
//! crash of the core itself.

use crate::counter::Counter;
use crate::error::{Result, StoreError};
use crate::map::Map;
use crate::queue::Queue;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::time::Duration;
use tracing::warn;

/// A Redis-backed FIFO queue, addressed by `queue:<name>`.
pub struct RedisQueue<T> {
    conn: ConnectionManager,
    key: String,
    _marker: PhantomData<T>,
}

impl<T> RedisQueue<T> {
    pub fn new(conn: ConnectionManager, name: &str) -> Self {
        Self {
            conn,
            key: format!("queue:{name}"),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T> Queue<T> for RedisQueue<T>
where
    T: Send + Sync + Clone + PartialEq + Serialize + DeserializeOwned,
{
    async fn size(&self) -> usize {
        let mut conn = self.conn.clone();
        conn.llen::<_, usize>(&self.key).await.unwrap_or(0)
    }

    async fn push(&self, item: T) {
        let mut conn = self.conn.clone();
        match serde_json::to_string(&item) {
            Ok(payload) => {
                if let Err(e) = conn.rpush::<_, _, ()>(&self.key, payload).await {
                    warn!(key = %self.key, error = %e, "redis queue push failed");
                }
            }
            Err(e) => warn!(key = %self.key, error = %e, "failed to serialise queue item"),
        }
    }

    async fn pop(&self, blocking: bool, timeout: Option<Duration>) -> Option<T> {
        let mut conn = self.conn.clone();
        let payload = if blocking {
            let secs = timeout.map(|t| t.as_secs_f64()).unwrap_or(0.0);
            let result: redis::RedisResult<Option<(String, String)>> =
                conn.blpop(&self.key, secs).await;
            result.ok().flatten().map(|(_, v)| v)
        } else {
            conn.lpop::<_, Option<String>>(&self.key, None).await.ok().flatten()
        }?;

        serde_json::from_str(&payload)
            .map_err(|e| warn!(key = %self.key, error = %e, "failed to deserialise queue item"))
            .ok()
    }

    async fn remove(&self, item: &T) -> bool {
        let mut conn = self.conn.clone();
        let Ok(payload) = serde_json::to_string(item) else {
            return false;
        };
        conn.lrem::<_, _, i64>(&self.key, 1, payload)
            .await
            .map(|removed| removed > 0)
            .unwrap_or(false)
    }

    async fn drain(&self) -> Vec<T> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(&self.key, 0, -1).await.unwrap_or_default();
        let _: redis::RedisResult<()> = conn.del(&self.key).await;
        raw.iter()
            .filter_map(|p| serde_json::from_str(p).ok())
            .collect()
    }
}

/// A Redis-backed hash map, addressed by the hash key `<map_name>` with
/// field = stringified key, value = serialised JSON.
pub struct RedisMap<K, V> {
    conn: ConnectionManager,
    key: String,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> RedisMap<K, V> {
    pub fn new(conn: ConnectionManager, name: &str) -> Self {
        Self {
            conn,
            key: name.to_string(),
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<K, V> Map<K, V> for RedisMap<K, V>
where
    K: Send + Sync + Clone + ToString + std::str::FromStr,
    V: Send + Sync + Clone + Serialize + DeserializeOwned,
{
    async fn has(&self, key: &K) -> bool {
        let mut conn = self.conn.clone();
        conn.hexists(&self.key, key.to_string()).await.unwrap_or(false)
    }

    async fn set(&self, key: K, value: V) {
        let mut conn = self.conn.clone();
        if let Ok(payload) = serde_json::to_string(&value) {
            let _: redis::RedisResult<()> =
                conn.hset(&self.key, key.to_string(), payload).await;
        }
    }

    async fn get(&self, key: &K) -> Option<V> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(&self.key, key.to_string()).await.ok()?;
        raw.and_then(|p| serde_json::from_str(&p).ok())
    }

    async fn get_or_fail(&self, key: &K) -> Result<V> {
        self.get(key).await.ok_or(StoreError::NotFound)
    }

    async fn delete(&self, key: &K) -> bool {
        let mut conn = self.conn.clone();
        conn.hdel::<_, _, i64>(&self.key, key.to_string())
            .await
            .map(|removed| removed > 0)
            .unwrap_or(false)
    }

    async fn keys(&self) -> Vec<K> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hkeys(&self.key).await.unwrap_or_default();
        raw.iter().filter_map(|k| k.parse().ok()).collect()
    }

    async fn values(&self) -> Vec<V> {
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.hvals(&self.key).await.unwrap_or_default();
        raw.iter().filter_map(|v| serde_json::from_str(v).ok()).collect()
    }

    async fn items(&self) -> Vec<(K, V)> {
        let mut conn = self.conn.clone();
        let raw: Vec<(String, String)> = conn.hgetall(&self.key).await.unwrap_or_default();
        raw.into_iter()
            .filter_map(|(k, v)| {
                let key = k.parse().ok()?;
                let value = serde_json::from_str(&v).ok()?;
                Some((key, value))
            })
            .collect()
    }
}

/// A Redis-backed counter, addressed by `intvalue:<name>`.
pub struct RedisCounter {
    conn: ConnectionManager,
    key: String,
}

impl RedisCounter {
    pub fn new(conn: ConnectionManager, name: &str) -> Self {
        Self {
            conn,
            key: format!("intvalue:{name}"),
        }
    }
}

#[async_trait]
impl Counter for RedisCounter {
    async fn get(&self) -> i64 {
        let mut conn = self.conn.clone();
        conn.get::<_, Option<i64>>(&self.key).await.ok().flatten().unwrap_or(0)
    }

    async fn set(&self, value: i64) {
        let mut conn = self.conn.clone();
        let _: redis::RedisResult<()> = conn.set(&self.key, value).await;
    }

    async fn increment_and_get(&self) -> i64 {
        let mut conn = self.conn.clone();
        conn.incr(&self.key, 1).await.unwrap_or(0)
    }
}

/// Open a connection manager to the shared store.
pub async fn connect(hostname: &str, port: u16) -> Result<ConnectionManager> {
    let url = format!("redis://{hostname}:{port}");
    let client = redis::Client::open(url)?;
    Ok(client.get_connection_manager().await?)
}
