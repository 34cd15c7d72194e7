//! State store abstraction: a keyed queue/map/counter collection with two
//! backings, selected at deployment time.
//!
//! - **in-process**: a mutex plus in-memory structures. Lost on restart.
//! - **shared**: an external key/value + list server (Redis). Survives a
//!   restart of the core process — this is what lets unassigned jobs persist
//!   across a crash (§5, Restart semantics).
//!
//! Callers never construct a backend directly; they open a [`Store`] once
//! and ask it for named queues, maps, and counters. The same name always
//! yields the same underlying instance for the lifetime of the `Store`.

pub mod counter;
pub mod error;
pub mod inprocess;
pub mod map;
pub mod queue;

#[cfg(feature = "redis-backend")]
pub mod redis_backend;

pub use counter::Counter;
pub use error::{Result, StoreError};
pub use map::Map;
pub use queue::Queue;

use inprocess::{InProcessCounter, InProcessMap, InProcessQueue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[cfg(feature = "redis-backend")]
use redis::aio::ConnectionManager;

/// Deployment-time backend selection, mirroring the `USE_REDIS` /
/// `REDIS_HOSTNAME` / `REDIS_PORT` environment switches.
#[derive(Debug, Clone)]
pub enum StoreConfig {
    InProcess,
    Shared { hostname: String, port: u16 },
}

impl StoreConfig {
    /// Build from the conventional environment variables.
    pub fn from_env() -> Self {
        let use_redis = std::env::var("USE_REDIS")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if use_redis {
            let hostname = std::env::var("REDIS_HOSTNAME").unwrap_or_else(|_| "localhost".into());
            let port = std::env::var("REDIS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(6379);
            StoreConfig::Shared { hostname, port }
        } else {
            StoreConfig::InProcess
        }
    }
}

type Registry = Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>;

/// An open handle to the state store. Threaded explicitly into `JobQueue`
/// and `Preallocator` at construction time — there is no process-wide
/// singleton (see DESIGN.md: "Globally mutable state").
pub struct Store {
    #[cfg(feature = "redis-backend")]
    redis: Option<ConnectionManager>,
    queues: Registry,
    maps: Registry,
    counters: Registry,
}

impl Store {
    pub async fn open(config: StoreConfig) -> Result<Self> {
        #[cfg(feature = "redis-backend")]
        let redis = match &config {
            StoreConfig::InProcess => None,
            StoreConfig::Shared { hostname, port } => {
                Some(redis_backend::connect(hostname, *port).await?)
            }
        };

        #[cfg(not(feature = "redis-backend"))]
        if matches!(config, StoreConfig::Shared { .. }) {
            return Err(StoreError::Config(
                "shared backend requested but redis-backend feature is disabled".into(),
            ));
        }

        Ok(Self {
            #[cfg(feature = "redis-backend")]
            redis,
            queues: Mutex::new(HashMap::new()),
            maps: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
        })
    }

    /// Open a purely in-process store. Used by tests and single-node setups.
    pub fn in_process() -> Self {
        Self {
            #[cfg(feature = "redis-backend")]
            redis: None,
            queues: Mutex::new(HashMap::new()),
            maps: Mutex::new(HashMap::new()),
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue<T>(&self, name: &str) -> Arc<dyn Queue<T>>
    where
        T: Send + Sync + Clone + PartialEq + Serialize + DeserializeOwned + 'static,
    {
        let mut queues = self.queues.lock().expect("store registry poisoned");
        if let Some(existing) = queues.get(name) {
            if let Some(q) = existing.downcast_ref::<Arc<dyn Queue<T>>>() {
                return q.clone();
            }
        }

        let instance: Arc<dyn Queue<T>> = self.new_queue(name);
        queues.insert(name.to_string(), Arc::new(instance.clone()) as Arc<dyn Any + Send + Sync>);
        instance
    }

    #[cfg(feature = "redis-backend")]
    fn new_queue<T>(&self, name: &str) -> Arc<dyn Queue<T>>
    where
        T: Send + Sync + Clone + PartialEq + Serialize + DeserializeOwned + 'static,
    {
        match &self.redis {
            Some(conn) => Arc::new(redis_backend::RedisQueue::new(conn.clone(), name)),
            None => Arc::new(InProcessQueue::new()),
        }
    }

    #[cfg(not(feature = "redis-backend"))]
    fn new_queue<T>(&self, _name: &str) -> Arc<dyn Queue<T>>
    where
        T: Send + Sync + Clone + PartialEq + Serialize + DeserializeOwned + 'static,
    {
        Arc::new(InProcessQueue::new())
    }

    pub fn map<K, V>(&self, name: &str) -> Arc<dyn Map<K, V>>
    where
        K: Send + Sync + Clone + std::hash::Hash + Eq + ToString + std::str::FromStr + 'static,
        V: Send + Sync + Clone + Serialize + DeserializeOwned + 'static,
    {
        let mut maps = self.maps.lock().expect("store registry poisoned");
        if let Some(existing) = maps.get(name) {
            if let Some(m) = existing.downcast_ref::<Arc<dyn Map<K, V>>>() {
                return m.clone();
            }
        }

        let instance: Arc<dyn Map<K, V>> = self.new_map(name);
        maps.insert(name.to_string(), Arc::new(instance.clone()) as Arc<dyn Any + Send + Sync>);
        instance
    }

    #[cfg(feature = "redis-backend")]
    fn new_map<K, V>(&self, name: &str) -> Arc<dyn Map<K, V>>
    where
        K: Send + Sync + Clone + std::hash::Hash + Eq + ToString + std::str::FromStr + 'static,
        V: Send + Sync + Clone + Serialize + DeserializeOwned + 'static,
    {
        match &self.redis {
            Some(conn) => Arc::new(redis_backend::RedisMap::new(conn.clone(), name)),
            None => Arc::new(InProcessMap::new()),
        }
    }

    #[cfg(not(feature = "redis-backend"))]
    fn new_map<K, V>(&self, _name: &str) -> Arc<dyn Map<K, V>>
    where
        K: Send + Sync + Clone + std::hash::Hash + Eq + ToString + std::str::FromStr + 'static,
        V: Send + Sync + Clone + Serialize + DeserializeOwned + 'static,
    {
        Arc::new(InProcessMap::new())
    }

    pub fn counter(&self, name: &str, initial: i64) -> Arc<dyn Counter> {
        let mut counters = self.counters.lock().expect("store registry poisoned");
        if let Some(existing) = counters.get(name) {
            if let Some(c) = existing.clone().downcast_ref::<Arc<dyn Counter>>() {
                return c.clone();
            }
        }

        let instance = self.new_counter(name, initial);
        counters.insert(name.to_string(), Arc::new(instance.clone()) as Arc<dyn Any + Send + Sync>);
        instance
    }

    #[cfg(feature = "redis-backend")]
    fn new_counter(&self, name: &str, initial: i64) -> Arc<dyn Counter> {
        match &self.redis {
            Some(conn) => Arc::new(redis_backend::RedisCounter::new(conn.clone(), name)),
            None => Arc::new(InProcessCounter::new(initial)),
        }
    }

    #[cfg(not(feature = "redis-backend"))]
    fn new_counter(&self, _name: &str, initial: i64) -> Arc<dyn Counter> {
        Arc::new(InProcessCounter::new(initial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_process_store_caches_instances_by_name() {
        let store = Store::in_process();
        let q1: Arc<dyn Queue<i32>> = store.queue("unassigned");
        let q2: Arc<dyn Queue<i32>> = store.queue("unassigned");
        q1.push(7).await;
        assert_eq!(q2.size().await, 1);
    }

    #[tokio::test]
    async fn distinct_names_are_independent() {
        let store = Store::in_process();
        let a: Arc<dyn Queue<i32>> = store.queue("a");
        let b: Arc<dyn Queue<i32>> = store.queue("b");
        a.push(1).await;
        assert_eq!(b.size().await, 0);
    }

    #[tokio::test]
    async fn counter_persists_across_lookups() {
        let store = Store::in_process();
        let c1 = store.counter("next_id", 10000);
        c1.increment_and_get().await;
        let c2 = store.counter("next_id", 10000);
        assert_eq!(c2.get().await, 10001);
    }
}
