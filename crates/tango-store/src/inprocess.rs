//! In-process backing: a mutex plus in-memory structures. Used for
//! single-node deployments where `USE_REDIS` is unset.

use crate::counter::Counter;
use crate::map::Map;
use crate::queue::Queue;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify, RwLock};

/// In-memory FIFO queue. Blocking pop is implemented with a [`Notify`] that
/// every push fires; a waiter re-checks the deque after waking (there may be
/// multiple waiters racing for one pushed item).
pub struct InProcessQueue<T> {
    items: Mutex<VecDeque<T>>,
    notify: Notify,
}

impl<T> Default for InProcessQueue<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }
}

impl<T> InProcessQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<T> Queue<T> for InProcessQueue<T>
where
    T: Send + Sync + Clone + PartialEq,
{
    async fn size(&self) -> usize {
        self.items.lock().await.len()
    }

    async fn push(&self, item: T) {
        self.items.lock().await.push_back(item);
        self.notify.notify_waiters();
    }

    async fn pop(&self, blocking: bool, timeout: Option<Duration>) -> Option<T> {
        loop {
            {
                let mut items = self.items.lock().await;
                if let Some(item) = items.pop_front() {
                    return Some(item);
                }
            }

            if !blocking {
                return None;
            }

            match timeout {
                Some(t) => {
                    if tokio::time::timeout(t, self.notify.notified()).await.is_err() {
                        // Expired; one last check in case an item landed between
                        // the timeout firing and us re-acquiring the lock.
                        return self.items.lock().await.pop_front();
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    async fn remove(&self, item: &T) -> bool {
        let mut items = self.items.lock().await;
        if let Some(pos) = items.iter().position(|x| x == item) {
            items.remove(pos);
            true
        } else {
            false
        }
    }

    async fn drain(&self) -> Vec<T> {
        let mut items = self.items.lock().await;
        items.drain(..).collect()
    }
}

/// In-memory keyed map guarded by a single reader/writer lock.
pub struct InProcessMap<K, V> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for InProcessMap<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> InProcessMap<K, V>
where
    K: std::hash::Hash + Eq,
{
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl<K, V> Map<K, V> for InProcessMap<K, V>
where
    K: Send + Sync + Clone + std::hash::Hash + Eq,
    V: Send + Sync + Clone,
{
    async fn has(&self, key: &K) -> bool {
        self.entries.read().await.contains_key(key)
    }

    async fn set(&self, key: K, value: V) {
        self.entries.write().await.insert(key, value);
    }

    async fn get(&self, key: &K) -> Option<V> {
        self.entries.read().await.get(key).cloned()
    }

    async fn delete(&self, key: &K) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    async fn keys(&self) -> Vec<K> {
        self.entries.read().await.keys().cloned().collect()
    }

    async fn values(&self) -> Vec<V> {
        self.entries.read().await.values().cloned().collect()
    }

    async fn items(&self) -> Vec<(K, V)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// In-memory atomic counter.
pub struct InProcessCounter {
    value: AtomicI64,
}

impl InProcessCounter {
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
        }
    }
}

impl Default for InProcessCounter {
    fn default() -> Self {
        Self::new(0)
    }
}

#[async_trait]
impl Counter for InProcessCounter {
    async fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    async fn set(&self, value: i64) {
        self.value.store(value, Ordering::SeqCst);
    }

    async fn increment_and_get(&self) -> i64 {
        self.value.fetch_add(1, Ordering::SeqCst) + 1
    }
}

pub type SharedInProcessQueue<T> = Arc<InProcessQueue<T>>;
pub type SharedInProcessMap<K, V> = Arc<InProcessMap<K, V>>;
pub type SharedInProcessCounter = Arc<InProcessCounter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_pop_preserves_fifo_order() {
        let q = InProcessQueue::new();
        q.push(1).await;
        q.push(2).await;
        q.push(3).await;
        assert_eq!(q.pop(false, None).await, Some(1));
        assert_eq!(q.pop(false, None).await, Some(2));
        assert_eq!(q.size().await, 1);
    }

    #[tokio::test]
    async fn pop_nonblocking_on_empty_returns_none() {
        let q: InProcessQueue<i32> = InProcessQueue::new();
        assert_eq!(q.pop(false, None).await, None);
    }

    #[tokio::test]
    async fn pop_with_timeout_expires() {
        let q: InProcessQueue<i32> = InProcessQueue::new();
        let start = std::time::Instant::now();
        let result = q.pop(true, Some(Duration::from_millis(20))).await;
        assert_eq!(result, None);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[tokio::test]
    async fn blocking_pop_wakes_on_push() {
        let q = Arc::new(InProcessQueue::new());
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.pop(true, None).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(42).await;
        let result = handle.await.unwrap();
        assert_eq!(result, Some(42));
    }

    #[tokio::test]
    async fn remove_deletes_first_match() {
        let q = InProcessQueue::new();
        q.push(1).await;
        q.push(2).await;
        q.push(1).await;
        assert!(q.remove(&1).await);
        assert_eq!(q.drain().await, vec![2, 1]);
    }

    #[tokio::test]
    async fn map_roundtrip() {
        let m: InProcessMap<i64, String> = InProcessMap::new();
        m.set(1, "a".to_string()).await;
        assert!(m.has(&1).await);
        assert_eq!(m.get(&1).await, Some("a".to_string()));
        assert!(m.delete(&1).await);
        assert!(!m.has(&1).await);
    }

    #[tokio::test]
    async fn counter_increments() {
        let c = InProcessCounter::new(10000);
        assert_eq!(c.increment_and_get().await, 10001);
        assert_eq!(c.get().await, 10001);
        c.set(99999).await;
        assert_eq!(c.increment_and_get().await, 100000);
    }
}
