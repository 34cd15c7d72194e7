//! `Map<K,V>`: keyed mapping used for the live/dead job maps and the
//! per-image pool table.

use crate::error::{Result, StoreError};
use async_trait::async_trait;

/// A keyed mapping with get/set/delete/scan. Iteration order is unspecified;
/// `items` may scan a bounded key space when the backend provides no native
/// enumeration (the shared backend scans `1..=max_key` for integer-keyed maps).
#[async_trait]
pub trait Map<K, V>: Send + Sync
where
    K: Send + Sync + Clone,
    V: Send + Sync + Clone,
{
    async fn has(&self, key: &K) -> bool;

    async fn set(&self, key: K, value: V);

    async fn get(&self, key: &K) -> Option<V>;

    async fn get_or_fail(&self, key: &K) -> Result<V> {
        self.get(key).await.ok_or(StoreError::NotFound)
    }

    async fn delete(&self, key: &K) -> bool;

    async fn keys(&self) -> Vec<K>;

    async fn values(&self) -> Vec<V>;

    async fn items(&self) -> Vec<(K, V)>;
}
