//! `Counter`: the `nextID` job-ID and job-scoped VM-ID primitives.

use async_trait::async_trait;

#[async_trait]
pub trait Counter: Send + Sync {
    async fn get(&self) -> i64;

    async fn set(&self, value: i64);

    /// Atomically increment and return the new value.
    async fn increment_and_get(&self) -> i64;
}
