//! `Queue<T>`: FIFO with blocking pop, used for the unassigned-job queue and
//! each image's free-sandbox pool.

use async_trait::async_trait;
use std::time::Duration;

/// A FIFO queue of items, with an optional blocking pop and remove-by-value.
///
/// `pop(blocking=true, timeout=None)` blocks indefinitely until an item is
/// pushed; with a timeout it returns `None` on expiry. `remove` deletes the
/// first element equal to `item`, if any (used to retract a job that was
/// cancelled while still unassigned).
#[async_trait]
pub trait Queue<T>: Send + Sync
where
    T: Send + Sync + Clone + PartialEq,
{
    async fn size(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.size().await == 0
    }

    async fn push(&self, item: T);

    async fn pop(&self, blocking: bool, timeout: Option<Duration>) -> Option<T>;

    async fn remove(&self, item: &T) -> bool;

    async fn drain(&self) -> Vec<T>;
}
