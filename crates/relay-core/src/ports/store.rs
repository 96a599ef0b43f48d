//! RequestStore port: durable home of the queue.
//!
//! The engine always writes the whole queue. A store only has to make each
//! `save` atomic (readers see the old or the new queue, never a mix).

use async_trait::async_trait;

use crate::domain::StorageError;
use crate::queue::StoredEntry;

#[async_trait]
pub trait RequestStore: Send + Sync {
    /// Everything saved last time, in any order. An empty store is `Ok(vec![])`.
    async fn load(&self) -> Result<Vec<StoredEntry>, StorageError>;

    /// Replace the stored queue with `entries`.
    async fn save(&self, entries: &[StoredEntry]) -> Result<(), StorageError>;
}
