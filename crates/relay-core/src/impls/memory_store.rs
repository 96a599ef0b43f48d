//! MemoryStore: a `RequestStore` that lives as long as its handles.
//!
//! Clones share the same entries, so a test can drop a manager, build a new
//! one over a clone of the store and watch it restore. Loads and saves can be
//! made to fail on demand.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::domain::StorageError;
use crate::ports::RequestStore;
use crate::queue::StoredEntry;

#[derive(Debug, Default)]
struct Inner {
    entries: Vec<StoredEntry>,
    fail_writes: bool,
    fail_loads: bool,
    saves: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that already holds `entries`.
    pub fn with_entries(entries: Vec<StoredEntry>) -> Self {
        let store = Self::new();
        store.lock().entries = entries;
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every following `save` fail until switched back.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make every following `load` report a corrupt store.
    pub fn set_fail_loads(&self, fail: bool) {
        self.lock().fail_loads = fail;
    }

    /// What the last successful save wrote.
    pub fn entries(&self) -> Vec<StoredEntry> {
        self.lock().entries.clone()
    }

    /// Successful saves so far.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn load(&self) -> Result<Vec<StoredEntry>, StorageError> {
        let inner = self.lock();
        if inner.fail_loads {
            return Err(StorageError::Unavailable("injected load failure".to_string()));
        }
        Ok(inner.entries.clone())
    }

    async fn save(&self, entries: &[StoredEntry]) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(StorageError::Unavailable("injected write failure".to_string()));
        }
        inner.entries = entries.to_vec();
        inner.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::EntryStatus;

    fn stored(seq: u64) -> StoredEntry {
        StoredEntry {
            seq,
            status: EntryStatus::Pending,
            attempts: 0,
            last_failure: None,
            retry_at: None,
            request: serde_json::json!({ "kind": "k" }),
        }
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.save(&[stored(1)]).await.unwrap();
        assert_eq!(other.load().await.unwrap(), vec![stored(1)]);
        assert_eq!(other.save_count(), 1);
    }

    #[tokio::test]
    async fn injected_write_failure_keeps_previous_entries() {
        let store = MemoryStore::with_entries(vec![stored(1)]);
        store.set_fail_writes(true);
        let err = store.save(&[stored(2)]).await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));
        assert_eq!(store.entries(), vec![stored(1)]);

        store.set_fail_writes(false);
        store.save(&[stored(2)]).await.unwrap();
        assert_eq!(store.entries(), vec![stored(2)]);
    }

    #[tokio::test]
    async fn injected_load_failure() {
        let store = MemoryStore::with_entries(vec![stored(1)]);
        store.set_fail_loads(true);
        assert!(store.load().await.is_err());
    }
}
