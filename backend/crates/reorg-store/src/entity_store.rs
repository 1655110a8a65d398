//! Type-safe entity storage with generic key types.
//!
//! ```text
//! EntityStore<K, V>        ← Typed entity CRUD with generic keys (this file)
//!     ↓
//! StorageBackend / Transaction
//! ```
//!
//! Every method has a direct variant (auto-committed single batch) and a
//! `_in` variant that runs inside a caller-owned [`Transaction`], so one
//! commit can cover writes to several stores.
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! struct JobStore {
//!     backend: Arc<dyn StorageBackend>,
//! }
//!
//! impl EntityStore<JobId, Job> for JobStore {
//!     fn backend(&self) -> &Arc<dyn StorageBackend> {
//!         &self.backend
//!     }
//!
//!     fn partition(&self) -> &str {
//!         "ddl_jobs"
//!     }
//! }
//! ```

use crate::storage_trait::{Partition, Result, StorageBackend, StorageError};
use crate::transaction::Transaction;
use reorg_commons::StorageKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Typed entity storage.
///
/// ## Type Parameters
/// - `K`: Key type that implements StorageKey (JobId, TableId, ...)
/// - `V`: Value/entity type that must be Serialize + Deserialize
///
/// ## Provided Methods (with default JSON serialization)
/// - `serialize()` / `deserialize()`: override for bincode
/// - `get()` / `put()` / `delete()` and their `_in` transactional variants
/// - `scan_all()`: every entity in the partition, in key order
pub trait EntityStore<K, V>
where
    K: StorageKey,
    V: Serialize + for<'de> Deserialize<'de> + Send + Sync,
{
    /// Returns a reference to the storage backend.
    fn backend(&self) -> &Arc<dyn StorageBackend>;

    /// Returns the partition name for this entity type.
    fn partition(&self) -> &str;

    /// Serializes an entity to bytes (JSON by default).
    fn serialize(&self, entity: &V) -> Result<Vec<u8>> {
        serde_json::to_vec(entity).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    /// Deserializes bytes to an entity (JSON by default).
    fn deserialize(&self, bytes: &[u8]) -> Result<V> {
        serde_json::from_slice(bytes).map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    fn put(&self, key: &K, entity: &V) -> Result<()> {
        let partition = Partition::new(self.partition());
        let value = self.serialize(entity)?;
        self.backend().put(&partition, &key.storage_key(), &value)
    }

    fn get(&self, key: &K) -> Result<Option<V>> {
        let partition = Partition::new(self.partition());
        match self.backend().get(&partition, &key.storage_key())? {
            Some(bytes) => Ok(Some(self.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Deletes an entity by key. Idempotent.
    fn delete(&self, key: &K) -> Result<()> {
        let partition = Partition::new(self.partition());
        self.backend().delete(&partition, &key.storage_key())
    }

    fn get_in(&self, txn: &mut Transaction, key: &K) -> Result<Option<V>> {
        let partition = Partition::new(self.partition());
        match txn.get(&partition, &key.storage_key())? {
            Some(bytes) => Ok(Some(self.deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    fn put_in(&self, txn: &mut Transaction, key: &K, entity: &V) -> Result<()> {
        let partition = Partition::new(self.partition());
        let value = self.serialize(entity)?;
        txn.put(&partition, &key.storage_key(), value);
        Ok(())
    }

    fn delete_in(&self, txn: &mut Transaction, key: &K) {
        let partition = Partition::new(self.partition());
        txn.delete(&partition, &key.storage_key());
    }

    /// Scans all entities in the partition.
    ///
    /// **Warning**: This loads all entities into memory.
    fn scan_all(&self) -> Result<Vec<(K, V)>> {
        const MAX_SCAN_LIMIT: usize = 100000;
        let partition = Partition::new(self.partition());
        let iter = self
            .backend()
            .scan(&partition, None, None, Some(MAX_SCAN_LIMIT))?;

        let mut results = Vec::new();
        for (key_bytes, value_bytes) in iter {
            let key = K::from_storage_key(&key_bytes).map_err(StorageError::SerializationError)?;
            results.push((key, self.deserialize(&value_bytes)?));
        }
        if results.len() >= MAX_SCAN_LIMIT {
            log::warn!(
                "Scan of partition {} reached max limit of {} entries",
                self.partition(),
                MAX_SCAN_LIMIT
            );
        }
        Ok(results)
    }

    /// First entity in key order.
    fn first(&self) -> Result<Option<(K, V)>> {
        let partition = Partition::new(self.partition());
        let mut iter = self.backend().scan(&partition, None, None, Some(1))?;
        match iter.next() {
            Some((key_bytes, value_bytes)) => {
                let key =
                    K::from_storage_key(&key_bytes).map_err(StorageError::SerializationError)?;
                Ok(Some((key, self.deserialize(&value_bytes)?)))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_backend::InMemoryBackend;
    use reorg_commons::JobId;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        text: String,
    }

    struct NoteStore {
        backend: Arc<dyn StorageBackend>,
    }

    impl EntityStore<JobId, Note> for NoteStore {
        fn backend(&self) -> &Arc<dyn StorageBackend> {
            &self.backend
        }

        fn partition(&self) -> &str {
            "notes"
        }
    }

    fn note(text: &str) -> Note {
        Note {
            text: text.to_string(),
        }
    }

    #[test]
    fn test_put_get_delete() {
        let store = NoteStore {
            backend: Arc::new(InMemoryBackend::new()),
        };
        store.put(&JobId::new(1), &note("a")).unwrap();
        assert_eq!(store.get(&JobId::new(1)).unwrap(), Some(note("a")));
        store.delete(&JobId::new(1)).unwrap();
        assert_eq!(store.get(&JobId::new(1)).unwrap(), None);
    }

    #[test]
    fn test_scan_all_returns_key_order() {
        let store = NoteStore {
            backend: Arc::new(InMemoryBackend::new()),
        };
        for id in [3, 1, 2] {
            store.put(&JobId::new(id), &note(&id.to_string())).unwrap();
        }
        let keys: Vec<JobId> = store.scan_all().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![JobId::new(1), JobId::new(2), JobId::new(3)]);
        assert_eq!(store.first().unwrap().map(|(k, _)| k), Some(JobId::new(1)));
    }

    #[test]
    fn test_transactional_writes_apply_on_commit() {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let store = NoteStore {
            backend: backend.clone(),
        };
        let mut txn = Transaction::begin(backend);
        store.put_in(&mut txn, &JobId::new(5), &note("x")).unwrap();
        assert_eq!(store.get_in(&mut txn, &JobId::new(5)).unwrap(), Some(note("x")));
        assert_eq!(store.get(&JobId::new(5)).unwrap(), None);
        txn.commit().unwrap();
        assert_eq!(store.get(&JobId::new(5)).unwrap(), Some(note("x")));
    }
}
