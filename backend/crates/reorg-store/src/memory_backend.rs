//! In-memory storage backend.
//!
//! Partitions are `BTreeMap`s behind one `RwLock`, so a conditional batch
//! checks its preconditions and applies its writes under a single write guard.
//! Used by tests and by single-process deployments; several nodes of a test
//! cluster share one instance to see each other's commits.

use crate::storage_trait::{
    Condition, KvIterator, Operation, Partition, Result, StorageBackend, StorageError,
};
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

type PartitionData = BTreeMap<Vec<u8>, Vec<u8>>;

pub struct InMemoryBackend {
    partitions: RwLock<HashMap<String, PartitionData>>,
    version: AtomicU64,
    fail_commits: AtomicUsize,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self {
            partitions: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            fail_commits: AtomicUsize::new(0),
        }
    }

    /// Make the next `n` batches fail with an I/O error without applying them.
    pub fn fail_next_commits(&self, n: usize) {
        self.fail_commits.store(n, Ordering::SeqCst);
    }

    /// Number of keys in a partition.
    pub fn len(&self, partition: &Partition) -> usize {
        self.partitions
            .read()
            .get(partition.name())
            .map(|p| p.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, partition: &Partition) -> bool {
        self.len(partition) == 0
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for InMemoryBackend {
    fn get(&self, partition: &Partition, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .partitions
            .read()
            .get(partition.name())
            .and_then(|p| p.get(key).cloned()))
    }

    fn batch_if(&self, conditions: Vec<Condition>, operations: Vec<Operation>) -> Result<()> {
        if self.take_injected_failure() {
            log::debug!("InMemoryBackend: injected commit failure");
            return Err(StorageError::IoError("injected commit failure".to_string()));
        }

        let mut partitions = self.partitions.write();
        for cond in &conditions {
            let current = partitions
                .get(cond.partition.name())
                .and_then(|p| p.get(&cond.key));
            if current != cond.expected.as_ref() {
                return Err(StorageError::Conflict(format!(
                    "key changed concurrently in partition {}",
                    cond.partition
                )));
            }
        }

        for op in operations {
            match op {
                Operation::Put {
                    partition,
                    key,
                    value,
                } => {
                    partitions
                        .entry(partition.name().to_string())
                        .or_default()
                        .insert(key, value);
                }
                Operation::Delete { partition, key } => {
                    if let Some(p) = partitions.get_mut(partition.name()) {
                        p.remove(&key);
                    }
                }
            }
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn scan(
        &self,
        partition: &Partition,
        prefix: Option<&[u8]>,
        start_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<KvIterator<'_>> {
        let partitions = self.partitions.read();
        let Some(data) = partitions.get(partition.name()) else {
            return Ok(Box::new(std::iter::empty()));
        };

        let from: Vec<u8> = match (prefix, start_key) {
            (Some(p), Some(s)) => std::cmp::max(p, s).to_vec(),
            (Some(p), None) => p.to_vec(),
            (None, Some(s)) => s.to_vec(),
            (None, None) => Vec::new(),
        };
        let limit = limit.unwrap_or(usize::MAX);
        let prefix = prefix.map(|p| p.to_vec());

        // Copy out so the iterator does not hold the lock.
        let rows: Vec<(Vec<u8>, Vec<u8>)> = data
            .range(from..)
            .take_while(|(k, _)| prefix.as_ref().map_or(true, |p| k.starts_with(p)))
            .take(limit)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Box::new(rows.into_iter()))
    }

    fn current_version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    fn partition_exists(&self, partition: &Partition) -> bool {
        self.partitions.read().contains_key(partition.name())
    }

    fn create_partition(&self, partition: &Partition) -> Result<()> {
        self.partitions
            .write()
            .entry(partition.name().to_string())
            .or_default();
        Ok(())
    }

    fn list_partitions(&self) -> Result<Vec<Partition>> {
        let mut names: Vec<Partition> = self
            .partitions
            .read()
            .keys()
            .map(|name| Partition::new(name.clone()))
            .collect();
        names.sort();
        Ok(names)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put(p: &Partition, k: &[u8], v: &[u8]) -> Operation {
        Operation::Put {
            partition: p.clone(),
            key: k.to_vec(),
            value: v.to_vec(),
        }
    }

    #[test]
    fn test_put_get_delete() {
        let backend = InMemoryBackend::new();
        let p = Partition::new("t");
        backend.put(&p, b"k", b"v").unwrap();
        assert_eq!(backend.get(&p, b"k").unwrap(), Some(b"v".to_vec()));
        backend.delete(&p, b"k").unwrap();
        assert_eq!(backend.get(&p, b"k").unwrap(), None);
        assert_eq!(backend.current_version(), 2);
    }

    #[test]
    fn test_scan_respects_prefix_start_and_limit() {
        let backend = InMemoryBackend::new();
        let p = Partition::new("t");
        for k in [b"a1", b"a2", b"a3", b"b1"] {
            backend.put(&p, k, b"x").unwrap();
        }
        let keys: Vec<_> = backend
            .scan(&p, Some(b"a"), Some(b"a2"), None)
            .unwrap()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a2".to_vec(), b"a3".to_vec()]);

        let limited = backend.scan_range(&p, b"a", b"b", 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_batch_if_rejects_stale_condition() {
        let backend = InMemoryBackend::new();
        let p = Partition::new("t");
        backend.put(&p, b"k", b"v1").unwrap();

        let stale = Condition {
            partition: p.clone(),
            key: b"k".to_vec(),
            expected: None,
        };
        let err = backend
            .batch_if(vec![stale], vec![put(&p, b"other", b"x")])
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(backend.get(&p, b"other").unwrap(), None);

        let fresh = Condition {
            partition: p.clone(),
            key: b"k".to_vec(),
            expected: Some(b"v1".to_vec()),
        };
        backend
            .batch_if(vec![fresh], vec![put(&p, b"other", b"x")])
            .unwrap();
        assert_eq!(backend.get(&p, b"other").unwrap(), Some(b"x".to_vec()));
    }

    #[test]
    fn test_injected_failures_are_consumed() {
        let backend = InMemoryBackend::new();
        let p = Partition::new("t");
        backend.fail_next_commits(1);
        assert!(backend.put(&p, b"k", b"v").is_err());
        assert_eq!(backend.get(&p, b"k").unwrap(), None);
        backend.put(&p, b"k", b"v").unwrap();
        assert_eq!(backend.get(&p, b"k").unwrap(), Some(b"v".to_vec()));
    }
}
