//! Optimistic read-write transactions.
//!
//! A [`Transaction`] buffers writes locally and remembers every value it
//! read. On commit the reads become preconditions of one conditional batch:
//! if any key read by the transaction changed in the meantime the commit
//! fails with [`StorageError::Conflict`] and nothing is applied.
//!
//! Reads observe the transaction's own buffered writes.

use crate::storage_trait::{Condition, Operation, Partition, Result, StorageBackend, StorageError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Upper bound on attempts made by [`run_in_new_txn`] for retryable work.
pub const MAX_TXN_RETRIES: usize = 10;

type TxnKey = (Partition, Vec<u8>);

pub struct Transaction {
    backend: Arc<dyn StorageBackend>,
    start_version: u64,
    reads: BTreeMap<TxnKey, Option<Vec<u8>>>,
    writes: BTreeMap<TxnKey, Option<Vec<u8>>>,
}

impl Transaction {
    pub fn begin(backend: Arc<dyn StorageBackend>) -> Self {
        let start_version = backend.current_version();
        Self {
            backend,
            start_version,
            reads: BTreeMap::new(),
            writes: BTreeMap::new(),
        }
    }

    /// Store version observed when the transaction began.
    pub fn start_version(&self) -> u64 {
        self.start_version
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn get(&mut self, partition: &Partition, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn_key = (partition.clone(), key.to_vec());
        if let Some(buffered) = self.writes.get(&txn_key) {
            return Ok(buffered.clone());
        }
        if let Some(seen) = self.reads.get(&txn_key) {
            return Ok(seen.clone());
        }
        let value = self.backend.get(partition, key)?;
        self.reads.insert(txn_key, value.clone());
        Ok(value)
    }

    pub fn put(&mut self, partition: &Partition, key: &[u8], value: Vec<u8>) {
        self.writes
            .insert((partition.clone(), key.to_vec()), Some(value));
    }

    pub fn delete(&mut self, partition: &Partition, key: &[u8]) {
        self.writes.insert((partition.clone(), key.to_vec()), None);
    }

    /// Scan `[start, end)` merged with this transaction's buffered writes.
    ///
    /// Scanned keys are not validated at commit; use `get` for keys whose
    /// value the commit depends on.
    pub fn scan_range(
        &self,
        partition: &Partition,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .backend
            .scan_range(partition, start, end, limit.saturating_add(self.writes.len()))?
            .into_iter()
            .collect();
        for ((p, key), value) in &self.writes {
            if p != partition || key.as_slice() < start || key.as_slice() >= end {
                continue;
            }
            match value {
                Some(v) => {
                    merged.insert(key.clone(), v.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().take(limit).collect())
    }

    pub fn is_read_only(&self) -> bool {
        self.writes.is_empty()
    }

    /// Discard all buffered writes.
    pub fn rollback(self) {
        log::trace!(
            "Rolling back transaction started at version {} ({} buffered writes)",
            self.start_version,
            self.writes.len()
        );
    }

    /// Apply buffered writes atomically, validating every read.
    pub fn commit(self) -> Result<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        let conditions = self
            .reads
            .into_iter()
            .map(|((partition, key), expected)| Condition {
                partition,
                key,
                expected,
            })
            .collect();
        let operations = self
            .writes
            .into_iter()
            .map(|((partition, key), value)| match value {
                Some(value) => Operation::Put {
                    partition,
                    key,
                    value,
                },
                None => Operation::Delete { partition, key },
            })
            .collect();
        self.backend.batch_if(conditions, operations)
    }
}

/// Run `f` in a fresh transaction and commit it.
///
/// When `retryable` is set, a commit that fails with a write conflict is
/// retried from scratch (new transaction, `f` invoked again) up to
/// [`MAX_TXN_RETRIES`] times. Any error returned by `f` itself, and any
/// non-conflict commit error, is returned immediately.
pub fn run_in_new_txn<T, E, F>(
    backend: &Arc<dyn StorageBackend>,
    retryable: bool,
    mut f: F,
) -> std::result::Result<T, E>
where
    F: FnMut(&mut Transaction) -> std::result::Result<T, E>,
    E: From<StorageError>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut txn = Transaction::begin(Arc::clone(backend));
        let value = f(&mut txn)?;
        match txn.commit() {
            Ok(()) => return Ok(value),
            Err(err) if retryable && err.is_conflict() && attempt < MAX_TXN_RETRIES => {
                log::debug!("Transaction conflict (attempt {}), retrying: {}", attempt, err);
            }
            Err(err) => return Err(err.into()),
        }
    }
}
