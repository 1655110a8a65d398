//! Storage backend abstraction.
//!
//! The DDL engine only needs a small surface from the underlying store:
//! point reads, ordered scans, and atomic batches. Batches may carry
//! [`Condition`]s; the batch is applied only when every condition still
//! holds, which is what optimistic transactions build on.
//!
//! ## Partition Model
//!
//! Data is organised into named partitions (`ddl_jobs`, `ddl_reorg`,
//! `table_data`, ...). Partitions are created on first write; reading from a
//! partition that was never written behaves like reading an empty one.
//!
//! ## Versions
//!
//! Every successful batch bumps a global, monotonically increasing version.
//! The reorg engine records the version at which a backfill starts as its
//! snapshot version.

use std::any::Any;
use std::fmt;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Iterator over `(key, value)` pairs in ascending key order.
pub type KvIterator<'a> = Box<dyn Iterator<Item = (Vec<u8>, Vec<u8>)> + Send + 'a>;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// Partition not found
    PartitionNotFound(String),

    /// Generic I/O error from underlying storage
    IoError(String),

    /// Serialization/deserialization error
    SerializationError(String),

    /// A conditional batch lost a race with a concurrent writer
    Conflict(String),

    /// Operation not supported by this backend
    Unsupported(String),

    /// Other errors
    Other(String),
}

impl StorageError {
    /// Whether retrying the whole transaction may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict(_))
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::PartitionNotFound(p) => write!(f, "Partition not found: {}", p),
            StorageError::IoError(msg) => write!(f, "I/O error: {}", msg),
            StorageError::SerializationError(msg) => write!(f, "Serialization error: {}", msg),
            StorageError::Conflict(msg) => write!(f, "Write conflict: {}", msg),
            StorageError::Unsupported(msg) => write!(f, "Unsupported operation: {}", msg),
            StorageError::Other(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl std::error::Error for StorageError {}

/// A logical partition of data within a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Partition {
    name: String,
}

impl Partition {
    /// Creates a new partition with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Returns the partition name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl From<String> for Partition {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl From<&str> for Partition {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// A single operation in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Insert or update a key-value pair
    Put {
        partition: Partition,
        key: Vec<u8>,
        value: Vec<u8>,
    },

    /// Delete a key
    Delete { partition: Partition, key: Vec<u8> },
}

/// Precondition of a conditional batch: `key` must currently hold `expected`
/// (`None` meaning absent).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condition {
    pub partition: Partition,
    pub key: Vec<u8>,
    pub expected: Option<Vec<u8>>,
}

/// Pluggable storage backend. Implementations must be thread-safe.
///
/// ## Error Handling
///
/// Implementations should:
/// - Return `Conflict` from `batch_if` when a precondition does not hold
/// - Return `IoError` for underlying storage failures
/// - Leave the store untouched when a batch fails
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key. Returns `Ok(None)` if the key doesn't exist.
    fn get(&self, partition: &Partition, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Stores a key-value pair, replacing any previous value.
    fn put(&self, partition: &Partition, key: &[u8], value: &[u8]) -> Result<()> {
        self.batch(vec![Operation::Put {
            partition: partition.clone(),
            key: key.to_vec(),
            value: value.to_vec(),
        }])
    }

    /// Deletes a key. Idempotent.
    fn delete(&self, partition: &Partition, key: &[u8]) -> Result<()> {
        self.batch(vec![Operation::Delete {
            partition: partition.clone(),
            key: key.to_vec(),
        }])
    }

    /// Executes multiple operations atomically.
    fn batch(&self, operations: Vec<Operation>) -> Result<()> {
        self.batch_if(Vec::new(), operations)
    }

    /// Executes `operations` atomically, but only if every condition holds.
    fn batch_if(&self, conditions: Vec<Condition>, operations: Vec<Operation>) -> Result<()>;

    /// Scans keys in a partition in ascending order.
    ///
    /// ## Parameters
    /// - `prefix`: If Some, only return keys starting with this prefix
    /// - `start_key`: If Some, start scanning from this key (inclusive)
    /// - `limit`: If Some, return at most this many entries
    fn scan(
        &self,
        partition: &Partition,
        prefix: Option<&[u8]>,
        start_key: Option<&[u8]>,
        limit: Option<usize>,
    ) -> Result<KvIterator<'_>>;

    /// Scans `[start, end)` in ascending order, returning at most `limit` entries.
    fn scan_range(
        &self,
        partition: &Partition,
        start: &[u8],
        end: &[u8],
        limit: usize,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let end = end.to_vec();
        let iter = self.scan(partition, None, Some(start), None)?;
        Ok(iter
            .take_while(|(k, _)| *k < end)
            .take(limit)
            .collect())
    }

    /// Version of the most recent successful batch.
    fn current_version(&self) -> u64;

    /// Checks if a partition exists.
    fn partition_exists(&self, partition: &Partition) -> bool;

    /// Creates a new partition. Idempotent.
    fn create_partition(&self, partition: &Partition) -> Result<()>;

    /// Lists all partitions in the storage backend.
    fn list_partitions(&self) -> Result<Vec<Partition>>;

    /// Downcast support for tests that need the concrete backend.
    fn as_any(&self) -> &dyn Any;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_creation() {
        let p1 = Partition::new("ddl_jobs");
        assert_eq!(p1.name(), "ddl_jobs");

        let p2 = Partition::from("ddl_reorg");
        assert_eq!(p2.to_string(), "ddl_reorg");
    }

    #[test]
    fn test_error_display() {
        let err = StorageError::Conflict("ddl_jobs".to_string());
        assert_eq!(err.to_string(), "Write conflict: ddl_jobs");
        assert!(err.is_conflict());

        let err = StorageError::IoError("disk full".to_string());
        assert_eq!(err.to_string(), "I/O error: disk full");
        assert!(!err.is_conflict());
    }
}
