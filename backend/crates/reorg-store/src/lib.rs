//! # reorg-store
//!
//! Key-value storage abstraction used by the DDL engine.
//!
//! ## Architecture
//!
//! ```text
//! reorg-core (jobs, checkpoints, backfill)
//!     ↓
//! Transaction / EntityStore (typed access, optimistic commits)
//!     ↓
//! StorageBackend (partitioned K/V with versioned conditional batches)
//! ```
//!
//! Every write the engine cares about goes through a [`Transaction`]: reads
//! are recorded and re-validated at commit time, so two nodes updating the
//! same job record cannot both succeed.

pub mod entity_store;
pub mod memory_backend;
pub mod storage_trait;
pub mod transaction;

pub use entity_store::EntityStore;
pub use memory_backend::InMemoryBackend;
pub use storage_trait::{
    Condition, KvIterator, Operation, Partition, Result, StorageBackend, StorageError,
};
pub use transaction::{run_in_new_txn, Transaction, MAX_TXN_RETRIES};

// Re-export StorageKey so stores only import from one place
pub use reorg_commons::StorageKey;
