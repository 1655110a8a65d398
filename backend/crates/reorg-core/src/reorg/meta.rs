//! Checkpoint records.
//!
//! One record per running reorg job, keyed by job id, holding the element
//! being built and the key range still to process. Records are bincode-encoded;
//! they are rewritten on every checkpoint so they are kept compact.

use reorg_commons::{Element, JobId, Key, PhysicalTableId};
use reorg_store::{EntityStore, StorageBackend, StorageError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const REORG_PARTITION: &str = "ddl_reorg";

/// Durable resumption point of a reorg job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReorgRecord {
    pub element: Element,
    /// Inclusive start of the range still to process
    pub start_key: Key,
    /// Exclusive end of the range
    pub end_key: Key,
    pub physical_table_id: PhysicalTableId,
    /// Job's cumulative row count as of this checkpoint
    pub row_count: i64,
    pub snapshot_ver: u64,
}

pub struct ReorgMetaStore {
    backend: Arc<dyn StorageBackend>,
}

impl ReorgMetaStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }
}

impl EntityStore<JobId, ReorgRecord> for ReorgMetaStore {
    fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn partition(&self) -> &str {
        REORG_PARTITION
    }

    fn serialize(&self, entity: &ReorgRecord) -> reorg_store::Result<Vec<u8>> {
        bincode::serde::encode_to_vec(entity, bincode::config::standard())
            .map_err(|e| StorageError::SerializationError(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> reorg_store::Result<ReorgRecord> {
        bincode::serde::decode_from_slice(bytes, bincode::config::standard())
            .map(|(record, _)| record)
            .map_err(|e| StorageError::SerializationError(e.to_string()))
    }
}
