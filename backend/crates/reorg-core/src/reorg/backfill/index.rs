use super::{run_batches, BackfillContext};
use crate::error::{ReorgError, Result};
use crate::table::data::{decode_row, put_index_entry};
use reorg_commons::codec::decode_record_key;
use reorg_commons::{IndexInfo, Key, TableInfo};
use reorg_store::StorageBackend;
use std::sync::Arc;
use std::time::Duration;

/// Writes the index entry of every existing row in the range.
///
/// Rows written concurrently through a write-only index already carry their
/// entry; writing it again is harmless, and a unique entry pointing at the
/// same handle is not a conflict.
pub struct IndexBackfill {
    backend: Arc<dyn StorageBackend>,
    table: TableInfo,
    index: IndexInfo,
    batch_size: usize,
    batch_delay: Duration,
}

impl IndexBackfill {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        table: TableInfo,
        index: IndexInfo,
        batch_size: usize,
    ) -> Self {
        Self {
            backend,
            table,
            index,
            batch_size,
            batch_delay: Duration::ZERO,
        }
    }

    /// Pause between batches (throttling).
    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub async fn run(self, ctx: BackfillContext) -> Result<()> {
        log::info!(
            "[{}] Backfilling index {} ({}) on {}: start={}, end={}",
            ctx.job_id,
            self.index.name,
            ctx.element,
            ctx.physical_table_id,
            ctx.start_key,
            ctx.end_key
        );
        let is_common_handle = self.table.is_common_handle;
        let physical_id = ctx.physical_table_id;
        let index = &self.index;
        run_batches(&self.backend, self.table.id, &ctx, self.batch_size, self.batch_delay, |txn, records| {
            for (key, value) in records {
                let (_, handle) = decode_record_key(key, is_common_handle).ok_or_else(|| {
                    ReorgError::Backfill(format!("malformed record key {}", Key::new(key.clone())))
                })?;
                let row = decode_row(value)?;
                put_index_entry(txn, physical_id, index, &row, &handle)?;
            }
            Ok(())
        })
        .await
    }
}
