use super::{run_batches, BackfillContext};
use crate::error::Result;
use crate::table::data::{decode_row, encode_row};
use crate::table::TABLE_DATA_PARTITION;
use reorg_commons::{ColumnInfo, TableInfo};
use reorg_store::{Partition, StorageBackend};
use std::sync::Arc;
use std::time::Duration;

/// Materializes a new column's default value in every existing row.
///
/// Rows that already carry the column (written after it became write-only)
/// are left as they are.
pub struct ColumnBackfill {
    backend: Arc<dyn StorageBackend>,
    table: TableInfo,
    column: ColumnInfo,
    batch_size: usize,
    batch_delay: Duration,
}

impl ColumnBackfill {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        table: TableInfo,
        column: ColumnInfo,
        batch_size: usize,
    ) -> Self {
        Self {
            backend,
            table,
            column,
            batch_size,
            batch_delay: Duration::ZERO,
        }
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub async fn run(self, ctx: BackfillContext) -> Result<()> {
        log::info!(
            "[{}] Backfilling column {}.{} ({}) on {}",
            ctx.job_id,
            self.table.name,
            self.column.name,
            ctx.element,
            ctx.physical_table_id
        );
        let partition = Partition::new(TABLE_DATA_PARTITION);
        let name = self.column.name.as_str();
        let default = self
            .column
            .default_value
            .clone()
            .unwrap_or(serde_json::Value::Null);
        run_batches(&self.backend, self.table.id, &ctx, self.batch_size, self.batch_delay, |txn, records| {
            for (key, value) in records {
                let mut row = decode_row(value)?;
                if row.contains_key(name) {
                    continue;
                }
                row.insert(name.to_string(), default.clone());
                txn.put(&partition, key, encode_row(&row)?);
            }
            Ok(())
        })
        .await
    }
}
