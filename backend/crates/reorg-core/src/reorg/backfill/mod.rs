//! Backfill tasks.
//!
//! A backfill walks the record keys of one physical table in `[start, end)`,
//! batch by batch. Each batch is its own transaction; only after it commits
//! does the task report the batch's rows and the key after the batch's last
//! record to the shared [`ReorgProgress`]. A checkpoint therefore never points
//! past data that was not written.
//!
//! Every batch reads the element's schema state inside its transaction and
//! stops unless it is still `WriteReorganization`. A rollback moving the
//! element to `DeleteOnly` makes an in-flight batch conflict, so no batch
//! commits after the rollback has started removing data.

mod column;
mod index;

pub use column::ColumnBackfill;
pub use index::IndexBackfill;

use super::progress::ReorgProgress;
use crate::error::{ReorgError, Result};
use crate::jobs::catalog::TableCatalog;
use crate::table::TABLE_DATA_PARTITION;
use reorg_commons::{Element, JobId, Key, PhysicalTableId, SchemaState, TableId};
use reorg_store::{run_in_new_txn, Partition, StorageBackend, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything a backfill needs to know about the range it owns.
#[derive(Debug, Clone)]
pub struct BackfillContext {
    /// Job ID for logging
    pub job_id: JobId,
    pub element: Element,
    pub physical_table_id: PhysicalTableId,
    pub start_key: Key,
    pub end_key: Key,
    pub progress: Arc<ReorgProgress>,
    /// Cancelled when the owner is lost or the job is cancelled
    pub cancel: CancellationToken,
}

impl BackfillContext {
    fn cancelled(&self) -> ReorgError {
        ReorgError::Cancelled(format!("[{}] backfill of {} cancelled", self.job_id, self.element))
    }

    fn not_reorganizing(&self, state: Option<SchemaState>) -> ReorgError {
        ReorgError::Cancelled(format!(
            "[{}] {} is no longer being reorganized (state {:?})",
            self.job_id, self.element, state
        ))
    }
}

/// Drive `process` over `[ctx.start_key, ctx.end_key)` of table `table_id`
/// in batches of `batch_size` records.
pub(crate) async fn run_batches<F>(
    backend: &Arc<dyn StorageBackend>,
    table_id: TableId,
    ctx: &BackfillContext,
    batch_size: usize,
    batch_delay: Duration,
    mut process: F,
) -> Result<()>
where
    F: FnMut(&mut Transaction, &[(Vec<u8>, Vec<u8>)]) -> Result<()>,
{
    let partition = Partition::new(TABLE_DATA_PARTITION);
    let catalog = TableCatalog::new(backend.clone());
    let batch_size = batch_size.max(1);
    let mut cursor = ctx.start_key.clone();
    let mut batches = 0u64;

    while cursor < ctx.end_key {
        if ctx.cancel.is_cancelled() {
            return Err(ctx.cancelled());
        }

        let scanned = run_in_new_txn(backend, true, |txn| {
            let state = catalog
                .get_table_in(txn, table_id)?
                .and_then(|table| table.element_state(&ctx.element));
            if state != Some(SchemaState::WriteReorganization) {
                return Err(ctx.not_reorganizing(state));
            }
            let records = txn.scan_range(
                &partition,
                cursor.as_bytes(),
                ctx.end_key.as_bytes(),
                batch_size,
            )?;
            process(txn, &records)?;
            Ok::<_, ReorgError>(records.last().map(|(key, _)| (records.len(), Key::new(key.clone()))))
        })?;

        let Some((count, last_key)) = scanned else {
            break;
        };
        batches += 1;
        cursor = last_key.next();
        ctx.progress.report_batch(count as i64, cursor.clone());
        log::trace!(
            "[{}] Backfill batch {} of {}: {} rows, next={}",
            ctx.job_id,
            batches,
            ctx.element,
            count,
            cursor
        );

        if count < batch_size {
            break;
        }
        if batch_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(ctx.cancelled()),
                _ = tokio::time::sleep(batch_delay) => {}
            }
        }
    }

    log::debug!(
        "[{}] Backfill of {} on {} reached end of range after {} batches",
        ctx.job_id,
        ctx.element,
        ctx.physical_table_id,
        batches
    );
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::table::{Row, TableData};
    use reorg_commons::{Handle, SchemaId, TableId, TableInfo};
    use reorg_store::InMemoryBackend;
    use serde_json::json;

    pub fn table() -> TableInfo {
        TableInfo::new(TableId::new(10), SchemaId::new(1), "t").with_columns(&["c1"])
    }

    /// Backend holding `rows` rows with handles `0..rows`.
    pub fn seeded(table: &TableInfo, rows: i64) -> Arc<dyn StorageBackend> {
        let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
        let data = TableData::new(backend.clone());
        for i in 0..rows {
            let mut row = Row::new();
            row.insert("c1".to_string(), json!(format!("v{}", i)));
            data.insert_row(table, PhysicalTableId::new(10), &Handle::Int(i), &row)
                .unwrap();
        }
        backend
    }

    /// Store `table` in the catalog.
    pub fn register(backend: &Arc<dyn StorageBackend>, table: &TableInfo) {
        TableCatalog::new(backend.clone()).create_table(table).unwrap();
    }

    pub fn context(table: &TableInfo, element: Element) -> BackfillContext {
        let (start_key, end_key) = table.record_range(PhysicalTableId::new(10));
        BackfillContext {
            job_id: JobId::new(1),
            element,
            physical_table_id: PhysicalTableId::new(10),
            start_key,
            end_key,
            progress: Arc::new(ReorgProgress::new()),
            cancel: CancellationToken::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::{context, register, seeded, table};
    use super::*;
    use reorg_commons::{IndexId, IndexInfo};
    use reorg_store::EntityStore;

    #[tokio::test]
    async fn test_batch_racing_rollback_does_not_commit() {
        let backend = seeded(&table(), 4);
        let mut index = IndexInfo::new(IndexId::new(333), "idx_c1", vec!["c1".into()], false);
        index.state = SchemaState::WriteReorganization;
        let mut reorganizing = table();
        reorganizing.indexes.push(index);
        register(&backend, &reorganizing);
        let ctx = context(&reorganizing, Element::index(333));
        let marker = Partition::new("marker");

        // The first attempt sees the index reorganizing; a rollback moves it
        // to DeleteOnly before that attempt commits.
        let catalog = TableCatalog::new(backend.clone());
        let mut attempts = 0;
        let err = run_batches(&backend, reorganizing.id, &ctx, 10, Duration::ZERO, |txn, _| {
            attempts += 1;
            if attempts == 1 {
                let mut rolled_back = reorganizing.clone();
                rolled_back.indexes[0].state = SchemaState::DeleteOnly;
                catalog.put(&rolled_back.id, &rolled_back)?;
            }
            txn.put(&marker, b"written", b"1".to_vec());
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, ReorgError::Cancelled(_)));
        assert_eq!(attempts, 1);
        assert_eq!(backend.get(&marker, b"written").unwrap(), None);
        assert_eq!(ctx.progress.row_count(), 0);
    }
}
