use super::Row;
use crate::error::{ReorgError, Result};
use reorg_commons::codec::{self, Handle, Key};
use reorg_commons::{IndexId, IndexInfo, PhysicalTableId, SchemaState, TableInfo};
use reorg_store::{run_in_new_txn, Operation, Partition, StorageBackend, Transaction};
use std::sync::Arc;

pub const TABLE_DATA_PARTITION: &str = "table_data";

/// Raw values of the indexed columns, in index column order.
pub fn index_values(row: &Row, index: &IndexInfo) -> Vec<Vec<u8>> {
    index
        .columns
        .iter()
        .map(|col| match row.get(col) {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(serde_json::Value::String(s)) => s.as_bytes().to_vec(),
            Some(other) => other.to_string().into_bytes(),
        })
        .collect()
}

/// Index key and value for one row.
pub fn index_entry(
    physical_id: PhysicalTableId,
    index: &IndexInfo,
    row: &Row,
    handle: &Handle,
) -> (Key, Vec<u8>) {
    let values = index_values(row, index);
    if index.unique {
        (
            codec::index_values_key(physical_id, index.id, &values),
            handle.encoded(),
        )
    } else {
        (codec::index_key(physical_id, index.id, &values, handle), Vec::new())
    }
}

/// Write `row`'s entry for `index` inside `txn`, failing on a unique conflict.
pub(crate) fn put_index_entry(
    txn: &mut Transaction,
    physical_id: PhysicalTableId,
    index: &IndexInfo,
    row: &Row,
    handle: &Handle,
) -> Result<()> {
    let partition = Partition::new(TABLE_DATA_PARTITION);
    let (key, value) = index_entry(physical_id, index, row, handle);
    if index.unique {
        if let Some(existing) = txn.get(&partition, key.as_bytes())? {
            if existing != value {
                return Err(ReorgError::Backfill(format!(
                    "duplicate entry for unique index {}",
                    index.name
                )));
            }
        }
    }
    txn.put(&partition, key.as_bytes(), value);
    Ok(())
}

pub(crate) fn decode_row(bytes: &[u8]) -> Result<Row> {
    Ok(serde_json::from_slice(bytes)?)
}

pub(crate) fn encode_row(row: &Row) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(row)?)
}

/// Whether writes must maintain an index in this state.
fn maintains_index(state: SchemaState) -> bool {
    matches!(
        state,
        SchemaState::WriteOnly | SchemaState::WriteReorganization | SchemaState::Public
    )
}

/// Row-level access to table data, used by DML paths and tests.
pub struct TableData {
    backend: Arc<dyn StorageBackend>,
}

impl TableData {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    fn partition() -> Partition {
        Partition::new(TABLE_DATA_PARTITION)
    }

    /// Insert or replace a row, maintaining every index that accepts writes.
    pub fn insert_row(
        &self,
        table: &TableInfo,
        physical_id: PhysicalTableId,
        handle: &Handle,
        row: &Row,
    ) -> Result<()> {
        let partition = Self::partition();
        let record_key = codec::record_key(physical_id, handle);
        let value = encode_row(row)?;
        run_in_new_txn(&self.backend, true, |txn| {
            txn.put(&partition, record_key.as_bytes(), value.clone());
            for index in table.indexes.iter().filter(|i| maintains_index(i.state)) {
                put_index_entry(txn, physical_id, index, row, handle)?;
            }
            Ok(())
        })
    }

    /// Delete a row and its index entries (including delete-only indexes).
    pub fn delete_row(
        &self,
        table: &TableInfo,
        physical_id: PhysicalTableId,
        handle: &Handle,
    ) -> Result<()> {
        let partition = Self::partition();
        let record_key = codec::record_key(physical_id, handle);
        run_in_new_txn(&self.backend, true, |txn| {
            let Some(bytes) = txn.get(&partition, record_key.as_bytes())? else {
                return Ok(());
            };
            let row = decode_row(&bytes)?;
            txn.delete(&partition, record_key.as_bytes());
            for index in table.indexes.iter().filter(|i| i.state != SchemaState::None) {
                let (key, _) = index_entry(physical_id, index, &row, handle);
                txn.delete(&partition, key.as_bytes());
            }
            Ok(())
        })
    }

    pub fn get_row(&self, physical_id: PhysicalTableId, handle: &Handle) -> Result<Option<Row>> {
        let key = codec::record_key(physical_id, handle);
        match self.backend.get(&Self::partition(), key.as_bytes())? {
            Some(bytes) => Ok(Some(decode_row(&bytes)?)),
            None => Ok(None),
        }
    }

    /// All rows of one physical table, in handle order.
    pub fn rows(&self, table: &TableInfo, physical_id: PhysicalTableId) -> Result<Vec<(Key, Row)>> {
        let (start, end) = table.record_range(physical_id);
        self.backend
            .scan_range(&Self::partition(), start.as_bytes(), end.as_bytes(), usize::MAX)?
            .into_iter()
            .map(|(k, v)| Ok((Key::new(k), decode_row(&v)?)))
            .collect()
    }

    /// Number of rows across every physical table.
    pub fn row_count(&self, table: &TableInfo) -> Result<usize> {
        let mut total = 0;
        for pid in table.physical_ids() {
            total += self.rows(table, pid)?.len();
        }
        Ok(total)
    }

    /// Raw index entries of one index in one physical table.
    pub fn index_entries(
        &self,
        physical_id: PhysicalTableId,
        index_id: IndexId,
    ) -> Result<Vec<(Key, Vec<u8>)>> {
        let prefix = codec::index_prefix(physical_id, index_id);
        Ok(self
            .backend
            .scan(&Self::partition(), Some(prefix.as_bytes()), None, None)?
            .map(|(k, v)| (Key::new(k), v))
            .collect())
    }

    /// Delete every entry of an index. Used when rolling back an add-index job.
    pub fn remove_index_entries(&self, table: &TableInfo, index_id: IndexId) -> Result<usize> {
        let partition = Self::partition();
        let mut operations = Vec::new();
        for pid in table.physical_ids() {
            for (key, _) in self.index_entries(pid, index_id)? {
                operations.push(Operation::Delete {
                    partition: partition.clone(),
                    key: key.into_vec(),
                });
            }
        }
        let removed = operations.len();
        if removed > 0 {
            self.backend.batch(operations)?;
        }
        Ok(removed)
    }

    /// Drop a column's values from every row. Used when rolling back an
    /// add-column job.
    pub fn remove_column_values(&self, table: &TableInfo, column: &str) -> Result<usize> {
        let partition = Self::partition();
        let mut operations = Vec::new();
        for pid in table.physical_ids() {
            for (key, mut row) in self.rows(table, pid)? {
                if row.remove(column).is_some() {
                    operations.push(Operation::Put {
                        partition: partition.clone(),
                        key: key.into_vec(),
                        value: encode_row(&row)?,
                    });
                }
            }
        }
        let rewritten = operations.len();
        if rewritten > 0 {
            self.backend.batch(operations)?;
        }
        Ok(rewritten)
    }
}
