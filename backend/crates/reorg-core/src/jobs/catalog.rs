//! Table metadata catalog.

use crate::error::{ReorgError, Result};
use reorg_commons::{TableId, TableInfo};
use reorg_store::{EntityStore, StorageBackend, Transaction};
use std::sync::Arc;

pub const TABLES_PARTITION: &str = "ddl_tables";

pub struct TableCatalog {
    backend: Arc<dyn StorageBackend>,
}

impl TableCatalog {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub fn create_table(&self, table: &TableInfo) -> Result<()> {
        if self.get(&table.id)?.is_some() {
            return Err(ReorgError::InvalidDdlJob(format!(
                "table {} already exists",
                table.id
            )));
        }
        self.put(&table.id, table)?;
        log::debug!("Created table {} ({})", table.name, table.id);
        Ok(())
    }

    pub fn get_table(&self, id: TableId) -> Result<Option<TableInfo>> {
        Ok(self.get(&id)?)
    }

    pub fn require_table(&self, id: TableId) -> Result<TableInfo> {
        self.get_table(id)?.ok_or(ReorgError::TableNotFound(id))
    }

    pub fn get_table_in(&self, txn: &mut Transaction, id: TableId) -> Result<Option<TableInfo>> {
        Ok(self.get_in(txn, &id)?)
    }

    pub fn require_table_in(&self, txn: &mut Transaction, id: TableId) -> Result<TableInfo> {
        self.get_in(txn, &id)?.ok_or(ReorgError::TableNotFound(id))
    }

    pub fn update_table_in(&self, txn: &mut Transaction, table: &TableInfo) -> Result<()> {
        self.put_in(txn, &table.id, table)?;
        Ok(())
    }
}

impl EntityStore<TableId, TableInfo> for TableCatalog {
    fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn partition(&self) -> &str {
        TABLES_PARTITION
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reorg_commons::SchemaId;
    use reorg_store::InMemoryBackend;

    #[test]
    fn test_create_and_require_table() {
        let catalog = TableCatalog::new(Arc::new(InMemoryBackend::new()));
        let table = TableInfo::new(TableId::new(10), SchemaId::new(1), "t").with_columns(&["c1"]);
        catalog.create_table(&table).unwrap();
        assert_eq!(catalog.require_table(TableId::new(10)).unwrap(), table);
        assert!(catalog.create_table(&table).is_err());
        assert!(matches!(
            catalog.require_table(TableId::new(11)),
            Err(ReorgError::TableNotFound(_))
        ));
    }
}
