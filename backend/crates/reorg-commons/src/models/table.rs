//! Table, column and index metadata.

use super::element::{Element, ElementType};
use super::ids::{ColumnId, IndexId, PhysicalTableId, SchemaId, TableId};
use super::job::SchemaState;
use crate::codec::{self, Key};
use serde::{Deserialize, Serialize};

/// A column definition. `default_value` is what the backfill writes into rows
/// that predate the column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub id: ColumnId,
    pub name: String,
    pub state: SchemaState,
    #[serde(default)]
    pub default_value: Option<serde_json::Value>,
}

impl ColumnInfo {
    pub fn new(id: ColumnId, name: impl Into<String>, default_value: Option<serde_json::Value>) -> Self {
        Self {
            id,
            name: name.into(),
            state: SchemaState::None,
            default_value,
        }
    }
}

/// A secondary index definition over one or more columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub id: IndexId,
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub state: SchemaState,
}

impl IndexInfo {
    pub fn new(id: IndexId, name: impl Into<String>, columns: Vec<String>, unique: bool) -> Self {
        Self {
            id,
            name: name.into(),
            columns,
            unique,
            state: SchemaState::None,
        }
    }
}

/// Table definition as kept in the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: TableId,
    pub schema_id: SchemaId,
    pub name: String,
    /// Rows are keyed by a clustered primary key instead of an integer row id.
    #[serde(default)]
    pub is_common_handle: bool,
    #[serde(default)]
    pub common_handle_version: u16,
    pub columns: Vec<ColumnInfo>,
    pub indexes: Vec<IndexInfo>,
    /// Partition ids in scan order; empty for a non-partitioned table.
    #[serde(default)]
    pub partitions: Vec<PhysicalTableId>,
}

impl TableInfo {
    pub fn new(id: TableId, schema_id: SchemaId, name: impl Into<String>) -> Self {
        Self {
            id,
            schema_id,
            name: name.into(),
            is_common_handle: false,
            common_handle_version: 0,
            columns: Vec::new(),
            indexes: Vec::new(),
            partitions: Vec::new(),
        }
    }

    pub fn with_columns(mut self, names: &[&str]) -> Self {
        for (i, name) in names.iter().enumerate() {
            let mut col = ColumnInfo::new(ColumnId::new(i as i64 + 1), *name, None);
            col.state = SchemaState::Public;
            self.columns.push(col);
        }
        self
    }

    pub fn with_partitions(mut self, partitions: Vec<PhysicalTableId>) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn is_partitioned(&self) -> bool {
        !self.partitions.is_empty()
    }

    /// Physical tables to scan, in order.
    pub fn physical_ids(&self) -> Vec<PhysicalTableId> {
        if self.partitions.is_empty() {
            vec![self.id.into()]
        } else {
            self.partitions.clone()
        }
    }

    /// Physical table that follows `current` in scan order, if any.
    pub fn next_physical_id(&self, current: PhysicalTableId) -> Option<PhysicalTableId> {
        let ids = self.physical_ids();
        let pos = ids.iter().position(|id| *id == current)?;
        ids.get(pos + 1).copied()
    }

    /// Key range `[start, end)` covering every record of one physical table.
    pub fn record_range(&self, physical_id: PhysicalTableId) -> (Key, Key) {
        let prefix = codec::record_prefix(physical_id);
        let end = prefix.prefix_next();
        (prefix, end)
    }

    pub fn find_index(&self, id: IndexId) -> Option<&IndexInfo> {
        self.indexes.iter().find(|idx| idx.id == id)
    }

    pub fn find_index_mut(&mut self, id: IndexId) -> Option<&mut IndexInfo> {
        self.indexes.iter_mut().find(|idx| idx.id == id)
    }

    pub fn find_column(&self, id: ColumnId) -> Option<&ColumnInfo> {
        self.columns.iter().find(|col| col.id == id)
    }

    pub fn find_column_mut(&mut self, id: ColumnId) -> Option<&mut ColumnInfo> {
        self.columns.iter_mut().find(|col| col.id == id)
    }

    pub fn find_column_by_name(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|col| col.name.eq_ignore_ascii_case(name))
    }

    /// Whether the schema object behind `element` is present in this table.
    pub fn has_element(&self, element: &Element) -> bool {
        self.element_state(element).is_some()
    }

    /// Schema state of the object behind `element`, if present.
    pub fn element_state(&self, element: &Element) -> Option<SchemaState> {
        match element.element_type {
            ElementType::Index => self.find_index(IndexId::new(element.id)).map(|i| i.state),
            ElementType::Column => self.find_column(ColumnId::new(element.id)).map(|c| c.state),
        }
    }
}
