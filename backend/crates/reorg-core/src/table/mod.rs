//! Row and index data of user tables.
//!
//! Rows are JSON objects stored under record keys; index entries live in the
//! same partition under index keys:
//!
//! - non-unique index: `t{pid}_i{index_id}{values}{handle}` → empty value
//! - unique index: `t{pid}_i{index_id}{values}` → encoded handle
//!
//! Record keys sort after every index key of the same physical table, so a
//! record range scan never sees index entries.

pub(crate) mod data;

pub use data::{index_entry, index_values, TableData, TABLE_DATA_PARTITION};

/// One row: column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;
