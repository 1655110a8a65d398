//! # reorg-commons
//!
//! Types shared by every ReorgDB crate:
//!
//! - **Identifiers**: `JobId`, `NodeId`, `SchemaId`, `TableId`, `PhysicalTableId`,
//!   `IndexId`, `ColumnId`
//! - **DDL models**: `Job`, `Element`, `TableInfo` and the schema/job state enums
//! - **Key codec**: order-preserving record and index keys (`codec`)
//! - **StorageKey**: the contract typed stores use to turn keys into bytes
//!
//! This crate has no storage or runtime dependencies so it can be shared by the
//! store, the reorg engine and any tooling that inspects checkpoint records.

pub mod codec;
pub mod models;
pub mod storage_key;

pub use codec::{Handle, Key};
pub use models::{
    ActionType, ColumnId, ColumnInfo, Element, ElementType, IndexId, IndexInfo, Job, JobArgs,
    JobId, JobState, NodeId, PhysicalTableId, SchemaId, SchemaState, TableId, TableInfo,
};
pub use storage_key::StorageKey;
