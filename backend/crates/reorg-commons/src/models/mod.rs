//! DDL job, element and table metadata models.

pub mod element;
pub mod ids;
pub mod job;
pub mod table;

pub use element::{Element, ElementType};
pub use ids::{ColumnId, IndexId, JobId, NodeId, PhysicalTableId, SchemaId, TableId};
pub use job::{ActionType, Job, JobArgs, JobState, SchemaState};
pub use table::{ColumnInfo, IndexInfo, TableInfo};
