//! Strongly typed identifiers.

mod job_id;
mod node_id;
mod object_id;

pub use job_id::JobId;
pub use node_id::NodeId;
pub use object_id::{ColumnId, IndexId, PhysicalTableId, SchemaId, TableId};
