//! Data reorganization for online schema changes.
//!
//! - [`info`]: resolve where a job's backfill resumes
//! - [`runner`]: run a backfill with a bounded wait, checkpointing progress
//! - [`checkpoint`]: merge in-memory progress into the durable record
//! - [`backfill`]: the per-element work (index entries, column values)

pub mod backfill;
pub mod checkpoint;
pub mod info;
pub mod meta;
pub mod progress;
pub mod runner;

pub use backfill::{BackfillContext, ColumnBackfill, IndexBackfill};
pub use checkpoint::commit_checkpoint;
pub use info::{get_reorg_info, ReorgAdvance, ReorgInfo};
pub use meta::{ReorgMetaStore, ReorgRecord, REORG_PARTITION};
pub use progress::ReorgProgress;
pub use runner::ReorgRunner;
