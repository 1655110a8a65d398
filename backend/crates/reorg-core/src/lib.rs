//! # reorg-core
//!
//! Online schema-change (DDL) reorganization engine.
//!
//! ## Architecture
//!
//! ```text
//! DdlWorker (job loop, schema-state machine, rollback)
//!     ↓
//! ReorgRunner::run_reorg_job (bounded wait, in-flight backfills)
//!     ↓                        ↓
//! checkpoint commit       IndexBackfill / ColumnBackfill
//!     ↓                        ↓
//! reorg-store (transactions over the shared store)
//! ```
//!
//! The checkpoint record in the shared store is the only thing carried from
//! one dispatch to the next, and from one DDL owner to the next.

pub mod error;
pub mod jobs;
pub mod owner;
pub mod reorg;
pub mod table;

pub use error::{ReorgError, Result};
pub use jobs::{DdlWorker, JobDecision, JobQueue, TableCatalog, WorkerSettings};
pub use owner::{
    FailoverHandler, LeaseOwnerManager, MockOwnerManager, OwnerGuard, OwnerManager,
    OwnershipStatus, RecoveryReport, ResumePoint,
};
pub use reorg::{
    commit_checkpoint, get_reorg_info, BackfillContext, ColumnBackfill, IndexBackfill,
    ReorgAdvance, ReorgInfo, ReorgProgress, ReorgRecord, ReorgRunner,
};
pub use table::{Row, TableData};
