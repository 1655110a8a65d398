//! DDL jobs: the store-backed queue, the table catalog and the job loop.

pub mod catalog;
pub mod queue;
pub mod worker;

pub use catalog::{TableCatalog, TABLES_PARTITION};
pub use queue::{JobQueue, JobStore, JOBS_PARTITION, JOB_HISTORY_PARTITION};
pub use worker::{DdlWorker, JobDecision, WorkerSettings};
