//! DDL job entity stored in the job queue.
//!
//! ## Fields
//! - `id`: Unique job identifier allocated by the queue
//! - `job_type`: Kind of schema change (AddIndex, AddColumn)
//! - `schema_id` / `table_id`: Target object
//! - `schema_state`: Stage of the online schema-change protocol
//! - `state`: Lifecycle state of the job itself (Queueing, Running, Done, ...)
//! - `snapshot_ver`: Data version the backfill reads, frozen at first dispatch
//!   (zero means the reorganization has not been initialised yet)
//! - `row_count`: Rows handled so far, reported back to clients
//! - `args`: Type-specific arguments (the index or column being added)
//! - `error` / `error_count`: Last error and consecutive error counter
//!
//! Jobs are never deleted: terminal jobs are moved to the history partition.

use super::element::Element;
use super::ids::{JobId, SchemaId, TableId};
use super::table::{ColumnInfo, IndexInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of schema change a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    AddIndex,
    AddColumn,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::AddIndex => "add index",
            ActionType::AddColumn => "add column",
        }
    }

    /// Whether this job kind rewrites existing rows.
    pub fn needs_reorg(&self) -> bool {
        match self {
            ActionType::AddIndex | ActionType::AddColumn => true,
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage of the online schema-change protocol for the object being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SchemaState {
    None,
    DeleteOnly,
    WriteOnly,
    WriteReorganization,
    DeleteReorganization,
    Public,
}

impl SchemaState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaState::None => "none",
            SchemaState::DeleteOnly => "delete only",
            SchemaState::WriteOnly => "write only",
            SchemaState::WriteReorganization => "write reorganization",
            SchemaState::DeleteReorganization => "delete reorganization",
            SchemaState::Public => "public",
        }
    }
}

impl fmt::Display for SchemaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Queueing,
    Running,
    RollingBack,
    RollbackDone,
    Done,
    Cancelling,
    Cancelled,
    Synced,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queueing => "queueing",
            JobState::Running => "running",
            JobState::RollingBack => "rollingback",
            JobState::RollbackDone => "rollback done",
            JobState::Done => "done",
            JobState::Cancelling => "cancelling",
            JobState::Cancelled => "cancelled",
            JobState::Synced => "synced",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type-specific job arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JobArgs {
    AddIndex { index: IndexInfo },
    AddColumn { column: ColumnInfo },
}

/// One schema-change request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: ActionType,
    pub schema_id: SchemaId,
    pub table_id: TableId,
    pub schema_state: SchemaState,
    pub state: JobState,
    pub snapshot_ver: u64,
    pub row_count: i64,
    pub args: Option<JobArgs>,
    pub error: Option<String>,
    pub error_count: i64,
    pub created_at: i64,            // Unix timestamp in milliseconds
    pub updated_at: i64,            // Unix timestamp in milliseconds
    pub started_at: Option<i64>,    // Unix timestamp in milliseconds
    pub finished_at: Option<i64>,   // Unix timestamp in milliseconds
}

impl Job {
    /// Create a queued job. The queue replaces `id` when the job is enqueued.
    pub fn new(
        id: JobId,
        job_type: ActionType,
        schema_id: SchemaId,
        table_id: TableId,
        args: Option<JobArgs>,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id,
            job_type,
            schema_id,
            table_id,
            schema_state: SchemaState::None,
            state: JobState::Queueing,
            snapshot_ver: 0,
            row_count: 0,
            args,
            error: None,
            error_count: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    /// Set the snapshot version (tests build already-started jobs this way)
    pub fn with_snapshot_ver(mut self, snapshot_ver: u64) -> Self {
        self.snapshot_ver = snapshot_ver;
        self
    }

    /// Elements this job builds, in processing order.
    pub fn elements(&self) -> Vec<Element> {
        match &self.args {
            Some(JobArgs::AddIndex { index }) => vec![Element::index(index.id.as_i64())],
            Some(JobArgs::AddColumn { column }) => vec![Element::column(column.id.as_i64())],
            None => Vec::new(),
        }
    }

    /// Transition Queueing -> Running (sets `started_at` once).
    pub fn start(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        self.state = JobState::Running;
        self.updated_at = now;
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
    }

    /// Move to a terminal (or rollback) state and stamp `finished_at` when terminal.
    pub fn finish(&mut self, state: JobState, schema_state: SchemaState) {
        let now = chrono::Utc::now().timestamp_millis();
        self.state = state;
        self.schema_state = schema_state;
        self.updated_at = now;
        if self.is_finished() {
            self.finished_at = Some(now);
        }
    }

    pub fn set_schema_state(&mut self, schema_state: SchemaState) {
        self.schema_state = schema_state;
        self.updated_at = chrono::Utc::now().timestamp_millis();
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            JobState::Done | JobState::RollbackDone | JobState::Cancelled | JobState::Synced
        )
    }

    pub fn is_cancelling(&self) -> bool {
        self.state == JobState::Cancelling
    }

    pub fn is_rolling_back(&self) -> bool {
        self.state == JobState::RollingBack
    }

    pub fn set_row_count(&mut self, row_count: i64) {
        self.row_count = row_count;
    }

    pub fn row_count(&self) -> i64 {
        self.row_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ids::IndexId;
    use crate::models::SchemaState;

    fn add_index_job() -> Job {
        let index = IndexInfo::new(IndexId::new(333), "idx_c1", vec!["c1".to_string()], false);
        Job::new(
            JobId::new(1),
            ActionType::AddIndex,
            SchemaId::new(1),
            TableId::new(10),
            Some(JobArgs::AddIndex { index }),
        )
    }

    #[test]
    fn test_new_job_is_queued_and_unstarted() {
        let job = add_index_job();
        assert_eq!(job.state, JobState::Queueing);
        assert_eq!(job.schema_state, SchemaState::None);
        assert_eq!(job.snapshot_ver, 0);
        assert!(job.started_at.is_none());
    }

    #[test]
    fn test_job_elements_follow_args() {
        let job = add_index_job();
        assert_eq!(job.elements(), vec![Element::index(333)]);

        let empty = Job::new(
            JobId::new(2),
            ActionType::AddIndex,
            SchemaId::new(1),
            TableId::new(10),
            None,
        );
        assert!(empty.elements().is_empty());
    }

    #[test]
    fn test_finish_stamps_terminal_states_only() {
        let mut job = add_index_job();
        job.start();
        job.finish(JobState::RollingBack, SchemaState::DeleteOnly);
        assert!(job.finished_at.is_none());

        job.finish(JobState::RollbackDone, SchemaState::None);
        assert!(job.is_finished());
        assert!(job.finished_at.is_some());
    }

    #[test]
    fn test_job_json_round_trip_keeps_args() {
        let job = add_index_job().with_snapshot_ver(9);
        let json = serde_json::to_string(&job).unwrap();
        let decoded: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, job);
    }
}
