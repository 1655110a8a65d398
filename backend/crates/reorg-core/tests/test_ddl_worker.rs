//! End-to-end DDL jobs driven through `DdlWorker::run_once`: add index, add
//! column, partitioned tables, concurrent DML, cancellation and rollback.

use reorg_commons::{
    ColumnId, ColumnInfo, Handle, IndexId, IndexInfo, JobId, JobState, NodeId, PhysicalTableId,
    SchemaId, SchemaState, TableId, TableInfo,
};
use reorg_core::reorg::ReorgMetaStore;
use reorg_core::{
    DdlWorker, JobDecision, MockOwnerManager, ReorgRunner, Row, TableData, WorkerSettings,
};
use reorg_store::{EntityStore, InMemoryBackend, StorageBackend};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TABLE: TableId = TableId::new(10);
const PID: PhysicalTableId = PhysicalTableId::new(10);

struct Setup {
    backend: Arc<dyn StorageBackend>,
    owner: Arc<MockOwnerManager>,
    worker: DdlWorker,
    data: TableData,
}

fn setup(batch_size: usize, batch_delay: Duration) -> Setup {
    let backend: Arc<dyn StorageBackend> = Arc::new(InMemoryBackend::new());
    let owner = Arc::new(MockOwnerManager::new(NodeId::new(1)));
    let runner = Arc::new(ReorgRunner::with_timeouts(
        backend.clone(),
        owner.clone(),
        Duration::from_millis(20),
        Duration::from_millis(20),
    ));
    let settings = WorkerSettings {
        poll_interval: Duration::from_millis(10),
        retry_backoff: Duration::from_millis(1),
        max_error_count: 3,
        batch_size,
        batch_delay,
    };
    Setup {
        data: TableData::new(backend.clone()),
        worker: DdlWorker::new(runner, settings),
        backend,
        owner,
    }
}

fn row(c1: &str) -> Row {
    let mut row = Row::new();
    row.insert("c1".to_string(), json!(c1));
    row
}

/// Create `table` and insert `rows_per_partition` rows into each of its
/// physical tables.
fn seed(s: &Setup, table: &TableInfo, rows_per_partition: i64) {
    s.worker.catalog().create_table(table).unwrap();
    for pid in table.physical_ids() {
        for i in 0..rows_per_partition {
            s.data
                .insert_row(table, pid, &Handle::Int(i), &row(&format!("v{}", i)))
                .unwrap();
        }
    }
}

fn plain_table() -> TableInfo {
    TableInfo::new(TABLE, SchemaId::new(1), "t").with_columns(&["c1"])
}

fn index(unique: bool) -> IndexInfo {
    IndexInfo::new(IndexId::new(333), "idx_c1", vec!["c1".into()], unique)
}

/// Tick the worker until `job_id` reaches a terminal state.
async fn drive(worker: &DdlWorker, job_id: JobId) -> JobState {
    for _ in 0..2000 {
        if let JobDecision::Finished { job_id: id, state } = worker.run_once().await.unwrap() {
            assert_eq!(id, job_id);
            return state;
        }
    }
    panic!("job {} did not finish", job_id);
}

#[tokio::test]
async fn test_idle_without_jobs() {
    let s = setup(4, Duration::ZERO);
    assert_eq!(s.worker.run_once().await.unwrap(), JobDecision::Idle);
}

#[tokio::test]
async fn test_add_index_backfills_every_row() {
    let s = setup(3, Duration::ZERO);
    let table = plain_table();
    seed(&s, &table, 10);

    let id = s.worker.submit_add_index(TABLE, index(false)).unwrap();
    assert_eq!(drive(&s.worker, id).await, JobState::Done);

    let job = s.worker.queue().history(id).unwrap().unwrap();
    assert_eq!(job.schema_state, SchemaState::Public);
    assert_eq!(job.row_count, 10);
    assert!(job.snapshot_ver > 0);

    let table = s.worker.catalog().require_table(TABLE).unwrap();
    assert_eq!(
        table.find_index(IndexId::new(333)).map(|i| i.state),
        Some(SchemaState::Public)
    );
    assert_eq!(s.data.index_entries(PID, IndexId::new(333)).unwrap().len(), 10);

    // Checkpoint record is gone with the job
    let meta = ReorgMetaStore::new(s.backend.clone());
    assert!(meta.get(&id).unwrap().is_none());
    assert_eq!(s.worker.run_once().await.unwrap(), JobDecision::Idle);
}

#[tokio::test]
async fn test_schema_states_advance_one_step_per_tick() {
    let s = setup(100, Duration::ZERO);
    seed(&s, &plain_table(), 3);
    let id = s.worker.submit_add_index(TABLE, index(false)).unwrap();

    for expected in [
        SchemaState::DeleteOnly,
        SchemaState::WriteOnly,
        SchemaState::WriteReorganization,
    ] {
        assert_eq!(
            s.worker.run_once().await.unwrap(),
            JobDecision::Advanced {
                job_id: id,
                schema_state: expected
            }
        );
        let table = s.worker.catalog().require_table(TABLE).unwrap();
        assert_eq!(table.find_index(IndexId::new(333)).unwrap().state, expected);
        let job = s.worker.queue().get(id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Running);
        assert_eq!(job.schema_state, expected);
    }
    assert_eq!(drive(&s.worker, id).await, JobState::Done);
}

#[tokio::test]
async fn test_add_column_fills_default_value() {
    let s = setup(4, Duration::ZERO);
    let table = plain_table();
    seed(&s, &table, 10);

    let column = ColumnInfo::new(ColumnId::new(2), "c2", Some(json!(0)));
    let id = s.worker.submit_add_column(TABLE, column).unwrap();
    assert_eq!(drive(&s.worker, id).await, JobState::Done);

    let table = s.worker.catalog().require_table(TABLE).unwrap();
    assert_eq!(
        table.find_column(ColumnId::new(2)).map(|c| c.state),
        Some(SchemaState::Public)
    );
    let rows = s.data.rows(&table, PID).unwrap();
    assert_eq!(rows.len(), 10);
    assert!(rows.iter().all(|(_, row)| row.get("c2") == Some(&json!(0))));
    assert_eq!(s.worker.queue().history(id).unwrap().unwrap().row_count, 10);
}

#[tokio::test]
async fn test_partitioned_table_backfills_each_partition() {
    let s = setup(2, Duration::ZERO);
    let (p1, p2) = (PhysicalTableId::new(101), PhysicalTableId::new(102));
    let table = plain_table().with_partitions(vec![p1, p2]);
    seed(&s, &table, 5);

    let id = s.worker.submit_add_index(TABLE, index(false)).unwrap();
    assert_eq!(drive(&s.worker, id).await, JobState::Done);

    assert_eq!(s.data.index_entries(p1, IndexId::new(333)).unwrap().len(), 5);
    assert_eq!(s.data.index_entries(p2, IndexId::new(333)).unwrap().len(), 5);
    assert_eq!(s.worker.queue().history(id).unwrap().unwrap().row_count, 10);
}

#[tokio::test]
async fn test_rows_written_during_write_only_are_indexed() {
    let s = setup(3, Duration::ZERO);
    seed(&s, &plain_table(), 6);
    let id = s.worker.submit_add_index(TABLE, index(false)).unwrap();

    loop {
        let decision = s.worker.run_once().await.unwrap();
        if decision
            == (JobDecision::Advanced {
                job_id: id,
                schema_state: SchemaState::WriteOnly,
            })
        {
            break;
        }
    }

    // DML sees the write-only index and maintains it
    let table = s.worker.catalog().require_table(TABLE).unwrap();
    s.data
        .insert_row(&table, PID, &Handle::Int(100), &row("late"))
        .unwrap();
    assert_eq!(s.data.index_entries(PID, IndexId::new(333)).unwrap().len(), 1);

    assert_eq!(drive(&s.worker, id).await, JobState::Done);
    assert_eq!(s.data.index_entries(PID, IndexId::new(333)).unwrap().len(), 7);
    assert_eq!(s.worker.queue().history(id).unwrap().unwrap().row_count, 7);
}

#[tokio::test]
async fn test_unique_violation_rolls_back() {
    let s = setup(4, Duration::ZERO);
    let table = plain_table();
    s.worker.catalog().create_table(&table).unwrap();
    for (i, value) in ["a", "b", "dup", "c", "dup"].iter().enumerate() {
        s.data
            .insert_row(&table, PID, &Handle::Int(i as i64), &row(value))
            .unwrap();
    }

    let id = s.worker.submit_add_index(TABLE, index(true)).unwrap();
    assert_eq!(drive(&s.worker, id).await, JobState::RollbackDone);

    let job = s.worker.queue().history(id).unwrap().unwrap();
    assert!(job.error.is_some());
    let table = s.worker.catalog().require_table(TABLE).unwrap();
    assert!(table.find_index(IndexId::new(333)).is_none());
    assert!(s.data.index_entries(PID, IndexId::new(333)).unwrap().is_empty());
    assert!(ReorgMetaStore::new(s.backend.clone()).get(&id).unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_during_backfill_rolls_back() {
    let s = setup(1, Duration::from_millis(30));
    seed(&s, &plain_table(), 20);
    let id = s.worker.submit_add_index(TABLE, index(false)).unwrap();

    // Run until the backfill is in flight and the first wait timed out
    loop {
        if let JobDecision::Retry { job_id, .. } = s.worker.run_once().await.unwrap() {
            assert_eq!(job_id, id);
            break;
        }
    }
    assert!(s.worker.runner().is_in_flight(id));
    assert!(s.worker.queue().get(id).unwrap().unwrap().row_count < 20);

    s.worker.cancel_job(id).unwrap();
    assert_eq!(
        s.worker.run_once().await.unwrap(),
        JobDecision::Finished {
            job_id: id,
            state: JobState::RollbackDone
        }
    );

    assert!(!s.worker.runner().is_in_flight(id));
    let table = s.worker.catalog().require_table(TABLE).unwrap();
    assert!(table.find_index(IndexId::new(333)).is_none());
    assert!(s.data.index_entries(PID, IndexId::new(333)).unwrap().is_empty());
    let job = s.worker.queue().history(id).unwrap().unwrap();
    assert_eq!(job.schema_state, SchemaState::None);
}

#[tokio::test]
async fn test_cancelled_add_column_drops_values() {
    let s = setup(100, Duration::ZERO);
    let table = plain_table();
    seed(&s, &table, 4);
    let column = ColumnInfo::new(ColumnId::new(2), "c2", Some(json!("x")));
    let id = s.worker.submit_add_column(TABLE, column).unwrap();

    // DeleteOnly, WriteOnly, WriteReorganization, then one full backfill pass
    // that finishes the job unless it is cancelled first.
    for _ in 0..3 {
        s.worker.run_once().await.unwrap();
    }
    s.worker.cancel_job(id).unwrap();
    assert_eq!(drive(&s.worker, id).await, JobState::RollbackDone);

    let table = s.worker.catalog().require_table(TABLE).unwrap();
    assert!(table.find_column(ColumnId::new(2)).is_none());
    let rows = s.data.rows(&table, PID).unwrap();
    assert!(rows.iter().all(|(_, row)| !row.contains_key("c2")));
}

#[tokio::test]
async fn test_duplicate_index_name_rolls_back() {
    let s = setup(4, Duration::ZERO);
    let mut table = plain_table();
    let mut existing = IndexInfo::new(IndexId::new(1), "idx_c1", vec!["c1".into()], false);
    existing.state = SchemaState::Public;
    table.indexes.push(existing);
    seed(&s, &table, 2);

    let id = s.worker.submit_add_index(TABLE, index(false)).unwrap();
    assert_eq!(drive(&s.worker, id).await, JobState::RollbackDone);

    let table = s.worker.catalog().require_table(TABLE).unwrap();
    assert_eq!(table.indexes.len(), 1);
    assert_eq!(table.indexes[0].id, IndexId::new(1));
}

#[tokio::test]
async fn test_not_owner_leaves_jobs_queued() {
    let s = setup(4, Duration::ZERO);
    seed(&s, &plain_table(), 2);
    let id = s.worker.submit_add_index(TABLE, index(false)).unwrap();

    s.owner.revoke();
    assert_eq!(s.worker.run_once().await.unwrap(), JobDecision::OwnerLost);
    let job = s.worker.queue().get(id).unwrap().unwrap();
    assert_eq!(job.state, JobState::Queueing);
}
