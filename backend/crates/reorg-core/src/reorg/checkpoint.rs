//! Checkpoint commit.
//!
//! Merges the progress reported since the last checkpoint into the durable
//! state, in a transaction of its own so a failing backfill can never roll it
//! back:
//!
//! - the pending row count is added to the job's cumulative row count
//! - the start key moves to the last reported key, if that key is ahead
//! - the (element, start, end, physical table) record is rewritten
//!
//! Calling it again with nothing new pending rewrites the same values. A
//! failed commit is not retried here: the pending row count is handed back to
//! the tracker and `info` is left as it was.

use super::info::ReorgInfo;
use super::meta::{ReorgMetaStore, ReorgRecord};
use super::progress::ReorgProgress;
use crate::error::{ReorgError, Result};
use crate::jobs::queue::JobStore;
use reorg_store::{run_in_new_txn, EntityStore, StorageBackend};
use std::sync::Arc;

pub fn commit_checkpoint(
    backend: &Arc<dyn StorageBackend>,
    info: &mut ReorgInfo,
    progress: &ReorgProgress,
) -> Result<()> {
    let (rows, next_key) = progress.take_row_count_and_key();
    let start_key = match next_key {
        Some(key) if key > info.start_key => std::cmp::min(key, info.end_key.clone()),
        _ => info.start_key.clone(),
    };
    let row_count = info.job.row_count + rows;

    let meta = ReorgMetaStore::new(backend.clone());
    let jobs = JobStore::pending(backend.clone());
    let job_id = info.job.id;
    let record = ReorgRecord {
        element: info.current_element,
        start_key: start_key.clone(),
        end_key: info.end_key.clone(),
        physical_table_id: info.physical_table_id,
        row_count,
        snapshot_ver: info.job.snapshot_ver,
    };

    let committed = run_in_new_txn(backend, false, |txn| {
        if rows != 0 {
            if let Some(mut stored) = jobs.get_in(txn, &job_id)? {
                stored.row_count += rows;
                jobs.put_in(txn, &job_id, &stored)?;
            }
        }
        meta.put_in(txn, &job_id, &record)?;
        Ok::<_, ReorgError>(())
    });

    if let Err(err) = committed {
        progress.restore_rows(rows);
        log::warn!(
            "[{}] Checkpoint commit failed, {} rows stay pending: {}",
            job_id,
            rows,
            err
        );
        return Err(err);
    }

    if start_key != info.start_key || rows != 0 {
        log::info!(
            "[{}] Checkpoint committed: element={}, start={} -> {}, rows +{} (total {})",
            job_id,
            info.current_element,
            info.start_key,
            start_key,
            rows,
            row_count
        );
    }
    info.job.row_count = row_count;
    info.start_key = start_key;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reorg::info::get_reorg_info;
    use reorg_commons::{ActionType, Element, Job, JobId, Key, SchemaId, TableId, TableInfo};
    use reorg_store::InMemoryBackend;

    struct Fixture {
        mem: Arc<InMemoryBackend>,
        backend: Arc<dyn StorageBackend>,
        info: ReorgInfo,
    }

    fn fixture() -> Fixture {
        let mem = Arc::new(InMemoryBackend::new());
        let backend: Arc<dyn StorageBackend> = mem.clone();
        let mut job = Job::new(
            JobId::new(1),
            ActionType::AddIndex,
            SchemaId::new(1),
            TableId::new(10),
            None,
        );
        let table = TableInfo::new(TableId::new(10), SchemaId::new(1), "t");
        let info = get_reorg_info(&backend, &mut job, &table, &[Element::index(333)]).unwrap();
        Fixture { mem, backend, info }
    }

    fn key_after(info: &ReorgInfo, suffix: u8) -> Key {
        let mut bytes = info.start_key.clone().into_vec();
        bytes.push(suffix);
        Key::new(bytes)
    }

    #[test]
    fn test_commit_merges_rows_and_advances_start() {
        let Fixture { backend, mut info, .. } = fixture();
        let progress = ReorgProgress::new();
        let key = key_after(&info, 5);
        progress.report_batch(10, key.clone());

        commit_checkpoint(&backend, &mut info, &progress).unwrap();
        assert_eq!(info.job.row_count, 10);
        assert_eq!(info.start_key, key);
        assert_eq!(progress.row_count(), 0);

        let stored = ReorgMetaStore::new(backend).get(&info.job.id).unwrap().unwrap();
        assert_eq!(stored.start_key, key);
        assert_eq!(stored.row_count, 10);
    }

    #[test]
    fn test_repeated_commit_is_a_no_op() {
        let Fixture { backend, mut info, .. } = fixture();
        let progress = ReorgProgress::new();
        progress.report_batch(3, key_after(&info, 1));
        commit_checkpoint(&backend, &mut info, &progress).unwrap();
        let after_first = info.clone();

        commit_checkpoint(&backend, &mut info, &progress).unwrap();
        assert_eq!(info, after_first);
    }

    #[test]
    fn test_start_key_never_moves_backwards() {
        let Fixture { backend, mut info, .. } = fixture();
        let progress = ReorgProgress::new();
        let ahead = key_after(&info, 9);
        progress.report_batch(0, ahead.clone());
        commit_checkpoint(&backend, &mut info, &progress).unwrap();

        progress.report_batch(0, Key::new(vec![0]));
        commit_checkpoint(&backend, &mut info, &progress).unwrap();
        assert_eq!(info.start_key, ahead);
    }

    #[test]
    fn test_failed_commit_keeps_pending_rows() {
        let Fixture { mem, backend, mut info } = fixture();
        let before = info.clone();
        let progress = ReorgProgress::new();
        progress.report_batch(7, key_after(&info, 2));

        mem.fail_next_commits(1);
        assert!(commit_checkpoint(&backend, &mut info, &progress).is_err());
        assert_eq!(info, before);
        assert_eq!(progress.row_count(), 7);

        commit_checkpoint(&backend, &mut info, &progress).unwrap();
        assert_eq!(info.job.row_count, 7);
    }

    #[test]
    fn test_resumed_owner_starts_after_every_counted_row() {
        let Fixture { backend, mut info, .. } = fixture();
        let table = TableInfo::new(TableId::new(10), SchemaId::new(1), "t");
        let progress = ReorgProgress::new();
        let first_batch = key_after(&info, 3);
        progress.report_batch(10, first_batch.clone());
        commit_checkpoint(&backend, &mut info, &progress).unwrap();

        // A new owner resolves the checkpoint and redoes nothing already
        // counted: the committed rows and start key moved together.
        let mut job = info.job.clone();
        let mut resumed = get_reorg_info(&backend, &mut job, &table, &[Element::index(333)]).unwrap();
        assert_eq!(resumed.start_key, first_batch);

        let next = ReorgProgress::new();
        next.report_batch(5, key_after(&info, 7));
        commit_checkpoint(&backend, &mut resumed, &next).unwrap();
        let record = ReorgMetaStore::new(backend).get(&info.job.id).unwrap().unwrap();
        assert_eq!(record.row_count, 15);
        assert_eq!(record.start_key, key_after(&info, 7));
    }
}
