//! Store-backed DDL job queue.
//!
//! Pending jobs live in `ddl_jobs` keyed by [`JobId`]; ids come from a counter
//! in `ddl_meta`, so key order is submission order and the first key is the
//! next job to run. Terminal jobs are moved to `ddl_job_history`, never
//! deleted.

use crate::error::{ReorgError, Result};
use crate::reorg::meta::ReorgMetaStore;
use reorg_commons::codec::{decode_int, encode_int};
use reorg_commons::{Job, JobId, JobState};
use reorg_store::{run_in_new_txn, EntityStore, Partition, StorageBackend, Transaction};
use std::sync::Arc;

pub const JOBS_PARTITION: &str = "ddl_jobs";
pub const JOB_HISTORY_PARTITION: &str = "ddl_job_history";
pub const META_PARTITION: &str = "ddl_meta";

const NEXT_JOB_ID_KEY: &[u8] = b"next_job_id";

pub struct JobStore {
    backend: Arc<dyn StorageBackend>,
    partition: &'static str,
}

impl JobStore {
    pub fn pending(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            partition: JOBS_PARTITION,
        }
    }

    pub fn history(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            partition: JOB_HISTORY_PARTITION,
        }
    }
}

impl EntityStore<JobId, Job> for JobStore {
    fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    fn partition(&self) -> &str {
        self.partition
    }
}

pub struct JobQueue {
    backend: Arc<dyn StorageBackend>,
    jobs: JobStore,
    history: JobStore,
}

impl JobQueue {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            jobs: JobStore::pending(backend.clone()),
            history: JobStore::history(backend.clone()),
            backend,
        }
    }

    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Allocate an id for `job` and queue it.
    pub fn enqueue(&self, mut job: Job) -> Result<JobId> {
        let meta = Partition::new(META_PARTITION);
        let id = run_in_new_txn(&self.backend, true, |txn| {
            let next = match txn.get(&meta, NEXT_JOB_ID_KEY)? {
                Some(bytes) => decode_int(&bytes).map(|(v, _)| v).ok_or_else(|| {
                    ReorgError::Serialization("corrupted job id counter".to_string())
                })?,
                None => 1,
            };
            txn.put(&meta, NEXT_JOB_ID_KEY, encode_int(next + 1).to_vec());
            job.id = JobId::new(next);
            job.state = JobState::Queueing;
            self.jobs.put_in(txn, &job.id, &job)?;
            Ok::<_, ReorgError>(job.id)
        })?;
        log::info!("[{}] Queued {} job on table {}", id, job.job_type, job.table_id);
        Ok(id)
    }

    /// Oldest pending job.
    pub fn first(&self) -> Result<Option<Job>> {
        Ok(self.jobs.first()?.map(|(_, job)| job))
    }

    pub fn get(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.jobs.get(&id)?)
    }

    pub fn list(&self) -> Result<Vec<Job>> {
        Ok(self.jobs.scan_all()?.into_iter().map(|(_, job)| job).collect())
    }

    /// Persist `job`, keeping a pending cancel request.
    pub fn update(&self, job: &Job) -> Result<()> {
        run_in_new_txn(&self.backend, true, |txn| self.update_in(txn, job))
    }

    /// Transactional variant of [`JobQueue::update`].
    pub fn update_in(&self, txn: &mut Transaction, job: &Job) -> Result<()> {
        let stored = self
            .jobs
            .get_in(txn, &job.id)?
            .ok_or(ReorgError::JobNotFound(job.id))?;
        let mut job = job.clone();
        if stored.is_cancelling()
            && !job.is_finished()
            && !job.is_rolling_back()
            && job.state != JobState::Cancelling
        {
            job.state = JobState::Cancelling;
        }
        job.updated_at = chrono::Utc::now().timestamp_millis();
        self.jobs.put_in(txn, &job.id, &job)?;
        Ok(())
    }

    /// Request cancellation. The owner's job loop rolls the job back.
    pub fn cancel(&self, id: JobId) -> Result<()> {
        run_in_new_txn(&self.backend, true, |txn| {
            let mut job = self
                .jobs
                .get_in(txn, &id)?
                .ok_or(ReorgError::JobNotFound(id))?;
            if job.is_finished() || job.is_rolling_back() {
                return Err(ReorgError::InvalidDdlJob(format!(
                    "{} cannot be cancelled in state {}",
                    id, job.state
                )));
            }
            job.state = JobState::Cancelling;
            self.jobs.put_in(txn, &id, &job)?;
            Ok(())
        })?;
        log::info!("[{}] Cancellation requested", id);
        Ok(())
    }

    /// Move a terminal job to history and drop its checkpoint record.
    pub fn finish(&self, job: &Job) -> Result<()> {
        run_in_new_txn(&self.backend, true, |txn| self.finish_in(txn, job))?;
        log::info!(
            "[{}] Job archived: state={}, rows={}",
            job.id,
            job.state,
            job.row_count
        );
        Ok(())
    }

    /// Transactional variant of [`JobQueue::finish`].
    pub fn finish_in(&self, txn: &mut Transaction, job: &Job) -> Result<()> {
        ReorgMetaStore::new(self.backend.clone()).delete_in(txn, &job.id);
        self.jobs.delete_in(txn, &job.id);
        self.history.put_in(txn, &job.id, job)?;
        Ok(())
    }

    pub fn history(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.history.get(&id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reorg_commons::{ActionType, SchemaId, TableId};
    use reorg_store::InMemoryBackend;

    fn queue() -> JobQueue {
        JobQueue::new(Arc::new(InMemoryBackend::new()))
    }

    fn job() -> Job {
        Job::new(
            JobId::new(0),
            ActionType::AddIndex,
            SchemaId::new(1),
            TableId::new(10),
            None,
        )
    }

    #[test]
    fn test_enqueue_allocates_increasing_ids() {
        let queue = queue();
        let a = queue.enqueue(job()).unwrap();
        let b = queue.enqueue(job()).unwrap();
        assert!(a < b);
        assert_eq!(queue.first().unwrap().map(|j| j.id), Some(a));
        assert_eq!(queue.list().unwrap().len(), 2);
    }

    #[test]
    fn test_finish_moves_job_to_history() {
        let queue = queue();
        let id = queue.enqueue(job()).unwrap();
        let mut j = queue.get(id).unwrap().unwrap();
        j.finish(JobState::Done, reorg_commons::SchemaState::Public);
        queue.finish(&j).unwrap();

        assert!(queue.get(id).unwrap().is_none());
        assert_eq!(queue.history(id).unwrap().map(|j| j.state), Some(JobState::Done));
        assert!(queue.first().unwrap().is_none());
    }

    #[test]
    fn test_cancel_request_survives_concurrent_update() {
        let queue = queue();
        let id = queue.enqueue(job()).unwrap();
        let mut running = queue.get(id).unwrap().unwrap();
        running.start();

        queue.cancel(id).unwrap();
        queue.update(&running).unwrap();
        assert_eq!(queue.get(id).unwrap().unwrap().state, JobState::Cancelling);
    }

    #[test]
    fn test_cancel_unknown_or_finished_job_fails() {
        let queue = queue();
        assert!(matches!(
            queue.cancel(JobId::new(99)),
            Err(ReorgError::JobNotFound(_))
        ));

        let id = queue.enqueue(job()).unwrap();
        let mut j = queue.get(id).unwrap().unwrap();
        j.finish(JobState::Done, reorg_commons::SchemaState::Public);
        queue.update(&j).unwrap();
        assert!(matches!(queue.cancel(id), Err(ReorgError::InvalidDdlJob(_))));
    }
}
