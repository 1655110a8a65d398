//! DDL job loop.
//!
//! Runs on every node, but only processes jobs while this node is the DDL
//! owner. Each tick handles the oldest queued job by one step:
//!
//! ```text
//! None → DeleteOnly → WriteOnly → WriteReorganization → Public (Done)
//!                                        │
//!                                        └─ backfill, one bounded dispatch per tick
//! ```
//!
//! A failed or cancelled job is rolled back: the half-built index or column is
//! made delete-only, its data is removed, and the job ends `RollbackDone`.

use super::catalog::TableCatalog;
use super::queue::JobQueue;
use crate::error::{ReorgError, Result};
use crate::owner::{FailoverHandler, OwnerGuard, OwnerManager, OwnershipStatus};
use crate::reorg::backfill::{BackfillContext, ColumnBackfill, IndexBackfill};
use crate::reorg::info::{get_reorg_info, ReorgAdvance, ReorgInfo};
use crate::reorg::runner::ReorgRunner;
use crate::table::TableData;
use reorg_commons::{
    ActionType, ColumnId, ColumnInfo, IndexId, IndexInfo, Job, JobArgs, JobId, JobState,
    SchemaState, TableId, TableInfo,
};
use reorg_configs::ServerConfig;
use reorg_store::{run_in_new_txn, StorageBackend};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Job loop tuning, usually taken from [`ServerConfig`].
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub max_error_count: i64,
    pub batch_size: usize,
    pub batch_delay: Duration,
}

impl WorkerSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.jobs.poll_interval_ms),
            retry_backoff: Duration::from_millis(config.jobs.retry_backoff_ms),
            max_error_count: config.jobs.max_error_count,
            batch_size: config.reorg.batch_size,
            batch_delay: config.reorg.batch_delay(),
        }
    }
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// What one tick of the job loop did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDecision {
    /// No queued job
    Idle,
    /// The job moved one step forward
    Advanced {
        job_id: JobId,
        schema_state: SchemaState,
    },
    /// Backfill still running; re-dispatch after the backoff
    Retry { job_id: JobId, backoff_ms: u64 },
    /// This node is not (or no longer) the owner
    OwnerLost,
    /// The job reached a terminal state and was archived
    Finished { job_id: JobId, state: JobState },
}

/// Backfill for the element being processed.
enum BackfillUnit {
    Index(IndexBackfill),
    Column(ColumnBackfill),
}

impl BackfillUnit {
    async fn run(self, ctx: BackfillContext) -> Result<()> {
        match self {
            BackfillUnit::Index(unit) => unit.run(ctx).await,
            BackfillUnit::Column(unit) => unit.run(ctx).await,
        }
    }
}

pub struct DdlWorker {
    backend: Arc<dyn StorageBackend>,
    queue: Arc<JobQueue>,
    catalog: TableCatalog,
    data: TableData,
    runner: Arc<ReorgRunner>,
    owner: Arc<dyn OwnerManager>,
    guard: OwnerGuard,
    failover: FailoverHandler,
    settings: WorkerSettings,
    shutdown: CancellationToken,
}

impl DdlWorker {
    pub fn new(runner: Arc<ReorgRunner>, settings: WorkerSettings) -> Self {
        let backend = runner.backend().clone();
        let owner = runner.owner().clone();
        let queue = Arc::new(JobQueue::new(backend.clone()));
        Self {
            catalog: TableCatalog::new(backend.clone()),
            data: TableData::new(backend.clone()),
            guard: OwnerGuard::new(owner.clone()),
            failover: FailoverHandler::new(queue.clone(), backend.clone(), owner.node_id()),
            backend,
            queue,
            runner,
            owner,
            settings,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn from_config(
        backend: Arc<dyn StorageBackend>,
        owner: Arc<dyn OwnerManager>,
        config: &ServerConfig,
    ) -> Self {
        let runner = Arc::new(ReorgRunner::new(backend, owner, &config.reorg));
        Self::new(runner, WorkerSettings::from_config(config))
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn catalog(&self) -> &TableCatalog {
        &self.catalog
    }

    pub fn runner(&self) -> &Arc<ReorgRunner> {
        &self.runner
    }

    /// Queue an `ADD INDEX` on `table_id`.
    pub fn submit_add_index(&self, table_id: TableId, index: IndexInfo) -> Result<JobId> {
        let table = self.catalog.require_table(table_id)?;
        let job = Job::new(
            JobId::new(0),
            ActionType::AddIndex,
            table.schema_id,
            table_id,
            Some(JobArgs::AddIndex { index }),
        );
        self.queue.enqueue(job)
    }

    /// Queue an `ADD COLUMN` on `table_id`.
    pub fn submit_add_column(&self, table_id: TableId, column: ColumnInfo) -> Result<JobId> {
        let table = self.catalog.require_table(table_id)?;
        let job = Job::new(
            JobId::new(0),
            ActionType::AddColumn,
            table.schema_id,
            table_id,
            Some(JobArgs::AddColumn { column }),
        );
        self.queue.enqueue(job)
    }

    pub fn cancel_job(&self, job_id: JobId) -> Result<()> {
        self.queue.cancel(job_id)
    }

    /// Stop the loop and every in-flight wait and backfill.
    pub fn shutdown(&self) {
        log::info!("Shutdown requested for DDL worker on node {}", self.owner.node_id());
        self.shutdown.cancel();
        self.runner.shutdown();
    }

    /// Run the job loop until [`DdlWorker::shutdown`].
    pub async fn run_loop(&self) -> Result<()> {
        log::info!(
            "Starting DDL job loop on node {} (poll {}ms)",
            self.owner.node_id(),
            self.settings.poll_interval.as_millis()
        );
        let mut was_owner = false;

        loop {
            if self.shutdown.is_cancelled() {
                log::info!("Shutdown signal received, stopping DDL job loop");
                break;
            }

            let is_owner = if self.owner.is_owner() {
                true
            } else {
                match self.owner.campaign().await {
                    Ok(won) => won,
                    Err(err) => {
                        log::warn!("Owner campaign failed: {}", err);
                        false
                    }
                }
            };

            if is_owner && !was_owner {
                log::info!("[JobLoop] Node {} became DDL owner - handling failover", self.owner.node_id());
                match self.failover.on_become_owner() {
                    Ok(report) if !report.is_empty() => log::info!(
                        "[JobLoop] Taking over {} job(s): {} resumed, {} not started, {} inconsistent",
                        report.total(),
                        report.resumed.len(),
                        report.not_started.len(),
                        report.inconsistent.len()
                    ),
                    Ok(_) => {}
                    Err(err) => log::warn!("[JobLoop] Failover scan failed: {}", err),
                }
            } else if !is_owner && was_owner {
                log::info!("[JobLoop] Node {} lost DDL ownership", self.owner.node_id());
            }
            was_owner = is_owner;

            let delay = if is_owner {
                match self.run_once().await {
                    Ok(JobDecision::Idle) | Ok(JobDecision::OwnerLost) => self.settings.poll_interval,
                    Ok(JobDecision::Retry { backoff_ms, .. }) => Duration::from_millis(backoff_ms),
                    Ok(_) => Duration::ZERO,
                    Err(err) => {
                        log::error!("DDL job loop tick failed: {}", err);
                        self.settings.poll_interval
                    }
                }
            } else {
                self.settings.poll_interval
            };

            if delay.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {}
                _ = sleep(delay) => {}
            }
        }

        Ok(())
    }

    /// Process the oldest queued job by one step.
    pub async fn run_once(&self) -> Result<JobDecision> {
        if let OwnershipStatus::NotOwner { owner } = self.guard.check_ownership() {
            log::debug!("Not DDL owner (owner: {:?}), skipping job dispatch", owner);
            return Ok(JobDecision::OwnerLost);
        }
        let Some(mut job) = self.queue.first()? else {
            return Ok(JobDecision::Idle);
        };

        if job.is_finished() {
            // Terminal but not archived yet
            self.queue.finish(&job)?;
            return Ok(JobDecision::Finished {
                job_id: job.id,
                state: job.state,
            });
        }
        if job.is_cancelling() {
            return self.rollback(job, ReorgError::Cancelled("cancelled by user".to_string()));
        }
        if job.is_rolling_back() {
            let cause = ReorgError::Other(job.error.clone().unwrap_or_default());
            return self.rollback(job, cause);
        }

        match self.step(&mut job).await {
            Ok(decision) => Ok(decision),
            Err(err) if err.is_owner_lost() => {
                log::warn!("[{}] Dispatch stopped: {}", job.id, err);
                Ok(JobDecision::OwnerLost)
            }
            Err(err) if err.is_retryable() => {
                job.error_count = 0;
                self.queue.update(&job)?;
                Ok(JobDecision::Retry {
                    job_id: job.id,
                    backoff_ms: self.settings.retry_backoff.as_millis() as u64,
                })
            }
            Err(err) if err.is_fatal() => self.rollback(job, err),
            Err(err) => {
                job.error_count += 1;
                job.error = Some(err.to_string());
                if job.error_count >= self.settings.max_error_count {
                    log::error!(
                        "[{}] Giving up after {} consecutive errors: {}",
                        job.id,
                        job.error_count,
                        err
                    );
                    return self.rollback(job, err);
                }
                log::warn!(
                    "[{}] Dispatch failed ({} of {}): {}",
                    job.id,
                    job.error_count,
                    self.settings.max_error_count,
                    err
                );
                self.queue.update(&job)?;
                Ok(JobDecision::Retry {
                    job_id: job.id,
                    backoff_ms: self.settings.retry_backoff.as_millis() as u64,
                })
            }
        }
    }

    async fn step(&self, job: &mut Job) -> Result<JobDecision> {
        if job.state == JobState::Queueing {
            job.start();
            log::info!("[{}] Running {} job on table {}", job.id, job.job_type, job.table_id);
        }
        match job.schema_state {
            SchemaState::None => self.advance_schema(job, SchemaState::DeleteOnly),
            SchemaState::DeleteOnly => self.advance_schema(job, SchemaState::WriteOnly),
            SchemaState::WriteOnly => self.advance_schema(job, SchemaState::WriteReorganization),
            SchemaState::WriteReorganization => self.reorganize(job).await,
            other => Err(ReorgError::InvalidDdlJob(format!(
                "{} job cannot run in schema state {}",
                job.job_type, other
            ))),
        }
    }

    /// Move the job and its schema object to `next` in one transaction.
    fn advance_schema(&self, job: &mut Job, next: SchemaState) -> Result<JobDecision> {
        let args = job_args(job)?.clone();
        let mut advanced = job.clone();
        advanced.set_schema_state(next);
        advanced.error_count = 0;
        run_in_new_txn(&self.backend, true, |txn| {
            let mut table = self.catalog.require_table_in(txn, job.table_id)?;
            set_object_state(&mut table, &args, next)?;
            self.catalog.update_table_in(txn, &table)?;
            self.queue.update_in(txn, &advanced)
        })?;
        *job = advanced;
        log::info!("[{}] Schema state -> {}", job.id, next);
        Ok(JobDecision::Advanced {
            job_id: job.id,
            schema_state: next,
        })
    }

    /// One bounded backfill dispatch, then move past the range if it is done.
    async fn reorganize(&self, job: &mut Job) -> Result<JobDecision> {
        let table = self.catalog.require_table(job.table_id)?;
        let elements = job.elements();
        let mut info = get_reorg_info(&self.backend, job, &table, &elements)?;

        if !info.is_range_done() {
            let unit = self.backfill_unit(&table, &info)?;
            let result = self
                .runner
                .run_reorg_job(&mut info, &table, self.owner.lease(), move |ctx| unit.run(ctx))
                .await;
            job.row_count = info.job.row_count;
            result?;
        }

        match info.advance(&self.backend, &table)? {
            ReorgAdvance::NextPartition | ReorgAdvance::NextElement => {
                job.error_count = 0;
                self.queue.update(job)?;
                Ok(JobDecision::Advanced {
                    job_id: job.id,
                    schema_state: job.schema_state,
                })
            }
            ReorgAdvance::Finished => self.finish(job),
        }
    }

    fn backfill_unit(&self, table: &TableInfo, info: &ReorgInfo) -> Result<BackfillUnit> {
        let element = info.current_element;
        let missing = || ReorgError::element_not_exist(info.job.id, Some(element));
        let unit = if element.is_index() {
            let index = table.find_index(IndexId::new(element.id)).ok_or_else(missing)?;
            BackfillUnit::Index(
                IndexBackfill::new(
                    self.backend.clone(),
                    table.clone(),
                    index.clone(),
                    self.settings.batch_size,
                )
                .with_batch_delay(self.settings.batch_delay),
            )
        } else {
            let column = table.find_column(ColumnId::new(element.id)).ok_or_else(missing)?;
            BackfillUnit::Column(
                ColumnBackfill::new(
                    self.backend.clone(),
                    table.clone(),
                    column.clone(),
                    self.settings.batch_size,
                )
                .with_batch_delay(self.settings.batch_delay),
            )
        };
        Ok(unit)
    }

    /// Make the object public and archive the job, atomically.
    fn finish(&self, job: &mut Job) -> Result<JobDecision> {
        let args = job_args(job)?.clone();
        let mut done = job.clone();
        done.finish(JobState::Done, SchemaState::Public);
        run_in_new_txn(&self.backend, true, |txn| {
            let mut table = self.catalog.require_table_in(txn, job.table_id)?;
            set_object_state(&mut table, &args, SchemaState::Public)?;
            self.catalog.update_table_in(txn, &table)?;
            self.queue.finish_in(txn, &done)
        })?;
        *job = done;
        log::info!(
            "[{}] {} job done: rows={}",
            job.id,
            job.job_type,
            job.row_count
        );
        Ok(JobDecision::Finished {
            job_id: job.id,
            state: job.state,
        })
    }

    /// Undo a job: stop its backfill, remove the half-built object and its
    /// data, archive the job as `RollbackDone`.
    fn rollback(&self, mut job: Job, cause: ReorgError) -> Result<JobDecision> {
        self.runner.cancel_reorg(job.id);
        log::warn!("[{}] Rolling back {} job: {}", job.id, job.job_type, cause);

        let args = job.args.clone();
        let mut rolling = job.clone();
        rolling.finish(JobState::RollingBack, SchemaState::DeleteOnly);
        rolling.error = Some(cause.to_string());

        // Stop maintaining the object before its data is removed.
        let table = run_in_new_txn(&self.backend, true, |txn| {
            let table = match self.catalog.get_table_in(txn, job.table_id)? {
                Some(mut table) => {
                    if let Some(args) = &args {
                        if has_object(&table, args) {
                            set_object_state(&mut table, args, SchemaState::DeleteOnly)?;
                            self.catalog.update_table_in(txn, &table)?;
                        }
                    }
                    Some(table)
                }
                None => None,
            };
            self.queue.update_in(txn, &rolling)?;
            Ok::<_, ReorgError>(table)
        })?;
        job = rolling;

        if let (Some(table), Some(args)) = (&table, &args) {
            match args {
                JobArgs::AddIndex { index } if table.find_index(index.id).is_some() => {
                    let removed = self.data.remove_index_entries(table, index.id)?;
                    log::info!("[{}] Removed {} entries of index {}", job.id, removed, index.name);
                }
                JobArgs::AddColumn { column } if table.find_column(column.id).is_some() => {
                    let rewritten = self.data.remove_column_values(table, &column.name)?;
                    log::info!(
                        "[{}] Removed column {} from {} rows",
                        job.id,
                        column.name,
                        rewritten
                    );
                }
                _ => {}
            }
        }

        let mut done = job.clone();
        done.finish(JobState::RollbackDone, SchemaState::None);
        run_in_new_txn(&self.backend, true, |txn| {
            if let (Some(args), Some(mut table)) =
                (&args, self.catalog.get_table_in(txn, job.table_id)?)
            {
                if remove_object(&mut table, args) {
                    self.catalog.update_table_in(txn, &table)?;
                }
            }
            self.queue.finish_in(txn, &done)
        })?;
        log::info!("[{}] Rollback done", done.id);
        Ok(JobDecision::Finished {
            job_id: done.id,
            state: done.state,
        })
    }
}

fn job_args(job: &Job) -> Result<&JobArgs> {
    job.args
        .as_ref()
        .ok_or_else(|| ReorgError::InvalidDdlJob(format!("{} job {} has no arguments", job.job_type, job.id)))
}

fn has_object(table: &TableInfo, args: &JobArgs) -> bool {
    match args {
        JobArgs::AddIndex { index } => table.find_index(index.id).is_some(),
        JobArgs::AddColumn { column } => table.find_column(column.id).is_some(),
    }
}

/// Set the state of the job's index or column, adding it on the first step.
fn set_object_state(table: &mut TableInfo, args: &JobArgs, state: SchemaState) -> Result<()> {
    match args {
        JobArgs::AddIndex { index } => {
            if let Some(existing) = table.find_index_mut(index.id) {
                existing.state = state;
                return Ok(());
            }
            if state != SchemaState::DeleteOnly {
                return Err(ReorgError::InvalidDdlJob(format!("index {} is missing", index.name)));
            }
            if table.indexes.iter().any(|i| i.name == index.name) {
                return Err(ReorgError::InvalidDdlJob(format!(
                    "index {} already exists",
                    index.name
                )));
            }
            if let Some(col) = index
                .columns
                .iter()
                .find(|c| table.find_column_by_name(c).is_none())
            {
                return Err(ReorgError::InvalidDdlJob(format!("unknown column {}", col)));
            }
            let mut index = index.clone();
            index.state = state;
            table.indexes.push(index);
        }
        JobArgs::AddColumn { column } => {
            if let Some(existing) = table.find_column_mut(column.id) {
                existing.state = state;
                return Ok(());
            }
            if state != SchemaState::DeleteOnly {
                return Err(ReorgError::InvalidDdlJob(format!("column {} is missing", column.name)));
            }
            if table.find_column_by_name(&column.name).is_some() {
                return Err(ReorgError::InvalidDdlJob(format!(
                    "column {} already exists",
                    column.name
                )));
            }
            let mut column = column.clone();
            column.state = state;
            table.columns.push(column);
        }
    }
    Ok(())
}

fn remove_object(table: &mut TableInfo, args: &JobArgs) -> bool {
    let before = table.indexes.len() + table.columns.len();
    match args {
        JobArgs::AddIndex { index } => table.indexes.retain(|i| i.id != index.id),
        JobArgs::AddColumn { column } => table.columns.retain(|c| c.id != column.id),
    }
    before != table.indexes.len() + table.columns.len()
}
