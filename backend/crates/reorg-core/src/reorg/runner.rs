//! Bounded-wait backfill executor.
//!
//! [`ReorgRunner::run_reorg_job`] launches the backfill for the current
//! (job, element, physical table) as a background task, or attaches to the one
//! already in flight, and waits for at most one timeout window. Whatever
//! happens, the progress reported so far is committed before returning:
//!
//! | wait outcome          | returned                          |
//! |-----------------------|-----------------------------------|
//! | backfill finished     | the backfill's own result         |
//! | timeout               | `WaitReorgTimeout` (retryable)    |
//! | lease lost / shutdown | `OwnerLost`                       |
//!
//! A finished backfill stays registered until its final checkpoint commits, so
//! a failed commit is retried by the next dispatch instead of losing the
//! outcome.

use super::backfill::BackfillContext;
use super::checkpoint::commit_checkpoint;
use super::info::ReorgInfo;
use super::progress::ReorgProgress;
use crate::error::{ReorgError, Result};
use crate::owner::OwnerManager;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use reorg_commons::{Element, JobId, PhysicalTableId, TableInfo};
use reorg_configs::ReorgSettings;
use reorg_store::StorageBackend;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ReorgKey {
    job_id: JobId,
    element: Element,
    physical_table_id: PhysicalTableId,
}

impl ReorgKey {
    fn of(info: &ReorgInfo) -> Self {
        Self {
            job_id: info.job.id,
            element: info.current_element,
            physical_table_id: info.physical_table_id,
        }
    }
}

enum Outcome {
    Pending(oneshot::Receiver<Result<()>>),
    Finished(Result<()>),
}

/// One in-flight backfill.
struct ReorgHandle {
    progress: Arc<ReorgProgress>,
    /// Cancels the backfill task
    cancel: CancellationToken,
    /// Ownership term the task was launched in
    term: CancellationToken,
    outcome: Mutex<Outcome>,
}

enum Wait {
    Done(Result<()>),
    TimedOut,
    OwnerLost(&'static str),
}

pub struct ReorgRunner {
    backend: Arc<dyn StorageBackend>,
    owner: Arc<dyn OwnerManager>,
    wait_timeout: Duration,
    local_wait_timeout: Duration,
    in_flight: DashMap<ReorgKey, Arc<ReorgHandle>>,
    shutdown: CancellationToken,
}

impl ReorgRunner {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        owner: Arc<dyn OwnerManager>,
        settings: &ReorgSettings,
    ) -> Self {
        Self::with_timeouts(
            backend,
            owner,
            Duration::from_millis(settings.wait_timeout_ms),
            Duration::from_millis(settings.local_wait_timeout_ms),
        )
    }

    pub fn with_timeouts(
        backend: Arc<dyn StorageBackend>,
        owner: Arc<dyn OwnerManager>,
        wait_timeout: Duration,
        local_wait_timeout: Duration,
    ) -> Self {
        Self {
            backend,
            owner,
            wait_timeout,
            local_wait_timeout,
            in_flight: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    pub fn owner(&self) -> &Arc<dyn OwnerManager> {
        &self.owner
    }

    /// Bounded wait for a lease of `lease`; zero means local storage.
    pub fn wait_timeout(&self, lease: Duration) -> Duration {
        if lease.is_zero() {
            self.local_wait_timeout
        } else {
            self.wait_timeout
        }
    }

    /// Run (or keep waiting for) the backfill of `info`'s current range.
    ///
    /// `backfill` is only invoked when nothing is in flight for this range. On
    /// every return path the progress reported so far has been merged into
    /// `info` and the checkpoint store, except when that commit itself failed,
    /// in which case its error is returned and `info` is unchanged.
    pub async fn run_reorg_job<F, Fut>(
        &self,
        info: &mut ReorgInfo,
        table: &TableInfo,
        lease: Duration,
        backfill: F,
    ) -> Result<()>
    where
        F: FnOnce(BackfillContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let key = ReorgKey::of(info);
        let job_id = info.job.id;
        let stop = self.owner.stop_token();

        if stop.is_cancelled() || self.shutdown.is_cancelled() || !self.owner.is_owner() {
            if let Some((_, handle)) = self.in_flight.remove(&key) {
                return self.abandon(info, &handle, "not owner");
            }
            log::warn!("[{}] Refusing to run reorg: node is not DDL owner", job_id);
            return Err(ReorgError::OwnerLost);
        }

        let handle = self.attach_or_launch(key, info, table, &stop, backfill);
        let mut outcome = handle.outcome.lock().await;
        let timeout = self.wait_timeout(lease);

        let wait = match &mut *outcome {
            Outcome::Finished(result) => Wait::Done(result.clone()),
            Outcome::Pending(rx) => {
                tokio::select! {
                    biased;
                    _ = stop.cancelled() => Wait::OwnerLost("lease lost"),
                    _ = self.shutdown.cancelled() => Wait::OwnerLost("node stopping"),
                    result = rx => Wait::Done(result.unwrap_or_else(|_| {
                        Err(ReorgError::Backfill(
                            "backfill task exited without reporting".to_string(),
                        ))
                    })),
                    _ = tokio::time::sleep(timeout) => Wait::TimedOut,
                }
            }
        };

        match wait {
            Wait::Done(result) => {
                *outcome = Outcome::Finished(result.clone());
                commit_checkpoint(&self.backend, info, &handle.progress)?;
                self.release(key, &handle);
                handle.progress.clean();
                match &result {
                    Ok(()) => log::info!(
                        "[{}] Backfill of {} on {} done, rows={}",
                        job_id,
                        key.element,
                        key.physical_table_id,
                        info.job.row_count
                    ),
                    Err(err) => log::warn!(
                        "[{}] Backfill of {} on {} failed after {} rows: {}",
                        job_id,
                        key.element,
                        key.physical_table_id,
                        info.job.row_count,
                        err
                    ),
                }
                result
            }
            Wait::TimedOut => {
                commit_checkpoint(&self.backend, info, &handle.progress)?;
                log::info!(
                    "[{}] Backfill of {} still running after {}ms, rows={}, next={}",
                    job_id,
                    key.element,
                    timeout.as_millis(),
                    info.job.row_count,
                    info.start_key
                );
                Err(ReorgError::WaitReorgTimeout)
            }
            Wait::OwnerLost(reason) => {
                drop(outcome);
                self.release(key, &handle);
                self.abandon(info, &handle, reason)
            }
        }
    }

    fn attach_or_launch<F, Fut>(
        &self,
        key: ReorgKey,
        info: &ReorgInfo,
        table: &TableInfo,
        term: &CancellationToken,
        backfill: F,
    ) -> Arc<ReorgHandle>
    where
        F: FnOnce(BackfillContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        match self.in_flight.entry(key) {
            Entry::Occupied(mut entry) => {
                if !entry.get().term.is_cancelled() {
                    log::debug!("[{}] Attaching to in-flight backfill of {}", key.job_id, key.element);
                    return Arc::clone(entry.get());
                }
                // Left over from an earlier ownership term; its uncommitted
                // progress is redone from the last checkpoint.
                entry.get().cancel.cancel();
                log::warn!(
                    "[{}] Dropping backfill of {} from a previous ownership term",
                    key.job_id,
                    key.element
                );
                let handle = Arc::new(Self::launch(info, table, term, backfill));
                entry.insert(Arc::clone(&handle));
                handle
            }
            Entry::Vacant(entry) => {
                let handle = Arc::new(Self::launch(info, table, term, backfill));
                Arc::clone(entry.insert(handle).value())
            }
        }
    }

    /// Unregister `handle`, unless a newer launch already replaced it.
    fn release(&self, key: ReorgKey, handle: &Arc<ReorgHandle>) -> bool {
        self.in_flight
            .remove_if(&key, |_, registered| Arc::ptr_eq(registered, handle))
            .is_some()
    }

    fn launch<F, Fut>(
        info: &ReorgInfo,
        table: &TableInfo,
        term: &CancellationToken,
        backfill: F,
    ) -> ReorgHandle
    where
        F: FnOnce(BackfillContext) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let progress = Arc::new(ReorgProgress::new());
        let cancel = term.child_token();
        let ctx = BackfillContext {
            job_id: info.job.id,
            element: info.current_element,
            physical_table_id: info.physical_table_id,
            start_key: info.start_key.clone(),
            end_key: info.end_key.clone(),
            progress: progress.clone(),
            cancel: cancel.clone(),
        };
        log::info!(
            "[{}] Launching backfill of {} on {}.{}: start={}, end={}",
            info.job.id,
            info.current_element,
            table.name,
            info.physical_table_id,
            info.start_key,
            info.end_key
        );

        let (tx, rx) = oneshot::channel();
        let task = backfill(ctx);
        tokio::spawn(async move {
            // The receiver is gone when the dispatch was abandoned.
            let _ = tx.send(task.await);
        });

        ReorgHandle {
            progress,
            cancel,
            term: term.clone(),
            outcome: Mutex::new(Outcome::Pending(rx)),
        }
    }

    /// Owner-lost exit: cancel the task, commit what it reported, hand off.
    fn abandon(&self, info: &mut ReorgInfo, handle: &ReorgHandle, reason: &str) -> Result<()> {
        handle.cancel.cancel();
        if let Err(err) = commit_checkpoint(&self.backend, info, &handle.progress) {
            log::warn!(
                "[{}] Could not checkpoint abandoned backfill of {}: {}",
                info.job.id,
                info.current_element,
                err
            );
        }
        log::warn!(
            "[{}] Abandoning backfill of {} ({}), rows={}, resume from {}",
            info.job.id,
            info.current_element,
            reason,
            info.job.row_count,
            info.start_key
        );
        Err(ReorgError::OwnerLost)
    }

    /// Cancel every in-flight backfill of `job_id`. Returns how many were
    /// cancelled.
    pub fn cancel_reorg(&self, job_id: JobId) -> usize {
        let keys: Vec<ReorgKey> = self
            .in_flight
            .iter()
            .filter(|entry| entry.key().job_id == job_id)
            .map(|entry| *entry.key())
            .collect();
        let mut cancelled = 0;
        for key in keys {
            if let Some((_, handle)) = self.in_flight.remove(&key) {
                handle.cancel.cancel();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            log::info!("[{}] Cancelled {} in-flight backfill(s)", job_id, cancelled);
        }
        cancelled
    }

    /// Stop signal for every wait and backfill of this runner.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for entry in self.in_flight.iter() {
            entry.value().cancel.cancel();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn is_in_flight(&self, job_id: JobId) -> bool {
        self.in_flight.iter().any(|entry| entry.key().job_id == job_id)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
