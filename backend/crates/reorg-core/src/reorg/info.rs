//! Reorg info resolution.
//!
//! A [`ReorgInfo`] describes what is left to do for one element of a job: the
//! element, the physical table being scanned and the key range `[start, end)`
//! still unprocessed. It is rebuilt from the checkpoint record on every
//! dispatch, on whichever node currently owns DDL execution.
//!
//! ## Resolution
//!
//! - `snapshot_ver == 0`: first dispatch. The first element's full record
//!   range is written as the initial checkpoint, and the job's snapshot version
//!   is assigned, in one transaction. The job is only updated in memory after
//!   that transaction commits.
//! - `snapshot_ver != 0`: the checkpoint record is read back as-is. A missing
//!   record, or one naming an element the job does not build, is
//!   [`ReorgError::ElementNotExist`], and the job's snapshot version is reset
//!   to 0 in memory so it no longer claims a checkpoint it does not have.

use super::meta::{ReorgMetaStore, ReorgRecord};
use crate::error::{ReorgError, Result};
use crate::jobs::queue::JobStore;
use reorg_commons::{Element, Job, Key, PhysicalTableId, TableInfo};
use reorg_store::{run_in_new_txn, EntityStore, StorageBackend};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct ReorgInfo {
    pub job: Job,
    /// Elements the job builds, in order
    pub elements: Vec<Element>,
    pub current_element: Element,
    pub start_key: Key,
    pub end_key: Key,
    pub physical_table_id: PhysicalTableId,
    /// Set when this resolution created the initial checkpoint
    pub first: bool,
}

/// Outcome of moving past a fully processed range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorgAdvance {
    /// Next partition of the same element
    NextPartition,
    /// First partition of the next element
    NextElement,
    /// Every element is built; the checkpoint record has been removed
    Finished,
}

/// Resolve the reorg info for `job`.
///
/// On first dispatch `job.snapshot_ver` is set once the initial checkpoint is
/// committed; on failure `job` is left untouched. On resume, an
/// `ElementNotExist` failure resets `job.snapshot_ver` to 0.
pub fn get_reorg_info(
    backend: &Arc<dyn StorageBackend>,
    job: &mut Job,
    table: &TableInfo,
    elements: &[Element],
) -> Result<ReorgInfo> {
    let meta = ReorgMetaStore::new(backend.clone());
    let jobs = JobStore::pending(backend.clone());
    let job_id = job.id;
    let snapshot_ver = job.snapshot_ver;

    let resolved = run_in_new_txn(backend, true, |txn| {
        if snapshot_ver == 0 {
            let element = *elements
                .first()
                .ok_or_else(|| ReorgError::element_not_exist(job_id, None))?;
            let physical_table_id = table
                .physical_ids()
                .first()
                .copied()
                .ok_or(ReorgError::TableNotFound(table.id))?;
            let (start_key, end_key) = table.record_range(physical_table_id);
            // Version 0 means "not started", so never hand it out.
            let version = txn.start_version().max(1);
            let record = ReorgRecord {
                element,
                start_key,
                end_key,
                physical_table_id,
                row_count: job.row_count,
                snapshot_ver: version,
            };
            meta.put_in(txn, &job_id, &record)?;
            if let Some(mut stored) = jobs.get_in(txn, &job_id)? {
                stored.snapshot_ver = version;
                jobs.put_in(txn, &job_id, &stored)?;
            }
            Ok((record, true))
        } else {
            let record = meta
                .get_in(txn, &job_id)?
                .ok_or_else(|| ReorgError::element_not_exist(job_id, None))?;
            if !elements.is_empty() && !elements.contains(&record.element) {
                return Err(ReorgError::element_not_exist(job_id, Some(record.element)));
            }
            Ok((record, false))
        }
    });
    let (record, first) = match resolved {
        Err(err @ ReorgError::ElementNotExist { .. }) if snapshot_ver != 0 => {
            log::warn!(
                "[{}] No usable checkpoint at snapshot_ver={}, resetting it: {}",
                job_id,
                snapshot_ver,
                err
            );
            job.snapshot_ver = 0;
            return Err(err);
        }
        other => other?,
    };

    if first {
        job.snapshot_ver = record.snapshot_ver;
        log::info!(
            "[{}] Reorg initialised: element={}, physical_table={}, snapshot_ver={}",
            job_id,
            record.element,
            record.physical_table_id,
            record.snapshot_ver
        );
    } else {
        log::info!(
            "[{}] Reorg resumed: element={}, physical_table={}, start={}, end={}",
            job_id,
            record.element,
            record.physical_table_id,
            record.start_key,
            record.end_key
        );
    }

    Ok(ReorgInfo {
        job: job.clone(),
        elements: elements.to_vec(),
        current_element: record.element,
        start_key: record.start_key,
        end_key: record.end_key,
        physical_table_id: record.physical_table_id,
        first,
    })
}

impl ReorgInfo {
    /// The range of the current (element, physical table) is fully processed.
    pub fn is_range_done(&self) -> bool {
        self.start_key >= self.end_key
    }

    /// Move to the next partition, else the next element, persisting the new
    /// resumption point; remove the checkpoint record when nothing is left.
    ///
    /// `self` is only updated after the transaction commits.
    pub fn advance(
        &mut self,
        backend: &Arc<dyn StorageBackend>,
        table: &TableInfo,
    ) -> Result<ReorgAdvance> {
        let (next, step) = match table.next_physical_id(self.physical_table_id) {
            Some(pid) => (Some((self.current_element, pid)), ReorgAdvance::NextPartition),
            None => {
                let pos = self
                    .elements
                    .iter()
                    .position(|e| *e == self.current_element)
                    .ok_or_else(|| {
                        ReorgError::element_not_exist(self.job.id, Some(self.current_element))
                    })?;
                match (self.elements.get(pos + 1), table.physical_ids().first()) {
                    (Some(element), Some(pid)) => {
                        (Some((*element, *pid)), ReorgAdvance::NextElement)
                    }
                    _ => (None, ReorgAdvance::Finished),
                }
            }
        };

        let meta = ReorgMetaStore::new(backend.clone());
        let job_id = self.job.id;
        let record = next.map(|(element, pid)| {
            let (start_key, end_key) = table.record_range(pid);
            ReorgRecord {
                element,
                start_key,
                end_key,
                physical_table_id: pid,
                row_count: self.job.row_count,
                snapshot_ver: self.job.snapshot_ver,
            }
        });

        run_in_new_txn(backend, true, |txn| {
            match &record {
                Some(record) => meta.put_in(txn, &job_id, record)?,
                None => meta.delete_in(txn, &job_id),
            }
            Ok::<_, ReorgError>(())
        })?;

        match record {
            Some(record) => {
                log::info!(
                    "[{}] Reorg advanced to element={}, physical_table={}",
                    job_id,
                    record.element,
                    record.physical_table_id
                );
                self.current_element = record.element;
                self.physical_table_id = record.physical_table_id;
                self.start_key = record.start_key;
                self.end_key = record.end_key;
            }
            None => log::info!("[{}] Reorg finished all elements", job_id),
        }
        Ok(step)
    }
}
