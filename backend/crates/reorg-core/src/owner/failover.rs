//! Owner failover handling.
//!
//! A new owner takes over running reorg jobs without talking to the previous
//! owner: the committed checkpoint record is all it needs. When this node
//! becomes owner it scans the queue and reports, per job in the reorganization
//! stage, where the next dispatch will resume.
//!
//! ## Recovery outcomes
//!
//! - **Resumed**: a checkpoint exists and names one of the job's elements
//! - **Not started**: snapshot version still zero, the first dispatch
//!   initialises the checkpoint
//! - **Inconsistent**: snapshot set but no usable checkpoint; the first
//!   dispatch fails with an element-not-exist error and rolls the job back

use crate::error::Result;
use crate::jobs::queue::JobQueue;
use crate::reorg::meta::ReorgMetaStore;
use reorg_commons::{Element, JobId, Key, NodeId, PhysicalTableId, SchemaState};
use reorg_store::{EntityStore, StorageBackend};
use std::sync::Arc;

/// Where a taken-over job resumes.
#[derive(Debug, Clone, PartialEq)]
pub struct ResumePoint {
    pub job_id: JobId,
    pub element: Element,
    pub physical_table_id: PhysicalTableId,
    pub start_key: Key,
    pub row_count: i64,
}

/// Report of recovery actions taken
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub resumed: Vec<ResumePoint>,
    pub not_started: Vec<JobId>,
    pub inconsistent: Vec<(JobId, String)>,
}

impl RecoveryReport {
    pub fn is_empty(&self) -> bool {
        self.resumed.is_empty() && self.not_started.is_empty() && self.inconsistent.is_empty()
    }

    pub fn total(&self) -> usize {
        self.resumed.len() + self.not_started.len() + self.inconsistent.len()
    }
}

pub struct FailoverHandler {
    queue: Arc<JobQueue>,
    meta: ReorgMetaStore,
    node_id: NodeId,
}

impl FailoverHandler {
    pub fn new(queue: Arc<JobQueue>, backend: Arc<dyn StorageBackend>, node_id: NodeId) -> Self {
        Self {
            queue,
            meta: ReorgMetaStore::new(backend),
            node_id,
        }
    }

    /// Called when this node becomes the DDL owner.
    pub fn on_become_owner(&self) -> Result<RecoveryReport> {
        log::debug!(
            "[FailoverHandler] Node {} became owner, scanning for running reorg jobs...",
            self.node_id
        );
        let mut report = RecoveryReport::default();

        for job in self.queue.list()? {
            if job.is_finished() || job.schema_state != SchemaState::WriteReorganization {
                continue;
            }
            if job.snapshot_ver == 0 {
                report.not_started.push(job.id);
                continue;
            }
            match self.meta.get(&job.id)? {
                Some(record) if job.elements().contains(&record.element) => {
                    log::info!(
                        "[{}] Taking over reorg: element={}, physical_table={}, start={}, rows={}",
                        job.id,
                        record.element,
                        record.physical_table_id,
                        record.start_key,
                        record.row_count
                    );
                    report.resumed.push(ResumePoint {
                        job_id: job.id,
                        element: record.element,
                        physical_table_id: record.physical_table_id,
                        start_key: record.start_key,
                        row_count: record.row_count,
                    });
                }
                Some(record) => {
                    let reason = format!("checkpoint names unknown element {}", record.element);
                    log::warn!("[{}] {}", job.id, reason);
                    report.inconsistent.push((job.id, reason));
                }
                None => {
                    let reason = "snapshot version set but no checkpoint".to_string();
                    log::warn!("[{}] {}", job.id, reason);
                    report.inconsistent.push((job.id, reason));
                }
            }
        }

        log::debug!(
            "[FailoverHandler] Recovery complete: {} resumed, {} not started, {} inconsistent",
            report.resumed.len(),
            report.not_started.len(),
            report.inconsistent.len()
        );
        Ok(report)
    }
}
