// Error types module
use reorg_commons::{Element, JobId, TableId};
use reorg_store::StorageError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReorgError>;

/// Errors surfaced by the reorganization engine.
///
/// `Clone` because the outcome of a finished backfill is kept until its
/// checkpoint has been committed and may be reported more than once.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReorgError {
    /// The bounded wait elapsed before the backfill finished. Not an
    /// application error: the job loop re-dispatches the job.
    #[error("Timeout waiting for data reorganization")]
    WaitReorgTimeout,

    /// This node is no longer the DDL owner (lease lost or node stopping).
    #[error("DDL owner lost, reorganization must continue on the new owner")]
    OwnerLost,

    #[error("Backfill failed: {0}")]
    Backfill(String),

    /// The stored checkpoint does not belong to any element the job still has
    /// to process.
    #[error("[{job_id}] reorg element {element:?} does not exist")]
    ElementNotExist {
        job_id: JobId,
        element: Option<Element>,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Table not found: {0}")]
    TableNotFound(TableId),

    #[error("Invalid DDL job: {0}")]
    InvalidDdlJob(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("{0}")]
    Other(String),
}

impl ReorgError {
    /// Re-dispatching the same job later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReorgError::WaitReorgTimeout)
    }

    pub fn is_owner_lost(&self) -> bool {
        matches!(self, ReorgError::OwnerLost)
    }

    /// The job cannot make progress and must be rolled back.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReorgError::Backfill(_)
                | ReorgError::ElementNotExist { .. }
                | ReorgError::Cancelled(_)
                | ReorgError::InvalidDdlJob(_)
                | ReorgError::TableNotFound(_)
        )
    }

    pub fn element_not_exist(job_id: JobId, element: Option<Element>) -> Self {
        ReorgError::ElementNotExist { job_id, element }
    }
}

impl From<serde_json::Error> for ReorgError {
    fn from(err: serde_json::Error) -> Self {
        ReorgError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(ReorgError::WaitReorgTimeout.is_retryable());
        assert!(!ReorgError::WaitReorgTimeout.is_fatal());

        assert!(ReorgError::OwnerLost.is_owner_lost());
        assert!(!ReorgError::OwnerLost.is_retryable());
        assert!(!ReorgError::OwnerLost.is_fatal());

        let missing = ReorgError::element_not_exist(JobId::new(1), Some(Element::index(333)));
        assert!(missing.is_fatal());
        assert!(ReorgError::Backfill("dup".into()).is_fatal());

        let storage = ReorgError::from(StorageError::IoError("disk".into()));
        assert!(!storage.is_fatal());
        assert!(!storage.is_retryable());
    }

    #[test]
    fn test_element_not_exist_display() {
        let err = ReorgError::element_not_exist(JobId::new(7), None);
        assert_eq!(err.to_string(), "[job-7] reorg element None does not exist");
    }
}
