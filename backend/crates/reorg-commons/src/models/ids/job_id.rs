//! DDL job identifier.
//!
//! Job IDs are allocated by the job queue from a monotonically increasing
//! counter, so ordering by `JobId` is ordering by submission time.

use crate::storage_key::StorageKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of one schema-change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(i64);

impl JobId {
    #[inline]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

impl From<i64> for JobId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl StorageKey for JobId {
    /// Big-endian with the sign bit flipped so byte order matches numeric order.
    fn storage_key(&self) -> Vec<u8> {
        crate::codec::encode_int(self.0).to_vec()
    }

    fn from_storage_key(bytes: &[u8]) -> Result<Self, String> {
        crate::codec::decode_int(bytes)
            .map(|(id, _)| Self(id))
            .ok_or_else(|| format!("invalid job id key: {:?}", bytes))
    }
}
