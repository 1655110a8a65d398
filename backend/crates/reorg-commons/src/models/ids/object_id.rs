//! Numeric identifiers of schema objects.
//!
//! Schemas, tables, partitions, indexes and columns are all identified by an
//! `i64` allocated from the same global counter, but mixing them up is a bug,
//! so each gets its own newtype.

use crate::storage_key::StorageKey;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! object_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(i64);

        impl $name {
            #[inline]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            #[inline]
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }

        impl StorageKey for $name {
            fn storage_key(&self) -> Vec<u8> {
                crate::codec::encode_int(self.0).to_vec()
            }

            fn from_storage_key(bytes: &[u8]) -> Result<Self, String> {
                match crate::codec::decode_int(bytes) {
                    Some((id, rest)) if rest.is_empty() => Ok(Self(id)),
                    _ => Err(format!("invalid {} storage key", stringify!($name))),
                }
            }
        }
    };
}

object_id!(
    /// Database (schema) identifier.
    SchemaId
);
object_id!(
    /// Logical table identifier.
    TableId
);
object_id!(
    /// A table, or one partition of a partitioned table: the unit a key range
    /// scan runs over.
    PhysicalTableId
);
object_id!(
    /// Index identifier, unique within its table.
    IndexId
);
object_id!(
    /// Column identifier, unique within its table.
    ColumnId
);

impl From<TableId> for PhysicalTableId {
    /// A non-partitioned table is its own single physical table.
    fn from(id: TableId) -> Self {
        PhysicalTableId(id.0)
    }
}
