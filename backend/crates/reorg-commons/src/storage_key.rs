//! Storage key trait for type-safe key serialization with lexicographic ordering
//!
//! Typed stores never build raw byte keys by hand. Every key type implements
//! `StorageKey`, which gives an explicit contract for storage serialization
//! separate from `AsRef<[u8]>`. Implementations must preserve ordering: if
//! `a < b` then `a.storage_key() < b.storage_key()` byte-wise, because the
//! job queue relies on scan order to find the oldest pending job.

/// Trait for keys that can be serialized for storage in an `EntityStore`.
pub trait StorageKey: Clone + Send + Sync + 'static {
    /// Serialize the key to order-preserving bytes.
    fn storage_key(&self) -> Vec<u8>;

    /// Parse a key back from its storage bytes.
    fn from_storage_key(bytes: &[u8]) -> Result<Self, String>
    where
        Self: Sized;
}

impl StorageKey for Vec<u8> {
    fn storage_key(&self) -> Vec<u8> {
        self.clone()
    }

    fn from_storage_key(bytes: &[u8]) -> Result<Self, String> {
        Ok(bytes.to_vec())
    }
}
