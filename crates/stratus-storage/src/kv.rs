use crate::Result;
use bytes::Bytes;

/// Ordered, append-only record store
///
/// A key is written at most once. Keys are compared bytewise, so callers that
/// need insertion order encode it into the key (see [`crate::KeyEncoder`]).
pub trait KVStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Write a new record; fails with `RecordExists` if `key` is taken
    fn append(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Records whose key starts with `prefix`, in key order
    fn scan(&self, prefix: &[u8]) -> Result<Vec<(Bytes, Bytes)>>;
}
