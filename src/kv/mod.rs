//! Module define the transactional key-value interface the engine runs on.
//!
//! The engine does not own a storage backend. Callers hand it a transaction
//! handle implementing [KvTx]; recent writes, history posts and posting
//! lists all live in named tables behind this interface until a step is
//! frozen into files. Tables are flat byte-ordered maps, and a table may be
//! dup-sorted: one key holding many values, iterated in ascending byte
//! order of the value.
//!
//! [Mdb] is the in-memory implementation shipped with this package, refer
//! to [memdb] for its semantics. Readers obtain their own snapshot handles,
//! the single writer holds the unique read-write handle.

pub mod memdb;

pub use memdb::Mdb;

use crate::Result;

/// A `(key, value)` pair as stored in a table.
pub type KvPair = (Vec<u8>, Vec<u8>);

/// Transaction handle over named tables.
///
/// Write methods shall only be called on the unique read-write handle,
/// the engine is single-writer by contract.
pub trait KvTx: Send + Sync {
    /// Return the value for `key`, first duplicate if table is dup-sorted.
    fn get_one(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Replace the value for `key`. Existing duplicates are dropped.
    fn put(&self, table: &str, key: &[u8], value: &[u8]) -> Result<()>;

    /// Insert `value` as one duplicate of `key`, keeping duplicates
    /// sorted and de-duplicated.
    fn put_dup(&self, table: &str, key: &[u8], value: &[u8]) -> Result<()>;

    /// Delete one exact `(key, value)` duplicate when `value` is supplied,
    /// otherwise delete the key with all its duplicates. Deleting a
    /// missing pair is a no-op.
    fn delete(&self, table: &str, key: &[u8], value: Option<&[u8]>) -> Result<()>;

    /// Open a cursor over `table`.
    fn cursor<'a>(&'a self, table: &str) -> Result<Box<dyn CursorDupSort + 'a>>;

    /// Publish this transaction's writes. No-op for read handles.
    fn commit(self: Box<Self>) -> Result<()>;
}

/// Cursor over one dup-sorted table. Plain tables behave as dup-sorted
/// tables whose keys hold exactly one duplicate.
///
/// Every positioning call returns the `(key, value)` pair it landed on,
/// or None when exhausted.
pub trait CursorDupSort {
    /// Position at the first key's first duplicate.
    fn first(&mut self) -> Result<Option<KvPair>>;

    /// Advance to the following `(key, value)` pair, duplicates included.
    fn next(&mut self) -> Result<Option<KvPair>>;

    /// Advance to the first duplicate of the next key.
    fn next_no_dup(&mut self) -> Result<Option<KvPair>>;

    /// Advance to the next duplicate of the current key.
    fn next_dup(&mut self) -> Result<Option<KvPair>>;

    /// Step back to the previous duplicate of the current key.
    fn prev_dup(&mut self) -> Result<Option<KvPair>>;

    /// Position at the smallest key that is `>= key`.
    fn seek(&mut self, key: &[u8]) -> Result<Option<KvPair>>;

    /// Position at `key` exactly, first duplicate.
    fn seek_exact(&mut self, key: &[u8]) -> Result<Option<KvPair>>;

    /// Position at `key` exactly, on the smallest duplicate `>= value`.
    /// Return that duplicate.
    fn seek_both_range(&mut self, key: &[u8], value: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Return the largest duplicate of the current key.
    fn last_dup(&mut self) -> Result<Option<Vec<u8>>>;

    /// Return the number of `(key, value)` pairs in the table.
    fn count(&mut self) -> Result<usize>;

    /// Delete the pair the cursor is positioned at. The cursor shall
    /// resume, via `next()`, at the pair that followed it.
    fn delete_current(&mut self) -> Result<()>;

    /// Delete the current key with all its duplicates. The cursor shall
    /// resume, via `next()`, at the following key.
    fn delete_current_duplicates(&mut self) -> Result<()>;

    /// Return up to `limit` duplicates of `key`, ascending when `asc`,
    /// else descending. ZERO limit means no limit.
    fn range_dup_sort(&mut self, key: &[u8], asc: bool, limit: usize)
        -> Result<Vec<Vec<u8>>>;
}
