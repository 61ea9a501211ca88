//! Module `btidx` implement ordered lookup over a sorted word-file.
//!
//! Domain value files store `key, value` word pairs in key-sorted order.
//! The `.bt` sibling indexes them for range seeks: a fence key is sampled
//! every `BT_ARITY` entries and kept in memory, the leaf payload is the
//! raw file offset of the entry's key word. A seek binary-searches the
//! fences, then the entries of one fence window, probing keys through the
//! data-file decompressor.

use cbordata::Cborize;

use std::{convert::TryFrom, ffi};

use crate::{seg, util, Result};

/// Number of entries covered by one fence key.
pub const BT_ARITY: usize = 2048;

const BT_VER: u32 = 0x00030001;

// marks the tail of a finished btree index file.
const FILE_MARKER: u64 = 0x5354_5241_4254_0001;

/// Btree index over one sorted data file.
#[derive(Clone, Debug, Default, Cborize)]
pub struct BtIndex {
    arity: u64,
    count: u64,
    offsets: Vec<u64>,
    fences: Vec<Vec<u8>>,
}

impl BtIndex {
    const ID: u32 = BT_VER;

    /// Build from `(key, offset)` pairs in key-sorted order, `offset`
    /// addressing the key word in the data file.
    pub fn build<K>(pairs: &[(K, u64)]) -> BtIndex
    where
        K: AsRef<[u8]>,
    {
        let mut index = BtIndex {
            arity: u64::try_from(BT_ARITY).unwrap(),
            count: u64::try_from(pairs.len()).unwrap(),
            offsets: Vec::with_capacity(pairs.len()),
            fences: Vec::default(),
        };
        for (i, (key, offset)) in pairs.iter().enumerate() {
            if i % BT_ARITY == 0 {
                index.fences.push(key.as_ref().to_vec());
            }
            index.offsets.push(*offset);
        }
        index
    }

    pub fn len(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Return the value word for `key`, probing the data file.
    pub fn get(&self, decomp: &seg::Decompressor, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let idx = self.lower_bound(decomp, key)?;
        if idx >= self.offsets.len() {
            return Ok(None);
        }
        let (entry_key, val_fpos) = decomp.word_at(self.offsets[idx])?;
        if entry_key.as_slice() == key {
            let (value, _) = decomp.word_at(val_fpos)?;
            Ok(Some(value))
        } else {
            Ok(None)
        }
    }

    /// Position a cursor at the first entry whose key is `>= key`.
    pub fn seek(&self, decomp: &seg::Decompressor, key: &[u8]) -> Result<BtCursor> {
        let idx = self.lower_bound(decomp, key)?;
        Ok(BtCursor { idx })
    }

    // first entry index whose key is >= `key`.
    fn lower_bound(&self, decomp: &seg::Decompressor, key: &[u8]) -> Result<usize> {
        // fence window; fences[j] covers entries [j*arity, (j+1)*arity).
        let w = self.fences.partition_point(|fence| fence.as_slice() <= key);
        let (mut lo, mut hi) = match w {
            0 => (0, 0), // key sorts before the first entry
            w => {
                let arity = self.arity as usize;
                ((w - 1) * arity, std::cmp::min(w * arity, self.offsets.len()))
            }
        };

        while lo < hi {
            let mid = (lo + hi) / 2;
            let (entry_key, _) = decomp.word_at(self.offsets[mid])?;
            if entry_key.as_slice() < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Ok(lo)
    }

    /// Persist into an index file at `loc`.
    pub fn write(&self, loc: &ffi::OsStr) -> Result<()> {
        util::write_tagged_file(loc, self.clone(), FILE_MARKER)
    }

    /// Load an index file written by [BtIndex::write].
    pub fn open(loc: &ffi::OsStr) -> Result<BtIndex> {
        util::read_tagged_file(loc, FILE_MARKER)
    }
}

/// Forward cursor over [BtIndex] entries.
#[derive(Clone, Debug)]
pub struct BtCursor {
    idx: usize,
}

impl BtCursor {
    /// Return the `(key, value)` pair under the cursor and step forward.
    pub fn next(&mut self, index: &BtIndex, decomp: &seg::Decompressor) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        if self.idx >= index.offsets.len() {
            return Ok(None);
        }
        let (key, val_fpos) = decomp.word_at(index.offsets[self.idx])?;
        let (value, _) = decomp.word_at(val_fpos)?;
        self.idx += 1;
        Ok(Some((key, value)))
    }
}

#[cfg(test)]
#[path = "btidx_test.rs"]
mod btidx_test;
