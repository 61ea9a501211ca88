//! Module `invidx` implement the per-key posting list of txnums.
//!
//! Recent posts live in two dup-sorted tables: `<name>.keys` maps a
//! big-endian txnum to every key touched at that txnum, `<name>.idx` is
//! the reverse, key to txnum. The forward table drives collation and
//! pruning by txnum range, the reverse table answers per-key queries.
//!
//! A frozen step becomes an `.ef` file of `key, elias-fano` word pairs in
//! key-sorted order, with an `.efi` index from key to the key word's
//! offset. Iterators compose frozen and recent posts by k-way merge,
//! yielding each txnum once, in ascending order.

use croaring::bitmap::Bitmap;
use log::info;

use std::{
    collections::BTreeMap,
    convert::TryFrom,
    ffi,
    sync::Arc,
    time,
};

use crate::{
    ef::EliasFano,
    files::{FileItem, FileKind, FileName, FileSet},
    kv::{CursorDupSort, KvTx},
    mph::Mph,
    seg,
    util::Cancel,
    wal::Collector,
    Error, Result,
};

/// Append-only inverted index, key to ascending posting list of txnums.
pub struct InvertedIndex {
    name: String,
    dir: ffi::OsString,
    step: u64,

    keys_table: String,
    idx_table: String,
    files: FileSet,
    wal_keys: Collector,
    wal_idx: Collector,

    txnum: u64,
}

/// Collation of one step: key to the set of txnums posted within the
/// step window, held as offsets into the window.
pub struct IndexCollation {
    pub txfrom: u64,
    pub txto: u64,
    pub bitmaps: BTreeMap<Vec<u8>, Bitmap>,
}

impl IndexCollation {
    pub fn is_empty(&self) -> bool {
        self.bitmaps.is_empty()
    }

    /// Ascending txnums posted for `key`.
    pub fn postings(&self, key: &[u8]) -> Vec<u64> {
        match self.bitmaps.get(key) {
            Some(bitmap) => bitmap.iter().map(|off| self.txfrom + u64::from(off)).collect(),
            None => vec![],
        }
    }
}

impl InvertedIndex {
    /// `name` doubles as the file base, `accounts`, `logaddrs` and co.
    /// With `discard_wal` all incoming posts are dropped.
    pub fn new(
        dir: &ffi::OsStr,
        name: &str,
        step: u64,
        wal_budget: usize,
        discard_wal: bool,
    ) -> InvertedIndex {
        let keys_table = format!("{}.keys", name);
        let idx_table = format!("{}.idx", name);
        Self::new_with_tables(dir, name, &keys_table, &idx_table, step, wal_budget, discard_wal)
    }

    /// Constructor with explicit table names, used when this index is
    /// embedded inside a history.
    pub fn new_with_tables(
        dir: &ffi::OsStr,
        name: &str,
        keys_table: &str,
        idx_table: &str,
        step: u64,
        wal_budget: usize,
        discard_wal: bool,
    ) -> InvertedIndex {
        assert!(step > 0 && step <= u64::from(u32::MAX), "step {}", step);

        let keys_table = keys_table.to_string();
        let idx_table = idx_table.to_string();
        let (wal_keys, wal_idx) = if discard_wal {
            (Collector::discard(&keys_table), Collector::discard(&idx_table))
        } else {
            (
                Collector::new(&keys_table, true /*dup*/, wal_budget),
                Collector::new(&idx_table, true /*dup*/, wal_budget),
            )
        };

        InvertedIndex {
            name: name.to_string(),
            dir: dir.to_os_string(),
            step,
            keys_table,
            idx_table,
            files: FileSet::new(dir, name, FileKind::Postings, step),
            wal_keys,
            wal_idx,
            txnum: 0,
        }
    }

    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    pub fn set_txnum(&mut self, txnum: u64) {
        self.txnum = txnum;
    }

    /// Re-scan the data directory for posting files.
    pub fn reopen_folder(&self) -> Result<()> {
        self.files.scan_dir()
    }

    pub fn as_files(&self) -> &FileSet {
        &self.files
    }

    /// Highest txnum (exclusive) covered by posting files.
    pub fn end_txnum_max(&self) -> u64 {
        self.files.end_txnum_max()
    }

    /// Post `key` at the current txnum.
    pub fn add(&mut self, tx: &dyn KvTx, key: &[u8]) -> Result<()> {
        let txnum = self.txnum.to_be_bytes();
        self.wal_keys.collect(tx, &txnum, key)?;
        self.wal_idx.collect(tx, key, &txnum)?;
        Ok(())
    }

    /// Drain buffered posts into the store.
    pub fn flush(&mut self, tx: &dyn KvTx) -> Result<()> {
        self.wal_keys.flush(tx)?;
        self.wal_idx.flush(tx)
    }

    /// Collate the closed step `step_num` out of the store.
    pub fn collate(
        &self,
        tx: &dyn KvTx,
        step_num: u64,
        cancel: &Cancel,
    ) -> Result<IndexCollation> {
        let txfrom = step_num * self.step;
        let txto = txfrom + self.step;

        let mut bitmaps: BTreeMap<Vec<u8>, Bitmap> = BTreeMap::new();
        let mut cursor = tx.cursor(&self.keys_table)?;
        let mut pair = cursor.seek(&txfrom.to_be_bytes())?;
        while let Some((txnum_key, key)) = pair {
            cancel.check(&self.name)?;

            let txnum = parse_txnum(&txnum_key)?;
            if txnum >= txto {
                break;
            }
            let off = u32::try_from(txnum - txfrom).unwrap();
            bitmaps.entry(key).or_insert_with(Bitmap::create).add(off);

            pair = cursor.next()?;
        }

        let val = IndexCollation {
            txfrom,
            txto,
            bitmaps,
        };
        Ok(val)
    }

    /// Build the `.ef` + `.efi` pair for a collation and register the
    /// new slice.
    pub fn build(&self, collation: &IndexCollation, cancel: &Cancel) -> Result<Arc<FileItem>> {
        let from_step = collation.txfrom / self.step;
        let to_step = collation.txto / self.step;
        let postings: Vec<(&Vec<u8>, Vec<u64>)> = collation
            .bitmaps
            .iter()
            .map(|(key, _)| (key, collation.postings(key)))
            .collect();

        let item = self.build_file(from_step, to_step, &postings, cancel)?;
        Ok(item)
    }

    pub fn integrate(&self, item: Arc<FileItem>) {
        self.files.insert(item);
    }

    /// Delete store-resident posts within `[txfrom, txto)`. Two phases:
    /// collect the victims, then drop both the forward and the reverse
    /// entry. Idempotent, a rerun finds nothing left to delete. Return
    /// the deleted `(txnum, key)` pairs.
    pub fn prune(
        &self,
        tx: &dyn KvTx,
        txfrom: u64,
        txto: u64,
        cancel: &Cancel,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut victims: Vec<(Vec<u8>, Vec<u8>)> = vec![];
        {
            let mut cursor = tx.cursor(&self.keys_table)?;
            let mut pair = cursor.seek(&txfrom.to_be_bytes())?;
            while let Some((txnum_key, key)) = pair {
                cancel.check(&self.name)?;
                if parse_txnum(&txnum_key)? >= txto {
                    break;
                }
                victims.push((txnum_key, key));
                pair = cursor.next()?;
            }
        }

        for (txnum_key, key) in victims.iter() {
            cancel.check(&self.name)?;
            tx.delete(&self.keys_table, txnum_key, Some(key))?;
            tx.delete(&self.idx_table, key, Some(txnum_key))?;
        }
        Ok(victims)
    }

    /// Open a reader over the current file set. A pinned reader keeps
    /// its files alive until dropped; the writer path reads unpinned.
    pub fn reader(&self, pin: bool) -> IndexReader {
        IndexReader {
            idx_table: self.idx_table.clone(),
            files: match pin {
                true => self.files.pin_snapshot(),
                false => self.files.ro_files(),
            },
            pinned: pin,
        }
    }

    /// Merge the next eligible window of posting files, if any. Return
    /// the retired inputs.
    pub fn merge_step(&self, cancel: &Cancel) -> Result<Option<Vec<Arc<FileItem>>>> {
        let (from, to, tiles) = match self.files.find_merge_range() {
            Some(range) => range,
            None => return Ok(None),
        };
        let item = self.merge_window(from, to, &tiles, cancel)?;
        self.integrate(item);
        self.files.retire(&tiles);
        Ok(Some(tiles))
    }

    /// Merge the tiles of `[from, to)` into one posting file.
    pub fn merge_window(
        &self,
        from: u64,
        to: u64,
        tiles: &[Arc<FileItem>],
        cancel: &Cancel,
    ) -> Result<Arc<FileItem>> {
        info!(
            target: "strata",
            "{}: merging postings [{}, {}) from {} files", self.name, from, to, tiles.len()
        );

        let merged = union_postings(tiles, cancel)?;
        let postings: Vec<(&Vec<u8>, Vec<u64>)> =
            merged.iter().map(|(key, postings)| (key, postings.clone())).collect();
        self.build_file(from / self.step, to / self.step, &postings, cancel)
    }

    fn build_file(
        &self,
        from_step: u64,
        to_step: u64,
        postings: &[(&Vec<u8>, Vec<u64>)],
        cancel: &Cancel,
    ) -> Result<Arc<FileItem>> {
        let start = time::SystemTime::now();

        let data_loc =
            FileName::new(&self.name, from_step, to_step, FileKind::Postings.data_ext())
                .to_location(&self.dir);
        let mut builder = seg::Builder::create(&data_loc, seg::FLUSH_QUEUE_SIZE)?;

        let mut mph_pairs: Vec<(Vec<u8>, u64)> = Vec::with_capacity(postings.len());
        let mut write = |builder: &mut seg::Builder| -> Result<()> {
            for (key, txnums) in postings.iter() {
                cancel.check(&self.name)?;
                let fpos = builder.add_word(key)?;
                builder.add_word(&EliasFano::from_values(txnums)?.encode())?;
                mph_pairs.push((key.to_vec(), fpos));
            }
            Ok(())
        };
        if let Err(err) = write(&mut builder) {
            builder.abort().ok();
            return Err(err);
        }

        let stats = seg::Stats {
            name: self.name.clone(),
            start_txnum: from_step * self.step,
            end_txnum: to_step * self.step,
            build_time: elapsed_nanos(&start),
            epoch: epoch_secs(),
            ..seg::Stats::default()
        };
        builder.finish(stats)?;

        let index_loc =
            FileName::new(&self.name, from_step, to_step, FileKind::Postings.index_ext())
                .to_location(&self.dir);
        Mph::build(&mph_pairs)?.write(&index_loc)?;

        let item = FileItem::open(
            &self.dir,
            &self.name,
            FileKind::Postings,
            from_step,
            to_step,
            self.step,
        )?;
        Ok(Arc::new(item))
    }
}

/// Snapshot reader over an inverted index: a pinned (or borrowed) view
/// of the posting files plus the store tables behind a transaction.
pub struct IndexReader {
    idx_table: String,
    files: Vec<Arc<FileItem>>,
    pinned: bool,
}

impl Drop for IndexReader {
    fn drop(&mut self) {
        if self.pinned {
            for item in self.files.iter() {
                if item.unpin() {
                    item.remove_files();
                }
            }
        }
    }
}

impl IndexReader {
    pub fn as_items(&self) -> &[Arc<FileItem>] {
        &self.files
    }

    /// Smallest posting `>= lo` for `key`, files and store combined.
    pub fn seek(&self, tx: &dyn KvTx, key: &[u8], lo: u64) -> Result<Option<u64>> {
        // posting files, oldest first; postings are span-local, the
        // first hit is the global smallest at-or-after `lo`.
        for item in self.files.iter() {
            if item.end_txnum <= lo {
                continue;
            }
            if let Some(ef) = read_postings(item, key)? {
                if let Some(txnum) = ef.seek(lo) {
                    return Ok(Some(txnum));
                }
            }
        }

        // fall through to the store.
        let mut cursor = tx.cursor(&self.idx_table)?;
        match cursor.seek_both_range(key, &lo.to_be_bytes())? {
            Some(txnum_key) => Ok(Some(parse_txnum(&txnum_key)?)),
            None => Ok(None),
        }
    }

    /// Lazy ascending iterator of postings for `key` within `[from, to)`,
    /// frozen and recent sources merged, duplicates collapsed.
    pub fn iter<'a>(
        &self,
        tx: &'a dyn KvTx,
        key: &[u8],
        from: u64,
        to: u64,
    ) -> Result<TxnumIter<'a>> {
        let mut sources: Vec<Source<'a>> = vec![];
        for item in self.files.iter() {
            if item.end_txnum <= from || item.start_txnum >= to {
                continue;
            }
            if let Some(ef) = read_postings(item, key)? {
                let values: Vec<u64> = ef
                    .iter()
                    .filter(|txnum| *txnum >= from && *txnum < to)
                    .collect();
                if !values.is_empty() {
                    sources.push(Source::Frozen(values.into_iter()));
                }
            }
        }
        sources.push(Source::Recent {
            cursor: tx.cursor(&self.idx_table)?,
            key: key.to_vec(),
            from,
            primed: false,
        });

        Ok(TxnumIter {
            sources,
            peeked: None,
            to,
        })
    }
}

/// Union of per-key postings across posting files. The inputs cover
/// disjoint txnum spans, so per-key lists concatenate sorted; sort-dedup
/// guards against overlapping inputs all the same.
pub fn union_postings(
    tiles: &[Arc<FileItem>],
    cancel: &Cancel,
) -> Result<BTreeMap<Vec<u8>, Vec<u64>>> {
    let mut merged: BTreeMap<Vec<u8>, Vec<u64>> = BTreeMap::new();
    for item in tiles.iter() {
        let mut words = item.decomp.iter();
        while let Some(word) = words.next() {
            cancel.check("posting-merge")?;
            let (_, key) = word?;
            let (_, efw) = match words.next() {
                Some(word) => word?,
                None => return err_at!(InvalidFile, msg: "odd posting file"),
            };
            let ef = EliasFano::decode(&efw)?;
            merged.entry(key).or_default().extend(ef.iter());
        }
    }
    for postings in merged.values_mut() {
        postings.sort_unstable();
        postings.dedup();
    }
    Ok(merged)
}

/// Read the decoded posting list for `key` out of one posting file.
pub fn read_postings(item: &FileItem, key: &[u8]) -> Result<Option<EliasFano>> {
    let offset = match item.index.lookup(key) {
        Some(offset) => offset,
        None => return Ok(None),
    };
    let (word, next) = item.decomp.word_at(offset)?;
    if word.as_slice() != key {
        return Ok(None); // index landed on another member's slot
    }
    let (efw, _) = item.decomp.word_at(next)?;
    Ok(Some(EliasFano::decode(&efw)?))
}

enum Source<'a> {
    Frozen(std::vec::IntoIter<u64>),
    Recent {
        cursor: Box<dyn CursorDupSort + 'a>,
        key: Vec<u8>,
        from: u64,
        primed: bool,
    },
}

impl<'a> Source<'a> {
    fn pull(&mut self) -> Result<Option<u64>> {
        match self {
            Source::Frozen(iter) => Ok(iter.next()),
            Source::Recent {
                cursor,
                key,
                from,
                primed,
            } => {
                let pair = if !*primed {
                    *primed = true;
                    cursor
                        .seek_both_range(key, &from.to_be_bytes())?
                        .map(|val| (key.clone(), val))
                } else {
                    cursor.next_dup()?
                };
                match pair {
                    Some((_, txnum_key)) => Ok(Some(parse_txnum(&txnum_key)?)),
                    None => Ok(None),
                }
            }
        }
    }
}

/// Ascending, duplicate-free iterator over posting txnums, k-way merged
/// from frozen and recent sources.
pub struct TxnumIter<'a> {
    sources: Vec<Source<'a>>,
    peeked: Option<Vec<Option<u64>>>,
    to: u64,
}

impl<'a> Iterator for TxnumIter<'a> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.peeked.is_none() {
            let mut peeked = Vec::with_capacity(self.sources.len());
            for source in self.sources.iter_mut() {
                match source.pull() {
                    Ok(head) => peeked.push(head),
                    Err(err) => return Some(Err(err)),
                }
            }
            self.peeked = Some(peeked);
        }

        let peeked = self.peeked.as_mut().unwrap();
        let head = peeked.iter().filter_map(|head| *head).min()?;
        if head >= self.to {
            return None; // sources are ascending, nothing below `to` left
        }
        for (n, source) in self.sources.iter_mut().enumerate() {
            if peeked[n] == Some(head) {
                match source.pull() {
                    Ok(next) => peeked[n] = next,
                    Err(err) => return Some(Err(err)),
                }
            }
        }
        Some(Ok(head))
    }
}

pub(crate) fn parse_txnum(data: &[u8]) -> Result<u64> {
    match <[u8; 8]>::try_from(data) {
        Ok(buf) => Ok(u64::from_be_bytes(buf)),
        Err(_) => err_at!(InvalidInput, msg: "txnum key {} bytes", data.len()),
    }
}

pub(crate) fn elapsed_nanos(start: &time::SystemTime) -> u64 {
    start
        .elapsed()
        .ok()
        .and_then(|elapsed| u64::try_from(elapsed.as_nanos()).ok())
        .unwrap_or(0)
}

pub(crate) fn epoch_secs() -> u64 {
    time::UNIX_EPOCH
        .elapsed()
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
