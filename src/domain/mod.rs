//! Module `domain` implement one versioned key-value column.
//!
//! The latest value of every key lives in two store tables: `<name>.keys`
//! is dup-sorted `key → inverted-step` where `inverted-step` is the
//! bitwise complement of `txnum / step` in big-endian, so the newest step
//! marker sorts first among the duplicates. `<name>.vals` holds the value
//! under `key ∥ inverted-step`. Several step markers coexist for a key
//! until pruning catches up.
//!
//! Closing a step collates every key carrying that step's marker into a
//! `.kv` file of `key, value` word pairs, with a `.kvi` hash index and a
//! `.bt` btree for range seeks. Previous values flow into the embedded
//! [History]. Reads probe the store first, then the file stack newest
//! first.

use log::info;

use std::{
    ffi, fs,
    sync::{mpsc, Arc},
    thread, time,
};

use crate::{
    btidx::BtIndex,
    files::{FileItem, FileKind, FileName, FileSet},
    history::{History, HistoryReader},
    invidx::{self, IndexCollation},
    kv::{CursorDupSort, KvTx},
    mph::Mph,
    seg,
    util::Cancel,
    wal::Collector,
    Error, Result,
};

// pairs in flight between the store scan and the collator thread; a
// slow compressor blocks the scan here.
const COLLATE_QUEUE_SIZE: usize = 128;

/// Versioned key-value column: latest values plus history, store-resident
/// recent writes plus a layered stack of immutable files.
pub struct Domain {
    name: String,
    dir: ffi::OsString,
    step: u64,

    keys_table: String,
    vals_table: String,
    settings_table: String,
    files: FileSet,
    history: History,
    wal_keys: Collector,
    wal_vals: Collector,

    txnum: u64,
}

/// Collation of one closed step: the step's `(key, value)` pairs in key
/// order, along with the history collation of the same window.
pub struct DomainCollation {
    pub step_num: u64,
    pub pairs: Vec<(Vec<u8>, Vec<u8>)>,
    pub hist: IndexCollation,
}

impl DomainCollation {
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty() && self.hist.is_empty()
    }
}

/// Files built for one collation.
pub struct BuiltStep {
    pub values: Arc<FileItem>,
    pub hist_vals: Arc<FileItem>,
    pub hist_ef: Arc<FileItem>,
}

impl Domain {
    pub fn new(
        dir: &ffi::OsStr,
        name: &str,
        step: u64,
        wal_budget: usize,
        discard_wal: bool,
    ) -> Domain {
        let keys_table = format!("{}.keys", name);
        let vals_table = format!("{}.vals", name);
        let settings_table = format!("{}.settings", name);

        let (wal_keys, wal_vals) = if discard_wal {
            (Collector::discard(&keys_table), Collector::discard(&vals_table))
        } else {
            (
                Collector::new(&keys_table, true /*dup*/, wal_budget),
                Collector::new(&vals_table, false /*dup*/, wal_budget),
            )
        };

        Domain {
            name: name.to_string(),
            dir: dir.to_os_string(),
            step,
            keys_table,
            vals_table,
            settings_table,
            files: FileSet::new(dir, name, FileKind::Values, step),
            history: History::new(dir, name, step, wal_budget, discard_wal),
            wal_keys,
            wal_vals,
            txnum: 0,
        }
    }

    pub fn to_name(&self) -> String {
        self.name.clone()
    }

    pub fn set_txnum(&mut self, txnum: u64) {
        self.txnum = txnum;
        self.history.set_txnum(txnum);
    }

    pub fn reopen_folder(&self) -> Result<()> {
        self.files.scan_dir()?;
        self.history.reopen_folder()
    }

    pub fn as_files(&self) -> &FileSet {
        &self.files
    }

    pub fn as_history(&self) -> &History {
        &self.history
    }

    /// Highest txnum (exclusive) covered by value files.
    pub fn end_txnum_max(&self) -> u64 {
        self.files.end_txnum_max()
    }

    pub fn flush(&mut self, tx: &dyn KvTx) -> Result<()> {
        self.wal_keys.flush(tx)?;
        self.wal_vals.flush(tx)?;
        self.history.flush(tx)
    }

    /// Open a reader over the current file sets, values and history
    /// together. A pinned reader keeps its files alive until dropped;
    /// the writer path reads unpinned.
    pub fn reader(&self, pin: bool) -> DomainReader {
        DomainReader {
            keys_table: self.keys_table.clone(),
            vals_table: self.vals_table.clone(),
            files: match pin {
                true => self.files.pin_snapshot(),
                false => self.files.ro_files(),
            },
            hist: self.history.reader(pin),
            pinned: pin,
        }
    }

    /// Write `value` for `key` at the current txnum. Writing the value
    /// the key already holds is a no-op.
    pub fn put(&mut self, tx: &dyn KvTx, key: &[u8], value: &[u8]) -> Result<()> {
        let prev = self.latest_buffered(tx, key)?;
        if prev.as_deref() == Some(value) || (prev.is_none() && value.is_empty()) {
            return Ok(());
        }

        self.history.add_prev(tx, key, prev.as_deref().unwrap_or(b""))?;

        let marker = inv_step_bytes(self.txnum / self.step);
        self.wal_keys.collect(tx, key, &marker)?;
        let mut vkey = key.to_vec();
        vkey.extend_from_slice(&marker);
        self.wal_vals.collect(tx, &vkey, value)
    }

    /// Delete `key` at the current txnum. Deleting an absent key is a
    /// no-op.
    pub fn delete(&mut self, tx: &dyn KvTx, key: &[u8]) -> Result<()> {
        self.put(tx, key, b"")
    }

    // writer-path read, sees this txnum's still-buffered writes.
    fn latest_buffered(&self, tx: &dyn KvTx, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let marker = inv_step_bytes(self.txnum / self.step);
        let mut vkey = key.to_vec();
        vkey.extend_from_slice(&marker);
        if let Some(value) = self.wal_vals.get(&vkey) {
            return Ok(non_empty(value.clone()));
        }
        self.reader(false).get(tx, key)
    }

    /// Collate the closed step `step_num`: every key carrying the step's
    /// marker, with the value it held within that step, in key order.
    pub fn collate(
        &self,
        tx: &dyn KvTx,
        step_num: u64,
        cancel: &Cancel,
    ) -> Result<DomainCollation> {
        let marker = inv_step_bytes(step_num);

        let mut pairs: Vec<(Vec<u8>, Vec<u8>)> = vec![];
        let mut cursor = tx.cursor(&self.keys_table)?;
        let mut pair = cursor.first()?;
        while let Some((key, _)) = pair {
            cancel.check(&self.name)?;

            if cursor.seek_both_range(&key, &marker)?.as_deref() == Some(&marker[..]) {
                let mut vkey = key.clone();
                vkey.extend_from_slice(&marker);
                let value = tx.get_one(&self.vals_table, &vkey)?.unwrap_or_default();
                pairs.push((key.clone(), value));
            }

            // seek_both_range moved within the dups; hop to the next key.
            cursor.seek_exact(&key)?;
            pair = cursor.next_no_dup()?;
        }

        let hist = self.history.collate(tx, step_num, cancel)?;

        let val = DomainCollation {
            step_num,
            pairs,
            hist,
        };
        Ok(val)
    }

    /// Build the `.kv` + `.kvi` + `.bt` triple and the history files for
    /// a collation. The serial reference; [Domain::collate_stream]
    /// produces bit-identical data through a pipeline.
    pub fn build(
        &self,
        tx: &dyn KvTx,
        collation: &DomainCollation,
        cancel: &Cancel,
    ) -> Result<BuiltStep> {
        let (from_step, to_step) = (collation.step_num, collation.step_num + 1);
        let data_loc = self.values_loc(from_step, to_step, FileKind::Values.data_ext());
        let mut builder = seg::Builder::create(&data_loc, seg::FLUSH_QUEUE_SIZE)?;

        let mut mph_pairs: Vec<(Vec<u8>, u64)> = Vec::with_capacity(collation.pairs.len());
        let mut write = |builder: &mut seg::Builder| -> Result<()> {
            for (key, value) in collation.pairs.iter() {
                cancel.check(&self.name)?;
                let fpos = builder.add_word(key)?;
                builder.add_word(value)?;
                mph_pairs.push((key.clone(), fpos));
            }
            Ok(())
        };
        if let Err(err) = write(&mut builder) {
            builder.abort().ok();
            return Err(err);
        }

        let values = self.seal_values(builder, mph_pairs, from_step, to_step)?;
        let (hist_vals, hist_ef) = self.history.build(tx, &collation.hist, cancel)?;

        let val = BuiltStep {
            values,
            hist_vals,
            hist_ef,
        };
        Ok(val)
    }

    /// Pipelined collate-and-build of the values file: the store scan
    /// feeds a bounded queue, a collator thread compresses. Output bytes
    /// equal the serial [Domain::collate] + [Domain::build] path.
    pub fn collate_stream(
        &self,
        tx: &dyn KvTx,
        step_num: u64,
        cancel: &Cancel,
    ) -> Result<Arc<FileItem>> {
        let (from_step, to_step) = (step_num, step_num + 1);
        let data_loc = self.values_loc(from_step, to_step, FileKind::Values.data_ext());

        let (feed, pairs) = mpsc::sync_channel::<(Vec<u8>, Vec<u8>)>(COLLATE_QUEUE_SIZE);
        let collator = {
            let loc = data_loc.clone();
            let stats = self.values_stats(from_step, to_step, &time::SystemTime::now());
            thread::spawn(move || -> Result<Vec<(Vec<u8>, u64)>> {
                let mut builder = seg::Builder::create(&loc, seg::FLUSH_QUEUE_SIZE)?;
                let mut mph_pairs = vec![];
                for (key, value) in pairs {
                    let fpos = builder.add_word(&key)?;
                    builder.add_word(&value)?;
                    mph_pairs.push((key, fpos));
                }
                builder.finish(stats)?;
                Ok(mph_pairs)
            })
        };

        let marker = inv_step_bytes(step_num);
        let mut scan = || -> Result<()> {
            let mut cursor = tx.cursor(&self.keys_table)?;
            let mut pair = cursor.first()?;
            while let Some((key, _)) = pair {
                cancel.check(&self.name)?;

                if cursor.seek_both_range(&key, &marker)?.as_deref() == Some(&marker[..]) {
                    let mut vkey = key.clone();
                    vkey.extend_from_slice(&marker);
                    let value = tx.get_one(&self.vals_table, &vkey)?.unwrap_or_default();
                    err_at!(IPCFail, feed.send((key.clone(), value)), "{}", self.name)?;
                }

                cursor.seek_exact(&key)?;
                pair = cursor.next_no_dup()?;
            }
            Ok(())
        };

        let scanned = scan();
        drop(feed); // hang up, the collator drains and finishes
        let built = match collator.join() {
            Ok(built) => built,
            Err(err) => err_at!(ThreadFail, msg: "collator fail {:?}", err),
        };
        match (scanned, built) {
            (Ok(()), Ok(mph_pairs)) => self.seal_values_at(mph_pairs, from_step, to_step),
            (scanned, built) => {
                // cancellation or error: the collator has already closed
                // the partial output, remove it.
                fs::remove_file(&data_loc).ok();
                scanned?;
                built?;
                unreachable!()
            }
        }
    }

    // write .kvi and .bt for a finished values file, open and return it.
    fn seal_values(
        &self,
        builder: seg::Builder,
        mph_pairs: Vec<(Vec<u8>, u64)>,
        from_step: u64,
        to_step: u64,
    ) -> Result<Arc<FileItem>> {
        let start = time::SystemTime::now();
        builder.finish(self.values_stats(from_step, to_step, &start))?;
        self.seal_values_at(mph_pairs, from_step, to_step)
    }

    fn seal_values_at(
        &self,
        mph_pairs: Vec<(Vec<u8>, u64)>,
        from_step: u64,
        to_step: u64,
    ) -> Result<Arc<FileItem>> {
        let index_loc = self.values_loc(from_step, to_step, FileKind::Values.index_ext());
        Mph::build(&mph_pairs)?.write(&index_loc)?;

        let bt_loc = self.values_loc(from_step, to_step, crate::files::Ext::Bt);
        BtIndex::build(&mph_pairs).write(&bt_loc)?;

        let item = FileItem::open(
            &self.dir,
            &self.name,
            FileKind::Values,
            from_step,
            to_step,
            self.step,
        )?;
        Ok(Arc::new(item))
    }

    fn values_loc(&self, from_step: u64, to_step: u64, ext: crate::files::Ext) -> ffi::OsString {
        FileName::new(&self.name, from_step, to_step, ext).to_location(&self.dir)
    }

    fn values_stats(
        &self,
        from_step: u64,
        to_step: u64,
        start: &time::SystemTime,
    ) -> seg::Stats {
        seg::Stats {
            name: self.name.clone(),
            start_txnum: from_step * self.step,
            end_txnum: to_step * self.step,
            build_time: invidx::elapsed_nanos(start),
            epoch: invidx::epoch_secs(),
            ..seg::Stats::default()
        }
    }

    /// Register the files built for one step.
    pub fn integrate(&self, built: BuiltStep) {
        self.files.insert(built.values);
        self.history.integrate(built.hist_vals, built.hist_ef);
    }

    /// Drop the store-resident copy of the frozen step. A key's marker
    /// for `step_num` goes away only when a newer marker exists, the
    /// newest state always stays readable from the store. Idempotent and
    /// resumable, a rerun converges on the same state.
    pub fn prune(
        &self,
        tx: &dyn KvTx,
        step_num: u64,
        txfrom: u64,
        txto: u64,
        cancel: &Cancel,
    ) -> Result<usize> {
        let marker = inv_step_bytes(step_num);

        // phase one: collect victims.
        let mut victims: Vec<Vec<u8>> = vec![];
        {
            let mut cursor = tx.cursor(&self.keys_table)?;
            let mut pair = cursor.first()?;
            while let Some((key, newest_marker)) = pair {
                cancel.check(&self.name)?;

                let max_step = step_of_marker(&newest_marker)?;
                if max_step > step_num
                    && cursor.seek_both_range(&key, &marker)?.as_deref()
                        == Some(&marker[..])
                {
                    victims.push(key.clone());
                }

                cursor.seek_exact(&key)?;
                pair = cursor.next_no_dup()?;
            }
        }

        // phase two: delete marker and value.
        for key in victims.iter() {
            cancel.check(&self.name)?;
            tx.delete(&self.keys_table, key, Some(&marker))?;
            let mut vkey = key.clone();
            vkey.extend_from_slice(&marker);
            tx.delete(&self.vals_table, &vkey, None)?;
        }

        let n_hist = self.history.prune(tx, txfrom, txto, cancel)?;
        tx.put(&self.settings_table, b"pruned.step", &step_num.to_be_bytes())?;

        Ok(victims.len() + n_hist)
    }

    /// Merge the next eligible window of value files, then give history
    /// the same chance. Return whether anything merged.
    pub fn merge_step(&self, cancel: &Cancel) -> Result<bool> {
        let mut merged = false;

        if let Some((from, to, tiles)) = self.files.find_merge_range() {
            info!(
                target: "strata",
                "{}: merging values [{}, {}) from {} files", self.name, from, to, tiles.len()
            );
            let item = self.merge_values(from, to, &tiles, cancel)?;
            self.files.insert(item);
            self.files.retire(&tiles);
            merged = true;
        }

        if self.history.merge_step(cancel)?.is_some() {
            merged = true;
        }
        Ok(merged)
    }

    // streaming k-way merge of value files; on key collisions the slice
    // with the higher end_txnum supersedes.
    fn merge_values(
        &self,
        from: u64,
        to: u64,
        tiles: &[Arc<FileItem>],
        cancel: &Cancel,
    ) -> Result<Arc<FileItem>> {
        struct Source<'a> {
            iter: seg::WordIter<'a>,
            end_txnum: u64,
            peeked: Option<(Vec<u8>, Vec<u8>)>,
        }

        impl<'a> Source<'a> {
            fn pull(&mut self) -> Result<()> {
                self.peeked = match self.iter.next() {
                    None => None,
                    Some(word) => {
                        let (_, key) = word?;
                        let value = match self.iter.next() {
                            Some(word) => word?.1,
                            None => return err_at!(InvalidFile, msg: "odd values file"),
                        };
                        Some((key, value))
                    }
                };
                Ok(())
            }
        }

        let mut sources: Vec<Source> = vec![];
        for item in tiles.iter() {
            let mut source = Source {
                iter: item.decomp.iter(),
                end_txnum: item.end_txnum,
                peeked: None,
            };
            source.pull()?;
            sources.push(source);
        }

        let (from_step, to_step) = (from / self.step, to / self.step);
        let data_loc = self.values_loc(from_step, to_step, FileKind::Values.data_ext());
        let mut builder = seg::Builder::create(&data_loc, seg::FLUSH_QUEUE_SIZE)?;

        let mut mph_pairs: Vec<(Vec<u8>, u64)> = vec![];
        let mut write = |builder: &mut seg::Builder| -> Result<()> {
            loop {
                cancel.check(&self.name)?;

                let key = match sources
                    .iter()
                    .filter_map(|s| s.peeked.as_ref().map(|(key, _)| key))
                    .min()
                {
                    Some(key) => key.clone(),
                    None => break Ok(()),
                };

                let mut newest: Option<(u64, Vec<u8>)> = None;
                for source in sources.iter_mut() {
                    let matched = match &source.peeked {
                        Some((k, _)) => k == &key,
                        None => false,
                    };
                    if matched {
                        let (_, value) = source.peeked.take().unwrap();
                        if newest.as_ref().map(|(end, _)| *end).unwrap_or(0)
                            < source.end_txnum
                        {
                            newest = Some((source.end_txnum, value));
                        }
                        source.pull()?;
                    }
                }

                let fpos = builder.add_word(&key)?;
                builder.add_word(&newest.unwrap().1)?;
                mph_pairs.push((key, fpos));
            }
        };
        if let Err(err) = write(&mut builder) {
            builder.abort().ok();
            return Err(err);
        }

        self.seal_values(builder, mph_pairs, from_step, to_step)
    }

}

/// Snapshot reader over a domain: pinned (or borrowed) value files, the
/// history reader, and the store tables behind a transaction.
pub struct DomainReader {
    keys_table: String,
    vals_table: String,
    files: Vec<Arc<FileItem>>,
    hist: HistoryReader,
    pinned: bool,
}

impl Drop for DomainReader {
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

impl DomainReader {
    pub fn as_items(&self) -> &[Arc<FileItem>] {
        &self.files
    }

    pub fn as_history(&self) -> &HistoryReader {
        &self.hist
    }

    /// Latest value: the store, then the file stack newest first.
    pub fn get(&self, tx: &dyn KvTx, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut cursor = tx.cursor(&self.keys_table)?;
        if let Some((_, marker)) = cursor.seek_exact(key)? {
            let mut vkey = key.to_vec();
            vkey.extend_from_slice(&marker);
            if let Some(value) = tx.get_one(&self.vals_table, &vkey)? {
                return Ok(non_empty(value));
            }
        }

        for item in self.files.iter().rev() {
            let bindex = match &item.bindex {
                Some(bindex) => bindex,
                None => continue,
            };
            if let Some(value) = bindex.get(&item.decomp, key)? {
                return Ok(non_empty(value));
            }
        }
        Ok(None)
    }

    /// Value as of `txnum`: what the key held just before that txnum.
    pub fn get_before_txnum(
        &self,
        tx: &dyn KvTx,
        key: &[u8],
        txnum: u64,
    ) -> Result<Option<Vec<u8>>> {
        match self.hist.get_before(tx, key, txnum)? {
            Some(prev) => Ok(non_empty(prev)),
            // never overwritten at or after txnum: the latest value was
            // already current back then.
            None => self.get(tx, key),
        }
    }

    /// Merge-iterate the store and every live value file for keys under
    /// `prefix`, each key yielded once with its newest non-deleted value.
    pub fn iterate_prefix<'a>(
        &self,
        tx: &'a dyn KvTx,
        prefix: &[u8],
    ) -> Result<PrefixIter<'a>> {
        let mut sources: Vec<PrefixSource<'a>> = vec![];

        for item in self.files.iter() {
            if item.bindex.is_none() {
                continue;
            }
            let cursor = item.bindex.as_ref().unwrap().seek(&item.decomp, prefix)?;
            let mut source = PrefixSource::Slice {
                item: Arc::clone(item),
                cursor,
                prefix: prefix.to_vec(),
                peeked: None,
            };
            source.pull(tx, &self.vals_table)?;
            sources.push(source);
        }

        let mut source = PrefixSource::Store {
            cursor: tx.cursor(&self.keys_table)?,
            prefix: prefix.to_vec(),
            started: false,
            peeked: None,
        };
        source.pull(tx, &self.vals_table)?;
        sources.push(source);

        Ok(PrefixIter {
            vals_table: self.vals_table.clone(),
            tx,
            sources,
        })
    }
}

enum PrefixSource<'a> {
    Store {
        cursor: Box<dyn CursorDupSort + 'a>,
        prefix: Vec<u8>,
        started: bool,
        peeked: Option<(Vec<u8>, Vec<u8>)>,
    },
    Slice {
        item: Arc<FileItem>,
        cursor: crate::btidx::BtCursor,
        prefix: Vec<u8>,
        peeked: Option<(Vec<u8>, Vec<u8>)>,
    },
}

impl<'a> PrefixSource<'a> {
    // newest-state priority: the store outranks every file, files rank
    // by end_txnum.
    fn priority(&self) -> u64 {
        match self {
            PrefixSource::Store { .. } => u64::MAX,
            PrefixSource::Slice { item, .. } => item.end_txnum,
        }
    }

    fn peeked(&self) -> &Option<(Vec<u8>, Vec<u8>)> {
        match self {
            PrefixSource::Store { peeked, .. } => peeked,
            PrefixSource::Slice { peeked, .. } => peeked,
        }
    }

    fn take_peeked(&mut self) -> Option<(Vec<u8>, Vec<u8>)> {
        match self {
            PrefixSource::Store { peeked, .. } => peeked.take(),
            PrefixSource::Slice { peeked, .. } => peeked.take(),
        }
    }

    fn pull(&mut self, tx: &'a dyn KvTx, vals_table: &str) -> Result<()> {
        match self {
            PrefixSource::Store {
                cursor,
                prefix,
                started,
                peeked,
            } => {
                let pair = if !*started {
                    *started = true;
                    cursor.seek(prefix)?
                } else {
                    cursor.next_no_dup()?
                };
                *peeked = match pair {
                    Some((key, marker)) if key.starts_with(prefix) => {
                        let mut vkey = key.clone();
                        vkey.extend_from_slice(&marker);
                        let value = tx.get_one(vals_table, &vkey)?.unwrap_or_default();
                        Some((key, value))
                    }
                    _ => None,
                };
            }
            PrefixSource::Slice {
                item,
                cursor,
                prefix,
                peeked,
            } => {
                let bindex = item.bindex.as_ref().unwrap();
                *peeked = match cursor.next(bindex, &item.decomp)? {
                    Some((key, value)) if key.starts_with(prefix) => Some((key, value)),
                    _ => None,
                };
            }
        }
        Ok(())
    }
}

/// Iterator over unique keys under a prefix, newest value per key,
/// deleted keys skipped. Union of the store and the file stack.
pub struct PrefixIter<'a> {
    vals_table: String,
    tx: &'a dyn KvTx,
    sources: Vec<PrefixSource<'a>>,
}

impl<'a> Iterator for PrefixIter<'a> {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let key = self
                .sources
                .iter()
                .filter_map(|s| s.peeked().as_ref().map(|(key, _)| key))
                .min()?
                .clone();

            let mut newest: Option<(u64, Vec<u8>)> = None;
            for source in self.sources.iter_mut() {
                let matched = match source.peeked() {
                    Some((k, _)) => k == &key,
                    None => false,
                };
                if matched {
                    let (_, value) = source.take_peeked().unwrap();
                    let rank = source.priority();
                    if newest.as_ref().map(|(r, _)| *r).unwrap_or(0) <= rank {
                        newest = Some((rank, value));
                    }
                    if let Err(err) = source.pull(self.tx, &self.vals_table) {
                        return Some(Err(err));
                    }
                }
            }

            let (_, value) = newest.unwrap();
            if !value.is_empty() {
                return Some(Ok((key, value)));
            }
            // deleted under its newest state: not yielded.
        }
    }
}

/// Inverted step marker: complement of the step number, big-endian, so
/// newer steps sort first in a dup-sorted table.
pub fn inv_step_bytes(step_num: u64) -> [u8; 8] {
    (!step_num).to_be_bytes()
}

pub fn step_of_marker(marker: &[u8]) -> Result<u64> {
    Ok(!invidx::parse_txnum(marker)?)
}

fn non_empty(value: Vec<u8>) -> Option<Vec<u8>> {
    match value.is_empty() {
        true => None,
        false => Some(value),
    }
}
