//! Module `history` implement the per-key stream of previous values.
//!
//! Every overwrite of a domain key records the value the key held just
//! before the overwriting txnum. The txnums themselves live in an embedded
//! [InvertedIndex]; the previous values live in `<name>.history.vals`
//! keyed `key ∥ txnum`, and freeze into `.v` files with a `.vi` index.
//!
//! Answering "value before txnum T" reduces to finding the smallest
//! posting `>= T` for the key: the value stored at that posting is the
//! value the key held at T. No posting at or after T means the key was
//! never overwritten since, and the caller falls through to the latest
//! value.
//!
//! The `.vi` index maps `key ∥ txnum` straight to the value word, there is
//! no key word to verify against. Lookups must only be issued for postings
//! confirmed through the paired `.ef` file, see [History::get_before].

use std::{ffi, sync::Arc, time};

use crate::{
    files::{FileItem, FileKind, FileName, FileSet},
    invidx::{self, IndexCollation, InvertedIndex},
    kv::KvTx,
    mph::Mph,
    seg,
    util::Cancel,
    wal::Collector,
    Error, Result,
};

/// Previous-value stream for one domain, layered over an inverted index.
pub struct History {
    name: String,
    dir: ffi::OsString,
    step: u64,

    vals_table: String,
    ii: InvertedIndex,
    files: FileSet,
    wal_vals: Collector,

    txnum: u64,
}

impl History {
    pub fn new(
        dir: &ffi::OsStr,
        name: &str,
        step: u64,
        wal_budget: usize,
        discard_wal: bool,
    ) -> History {
        let vals_table = format!("{}.history.vals", name);
        let keys_table = format!("{}.history.keys", name);
        let idx_table = format!("{}.idx", name);

        let wal_vals = if discard_wal {
            Collector::discard(&vals_table)
        } else {
            Collector::new(&vals_table, false /*dup*/, wal_budget)
        };

        History {
            name: name.to_string(),
            dir: dir.to_os_string(),
            step,
            vals_table,
            ii: InvertedIndex::new_with_tables(
                dir,
                name,
                &keys_table,
                &idx_table,
                step,
                wal_budget,
                discard_wal,
            ),
            files: FileSet::new(dir, name, FileKind::History, step),
            wal_vals,
            txnum: 0,
        }
    }

    pub fn set_txnum(&mut self, txnum: u64) {
        self.txnum = txnum;
        self.ii.set_txnum(txnum);
    }

    pub fn reopen_folder(&self) -> Result<()> {
        self.files.scan_dir()?;
        self.ii.reopen_folder()
    }

    pub fn as_files(&self) -> &FileSet {
        &self.files
    }

    pub fn as_index(&self) -> &InvertedIndex {
        &self.ii
    }

    /// Record that the key held `prev` just before the current txnum.
    /// An empty `prev` means the key did not exist. Repeated writes of a
    /// key within one txnum keep the first recording, that is the state
    /// the whole txnum saw.
    pub fn add_prev(&mut self, tx: &dyn KvTx, key: &[u8], prev: &[u8]) -> Result<()> {
        let mut vkey = key.to_vec();
        vkey.extend_from_slice(&self.txnum.to_be_bytes());
        if self.wal_vals.contains(&vkey) {
            return Ok(());
        }
        self.ii.add(tx, key)?;
        self.wal_vals.collect(tx, &vkey, prev)
    }

    pub fn flush(&mut self, tx: &dyn KvTx) -> Result<()> {
        self.wal_vals.flush(tx)?;
        self.ii.flush(tx)
    }

    /// Collate the closed step's overwrite events, key to txnum set.
    pub fn collate(
        &self,
        tx: &dyn KvTx,
        step_num: u64,
        cancel: &Cancel,
    ) -> Result<IndexCollation> {
        self.ii.collate(tx, step_num, cancel)
    }

    /// Build the `.v` + `.vi` pair and the posting `.ef` + `.efi` pair
    /// for a collation, reading the previous values out of the store.
    pub fn build(
        &self,
        tx: &dyn KvTx,
        collation: &IndexCollation,
        cancel: &Cancel,
    ) -> Result<(Arc<FileItem>, Arc<FileItem>)> {
        let ef_item = self.ii.build(collation, cancel)?;

        let start = time::SystemTime::now();
        let (from_step, to_step) =
            (collation.txfrom / self.step, collation.txto / self.step);
        let data_loc = FileName::new(&self.name, from_step, to_step, FileKind::History.data_ext())
            .to_location(&self.dir);
        let mut builder = seg::Builder::create(&data_loc, seg::FLUSH_QUEUE_SIZE)?;

        let mut mph_pairs: Vec<(Vec<u8>, u64)> = vec![];
        let mut write = |builder: &mut seg::Builder| -> Result<()> {
            for key in collation.bitmaps.keys() {
                for txnum in collation.postings(key) {
                    cancel.check(&self.name)?;

                    let mut vkey = key.clone();
                    vkey.extend_from_slice(&txnum.to_be_bytes());
                    let prev = tx.get_one(&self.vals_table, &vkey)?.unwrap_or_default();

                    let fpos = builder.add_word(&prev)?;
                    mph_pairs.push((vkey, fpos));
                }
            }
            Ok(())
        };
        if let Err(err) = write(&mut builder) {
            builder.abort().ok();
            return Err(err);
        }

        let stats = seg::Stats {
            name: self.name.clone(),
            start_txnum: collation.txfrom,
            end_txnum: collation.txto,
            build_time: invidx::elapsed_nanos(&start),
            epoch: invidx::epoch_secs(),
            ..seg::Stats::default()
        };
        builder.finish(stats)?;

        let index_loc =
            FileName::new(&self.name, from_step, to_step, FileKind::History.index_ext())
                .to_location(&self.dir);
        Mph::build(&mph_pairs)?.write(&index_loc)?;

        let v_item = FileItem::open(
            &self.dir,
            &self.name,
            FileKind::History,
            from_step,
            to_step,
            self.step,
        )?;
        Ok((Arc::new(v_item), ef_item))
    }

    pub fn integrate(&self, v_item: Arc<FileItem>, ef_item: Arc<FileItem>) {
        self.files.insert(v_item);
        self.ii.integrate(ef_item);
    }

    /// Delete store-resident history within `[txfrom, txto)`: the posts
    /// through the embedded index, and the previous values they stamp.
    pub fn prune(
        &self,
        tx: &dyn KvTx,
        txfrom: u64,
        txto: u64,
        cancel: &Cancel,
    ) -> Result<usize> {
        let victims = self.ii.prune(tx, txfrom, txto, cancel)?;
        for (txnum_key, key) in victims.iter() {
            cancel.check(&self.name)?;
            let mut vkey = key.clone();
            vkey.extend_from_slice(txnum_key);
            tx.delete(&self.vals_table, &vkey, None)?;
        }
        Ok(victims.len())
    }

    /// Merge the next eligible window of history files, `.v` and `.ef`
    /// in lockstep. Return the retired `(v, ef)` inputs.
    #[allow(clippy::type_complexity)]
    pub fn merge_step(
        &self,
        cancel: &Cancel,
    ) -> Result<Option<(Vec<Arc<FileItem>>, Vec<Arc<FileItem>>)>> {
        let (from, to, ef_tiles) = match self.ii.as_files().find_merge_range() {
            Some(range) => range,
            None => return Ok(None),
        };
        // value files are built in lockstep with posting files, the same
        // window must tile here as well.
        let v_tiles = match self.files.tiles_of(from, to) {
            Some(tiles) => tiles,
            None => return err_at!(Fatal, msg: "{}: value files lag postings", self.name),
        };

        let start = time::SystemTime::now();
        let (from_step, to_step) = (from / self.step, to / self.step);
        let postings = invidx::union_postings(&ef_tiles, cancel)?;

        let data_loc = FileName::new(&self.name, from_step, to_step, FileKind::History.data_ext())
            .to_location(&self.dir);
        let mut builder = seg::Builder::create(&data_loc, seg::FLUSH_QUEUE_SIZE)?;

        let mut mph_pairs: Vec<(Vec<u8>, u64)> = vec![];
        let mut write = |builder: &mut seg::Builder| -> Result<()> {
            for (key, txnums) in postings.iter() {
                for txnum in txnums.iter() {
                    cancel.check(&self.name)?;

                    let mut vkey = key.clone();
                    vkey.extend_from_slice(&txnum.to_be_bytes());
                    let source = v_tiles
                        .iter()
                        .find(|item| item.start_txnum <= *txnum && *txnum < item.end_txnum);
                    let prev = match source.and_then(|item| item.index.lookup(&vkey)) {
                        Some(offset) => source.unwrap().decomp.word_at(offset)?.0,
                        None => {
                            return err_at!(
                                Fatal, msg: "{}: no value file covers {}", self.name, txnum
                            )
                        }
                    };

                    let fpos = builder.add_word(&prev)?;
                    mph_pairs.push((vkey, fpos));
                }
            }
            Ok(())
        };
        if let Err(err) = write(&mut builder) {
            builder.abort().ok();
            return Err(err);
        }

        let stats = seg::Stats {
            name: self.name.clone(),
            start_txnum: from,
            end_txnum: to,
            build_time: invidx::elapsed_nanos(&start),
            epoch: invidx::epoch_secs(),
            ..seg::Stats::default()
        };
        builder.finish(stats)?;

        let index_loc =
            FileName::new(&self.name, from_step, to_step, FileKind::History.index_ext())
                .to_location(&self.dir);
        Mph::build(&mph_pairs)?.write(&index_loc)?;

        let v_item = Arc::new(FileItem::open(
            &self.dir,
            &self.name,
            FileKind::History,
            from_step,
            to_step,
            self.step,
        )?);
        let ef_item = self.ii.merge_window(from, to, &ef_tiles, cancel)?;

        self.integrate(v_item, ef_item);
        self.files.retire(&v_tiles);
        self.ii.as_files().retire(&ef_tiles);
        Ok(Some((v_tiles, ef_tiles)))
    }

    /// Open a reader over the current file set, value files and posting
    /// files together.
    pub fn reader(&self, pin: bool) -> HistoryReader {
        HistoryReader {
            name: self.name.clone(),
            vals_table: self.vals_table.clone(),
            v_files: match pin {
                true => self.files.pin_snapshot(),
                false => self.files.ro_files(),
            },
            idx: self.ii.reader(pin),
            pinned: pin,
        }
    }
}

/// Snapshot reader over a history: pinned (or borrowed) value and
/// posting files plus the store tables behind a transaction.
pub struct HistoryReader {
    name: String,
    vals_table: String,
    v_files: Vec<Arc<FileItem>>,
    idx: invidx::IndexReader,
    pinned: bool,
}

impl Drop for HistoryReader {
    fn drop(&mut self) {
        if self.pinned {
            for item in self.v_files.iter() {
                if item.unpin() {
                    item.remove_files();
                }
            }
        }
    }
}

impl HistoryReader {
    pub fn as_items(&self) -> &[Arc<FileItem>] {
        &self.v_files
    }

    pub fn as_index(&self) -> &invidx::IndexReader {
        &self.idx
    }

    /// Value held by `key` just before `txnum`, or None when the key was
    /// not overwritten at or after `txnum`. `Some(empty)` means the key
    /// did not exist at `txnum`.
    ///
    /// The store is only consulted through `tx`, which carries the same
    /// snapshot this reader was created against; a prune running on the
    /// writer handle cannot disturb it.
    pub fn get_before(
        &self,
        tx: &dyn KvTx,
        key: &[u8],
        txnum: u64,
    ) -> Result<Option<Vec<u8>>> {
        let posted = match self.idx.seek(tx, key, txnum)? {
            Some(posted) => posted,
            None => return Ok(None),
        };

        let mut vkey = key.to_vec();
        vkey.extend_from_slice(&posted.to_be_bytes());

        for item in self.v_files.iter() {
            if item.start_txnum <= posted && posted < item.end_txnum {
                let offset = match item.index.lookup(&vkey) {
                    Some(offset) => offset,
                    None => break,
                };
                let (prev, _) = item.decomp.word_at(offset)?;
                return Ok(Some(prev));
            }
        }

        match tx.get_one(&self.vals_table, &vkey)? {
            Some(prev) => Ok(Some(prev)),
            None => err_at!(Fatal, msg: "{}: history value missing at {}", self.name, posted),
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
