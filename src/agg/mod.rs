//! Module `agg` implement the aggregator driving every column in
//! lockstep.
//!
//! Four domains, `accounts`, `storage`, `code` and `commitment`, and four
//! inverted indices, `logaddrs`, `logtopics`, `tracesfrom` and
//! `tracesto`, advance together under one txnum. The single writer feeds
//! updates and calls [Aggregator::finish_tx]; on a step boundary the
//! aggregator computes the commitment root, flushes the write buffers,
//! collates the previous step into files for every column, prunes the
//! store-resident copy, runs the merge loop, and notifies the root over
//! the [Aggregator::aggregated_roots] channel.
//!
//! Aggregating the previous step, not the one just closed, keeps one step
//! worth of recent writes in the store, which is why the very first
//! boundary produces no files.
//!
//! Readers are not blocked by any of this: a [ReaderContext] pins the
//! live file set and carries its own store snapshot, staying consistent
//! until dropped.

use log::{debug, info};

use std::{
    collections::BTreeSet,
    ffi, fs,
    sync::{mpsc, Arc},
};

use crate::{
    commitment::{self, CommitmentMode, TrieVariant},
    domain::{BuiltStep, Domain, DomainCollation, DomainReader, PrefixIter},
    files::FileItem,
    invidx::{IndexReader, InvertedIndex, TxnumIter},
    kv::KvTx,
    util::Cancel,
    wal, Error, Result, AGGREGATION_STEP,
};

// tags prefixed to state keys inside the commitment trie, keeping the
// key population prefix-free across the three columns.
const TAG_ACCOUNT: u8 = b'a';
const TAG_STORAGE: u8 = b's';
const TAG_CODE: u8 = b'c';

fn tagged(tag: u8, key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + key.len());
    out.push(tag);
    out.extend_from_slice(key);
    out
}

macro_rules! req_tx {
    ($self:ident) => {
        match $self.tx.as_deref() {
            Some(tx) => tx,
            None => return err_at!(InvalidInput, msg: "no transaction set"),
        }
    };
}

/// Configuration for the [Aggregator], use `set_*` methods to tune.
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory holding the frozen column files.
    pub dir: ffi::OsString,
    /// Scratch directory for operations that spill out of RAM.
    pub tmp_dir: ffi::OsString,
    /// Number of txnums frozen per step.
    ///
    /// Default: [crate::AGGREGATION_STEP]
    pub step: u64,
    /// How the commitment column is maintained.
    ///
    /// Default: [CommitmentMode::Direct]
    pub commitment_mode: CommitmentMode,
    /// Fanout of the commitment trie.
    ///
    /// Default: [TrieVariant::HexNibble]
    pub trie_variant: TrieVariant,
    /// RAM budget per write collector.
    ///
    /// Default: [wal::ram_budget], environment override included.
    pub wal_budget: usize,
    /// Drop all writes instead of buffering them, test rigs only.
    ///
    /// Default: false
    pub discard_wal: bool,
}

impl Config {
    pub fn new(dir: &ffi::OsStr, tmp_dir: &ffi::OsStr) -> Config {
        Config {
            dir: dir.to_os_string(),
            tmp_dir: tmp_dir.to_os_string(),
            step: AGGREGATION_STEP,
            commitment_mode: CommitmentMode::Direct,
            trie_variant: TrieVariant::HexNibble,
            wal_budget: wal::ram_budget(),
            discard_wal: false,
        }
    }

    pub fn set_step(&mut self, step: u64) -> &mut Self {
        self.step = step;
        self
    }

    pub fn set_commitment_mode(&mut self, mode: CommitmentMode) -> &mut Self {
        self.commitment_mode = mode;
        self
    }

    pub fn set_trie_variant(&mut self, variant: TrieVariant) -> &mut Self {
        self.trie_variant = variant;
        self
    }

    pub fn set_wal_budget(&mut self, budget: usize) -> &mut Self {
        self.wal_budget = budget;
        self
    }

    pub fn set_discard_wal(&mut self, discard: bool) -> &mut Self {
        self.discard_wal = discard;
        self
    }
}

/// The aggregator: all columns of the state engine under one txnum.
pub struct Aggregator {
    cfg: Config,

    accounts: Domain,
    storage: Domain,
    code: Domain,
    commitment: Domain,
    log_addrs: InvertedIndex,
    log_topics: InvertedIndex,
    traces_from: InvertedIndex,
    traces_to: InvertedIndex,

    tx: Option<Box<dyn KvTx>>,
    txnum: u64,
    block_num: u64,
    seek_txnum: u64,
    touched: BTreeSet<Vec<u8>>,

    roots_tx: mpsc::Sender<(u64, [u8; 32])>,
    roots_rx: Option<mpsc::Receiver<(u64, [u8; 32])>>,
    cancel: Cancel,
}

impl Aggregator {
    /// Create the engine over `cfg.dir`. Existing files are not scanned,
    /// use [Aggregator::open] or call [Aggregator::reopen_folder].
    pub fn new(cfg: Config) -> Result<Aggregator> {
        err_at!(IOError, fs::create_dir_all(&cfg.dir), "{:?}", cfg.dir)?;
        err_at!(IOError, fs::create_dir_all(&cfg.tmp_dir), "{:?}", cfg.tmp_dir)?;

        let domain =
            |name| Domain::new(&cfg.dir, name, cfg.step, cfg.wal_budget, cfg.discard_wal);
        let index = |name| {
            InvertedIndex::new(&cfg.dir, name, cfg.step, cfg.wal_budget, cfg.discard_wal)
        };

        let (roots_tx, roots_rx) = mpsc::channel();
        let val = Aggregator {
            accounts: domain("accounts"),
            storage: domain("storage"),
            code: domain("code"),
            commitment: domain("commitment"),
            log_addrs: index("logaddrs"),
            log_topics: index("logtopics"),
            traces_from: index("tracesfrom"),
            traces_to: index("tracesto"),
            cfg,

            tx: None,
            txnum: 0,
            block_num: 0,
            seek_txnum: 0,
            touched: BTreeSet::new(),

            roots_tx,
            roots_rx: Some(roots_rx),
            cancel: Cancel::new(),
        };
        Ok(val)
    }

    /// Create the engine and scan `cfg.dir` for existing column files.
    pub fn open(cfg: Config) -> Result<Aggregator> {
        let mut agg = Aggregator::new(cfg)?;
        agg.reopen_folder()?;
        Ok(agg)
    }

    /// Re-scan the data directory across every column.
    pub fn reopen_folder(&mut self) -> Result<()> {
        for domain in [&self.accounts, &self.storage, &self.code, &self.commitment].iter()
        {
            domain.reopen_folder()?;
        }
        for index in [
            &self.log_addrs,
            &self.log_topics,
            &self.traces_from,
            &self.traces_to,
        ]
        .iter()
        {
            index.reopen_folder()?;
        }
        self.seek_txnum = self.end_txnum_minimax();
        Ok(())
    }

    /// Hand over the unique read-write store handle.
    pub fn set_tx(&mut self, tx: Box<dyn KvTx>) {
        self.tx = Some(tx);
    }

    /// Take the store handle back, typically to commit it.
    pub fn take_tx(&mut self) -> Option<Box<dyn KvTx>> {
        self.tx.take()
    }

    /// Stamp subsequent updates with `txnum`.
    pub fn set_txnum(&mut self, txnum: u64) {
        self.txnum = txnum;
        self.accounts.set_txnum(txnum);
        self.storage.set_txnum(txnum);
        self.code.set_txnum(txnum);
        self.commitment.set_txnum(txnum);
        self.log_addrs.set_txnum(txnum);
        self.log_topics.set_txnum(txnum);
        self.traces_from.set_txnum(txnum);
        self.traces_to.set_txnum(txnum);
    }

    pub fn set_block_num(&mut self, block_num: u64) {
        self.block_num = block_num;
    }

    pub fn to_txnum(&self) -> u64 {
        self.txnum
    }

    /// Highest txnum (exclusive) already built into files, the recovery
    /// watermark.
    pub fn to_seek_txnum(&self) -> u64 {
        self.seek_txnum
    }

    /// Lowest end-txnum across every column's file coverage. Columns
    /// that never produced a file, every step of theirs being empty, do
    /// not hold the watermark back.
    pub fn end_txnum_minimax(&self) -> u64 {
        let domains = [&self.accounts, &self.storage, &self.code, &self.commitment];
        let indices = [
            &self.log_addrs,
            &self.log_topics,
            &self.traces_from,
            &self.traces_to,
        ];
        domains
            .iter()
            .map(|d| d.end_txnum_max())
            .chain(indices.iter().map(|i| i.end_txnum_max()))
            .filter(|end| *end > 0)
            .min()
            .unwrap_or(0)
    }

    /// Write the packed account record for `addr`.
    pub fn update_account_data(&mut self, addr: &[u8], data: &[u8]) -> Result<()> {
        let tx = req_tx!(self);
        self.accounts.put(tx, addr, data)?;
        self.touch(TAG_ACCOUNT, addr);
        Ok(())
    }

    /// Write the contract code for `addr`.
    pub fn update_account_code(&mut self, addr: &[u8], code: &[u8]) -> Result<()> {
        let tx = req_tx!(self);
        self.code.put(tx, addr, code)?;
        self.touch(TAG_CODE, addr);
        Ok(())
    }

    /// Write one storage slot, keyed `addr ∥ loc`.
    pub fn write_account_storage(
        &mut self,
        addr: &[u8],
        loc: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let tx = req_tx!(self);
        let mut key = addr.to_vec();
        key.extend_from_slice(loc);
        self.storage.put(tx, &key, value)?;
        self.touch(TAG_STORAGE, &key);
        Ok(())
    }

    /// Delete the account: its record, its code, and every storage slot
    /// under its prefix.
    pub fn delete_account(&mut self, addr: &[u8]) -> Result<()> {
        let record = self.cfg.commitment_mode != CommitmentMode::None;
        let tx = req_tx!(self);

        self.accounts.delete(tx, addr)?;
        self.code.delete(tx, addr)?;

        let slots: Vec<Vec<u8>> = {
            let reader = self.storage.reader(false);
            let mut slots = vec![];
            for pair in reader.iterate_prefix(tx, addr)? {
                let (key, _) = pair?;
                slots.push(key);
            }
            slots
        };
        for key in slots.into_iter() {
            self.storage.delete(tx, &key)?;
            if record {
                self.touched.insert(tagged(TAG_STORAGE, &key));
            }
        }
        if record {
            self.touched.insert(tagged(TAG_ACCOUNT, addr));
            self.touched.insert(tagged(TAG_CODE, addr));
        }
        Ok(())
    }

    pub fn add_log_addr(&mut self, addr: &[u8]) -> Result<()> {
        let tx = req_tx!(self);
        self.log_addrs.add(tx, addr)
    }

    pub fn add_log_topic(&mut self, topic: &[u8]) -> Result<()> {
        let tx = req_tx!(self);
        self.log_topics.add(tx, topic)
    }

    pub fn add_trace_from(&mut self, addr: &[u8]) -> Result<()> {
        let tx = req_tx!(self);
        self.traces_from.add(tx, addr)
    }

    pub fn add_trace_to(&mut self, addr: &[u8]) -> Result<()> {
        let tx = req_tx!(self);
        self.traces_to.add(tx, addr)
    }

    fn touch(&mut self, tag: u8, key: &[u8]) {
        if self.cfg.commitment_mode == CommitmentMode::None {
            return;
        }
        self.touched.insert(tagged(tag, key));
    }

    /// Close the current txnum. On a step boundary this computes the
    /// commitment, freezes the previous step into files, prunes the
    /// store copy, merges, and emits the root.
    pub fn finish_tx(&mut self) -> Result<()> {
        self.flush()?;
        if (self.txnum + 1) % self.cfg.step != 0 {
            return Ok(());
        }

        let closing_step = self.txnum / self.cfg.step;
        // an untouched step writes nothing, not even the marker, so that
        // it produces no files and no root emission below.
        let save_state = !self.touched.is_empty();
        let root = self.compute_commitment(save_state, false)?;
        self.flush()?;

        if closing_step == 0 {
            return Ok(()); // leave one step worth in the store
        }
        let step_num = closing_step - 1;
        if (step_num + 1) * self.cfg.step <= self.seek_txnum {
            return Ok(()); // already aggregated before a restart
        }

        let emitted = self.aggregate(step_num)?;
        self.merge_loop()?;
        self.seek_txnum = (step_num + 1) * self.cfg.step;

        if emitted {
            info!(
                target: "strata",
                "aggregated step {}, txnum {}", step_num, self.txnum
            );
            self.roots_tx.send((step_num, root)).ok();
        }
        Ok(())
    }

    /// Drain every column's write buffers into the store.
    pub fn flush(&mut self) -> Result<()> {
        let tx = req_tx!(self);
        self.accounts.flush(tx)?;
        self.storage.flush(tx)?;
        self.code.flush(tx)?;
        self.commitment.flush(tx)?;
        self.log_addrs.flush(tx)?;
        self.log_topics.flush(tx)?;
        self.traces_from.flush(tx)?;
        self.traces_to.flush(tx)?;
        Ok(())
    }

    /// Fold the touched keys into the commitment trie and return the new
    /// root. With `save_state` the `(block_num, txnum, root)` recovery
    /// marker is persisted alongside.
    pub fn compute_commitment(&mut self, save_state: bool, trace: bool) -> Result<[u8; 32]> {
        if self.cfg.commitment_mode == CommitmentMode::None {
            return Ok(commitment::empty_root());
        }
        let tx = req_tx!(self);
        let touched = std::mem::take(&mut self.touched);

        let (root, updates) = {
            let accounts = self.accounts.reader(false);
            let storage = self.storage.reader(false);
            let code = self.code.reader(false);
            let branches = self.commitment.reader(false);

            let mut leaves = std::collections::BTreeMap::new();
            for tagged in touched.iter() {
                let value = match tagged[0] {
                    TAG_ACCOUNT => accounts.get(tx, &tagged[1..])?,
                    TAG_STORAGE => storage.get(tx, &tagged[1..])?,
                    TAG_CODE => code.get(tx, &tagged[1..])?,
                    tag => return err_at!(Fatal, msg: "unknown touch tag {}", tag),
                };
                let leaf = value.map(|value| commitment::leaf_hash(tagged, &value));
                leaves.insert(tagged.clone(), leaf);
            }

            commitment::compute_root(self.cfg.trie_variant, &leaves, |prefix| {
                branches.get(tx, prefix)
            })?
        };

        if trace {
            debug!(
                target: "strata",
                "commitment root {:?}, {} branches touched", &root[..4], updates.len()
            );
        }
        for (prefix, enc) in updates.into_iter() {
            match enc {
                Some(enc) => self.commitment.put(tx, &prefix, &enc)?,
                None => self.commitment.delete(tx, &prefix)?,
            }
        }
        if save_state {
            let marker = commitment::encode_state(self.block_num, self.txnum, &root);
            self.commitment.put(tx, commitment::STATE_KEY, &marker)?;
        }
        Ok(root)
    }

    /// Replay the recovery marker: position the engine after the last
    /// committed txnum. Return `(block_num, txnum)` of the marker.
    pub fn seek_commitment(&mut self) -> Result<(u64, u64)> {
        let tx = req_tx!(self);
        let marker = self.commitment.reader(false).get(tx, commitment::STATE_KEY)?;
        let (block_num, txnum) = match marker {
            Some(data) => {
                let (block_num, txnum, _root) = commitment::decode_state(&data)?;
                (block_num, txnum)
            }
            None => (0, 0),
        };

        self.block_num = block_num;
        self.seek_txnum = self.end_txnum_minimax();
        match txnum {
            0 => self.set_txnum(0),
            txnum => self.set_txnum(txnum + 1),
        }
        Ok((block_num, txnum))
    }

    // freeze `step_num` into files across every column: domains collate
    // serially on this thread, builds fan out; the four indices collate
    // and build in parallel. Return whether any files were produced.
    fn aggregate(&mut self, step_num: u64) -> Result<bool> {
        let tx = req_tx!(self);
        let cancel = self.cancel.child();
        let (txfrom, txto) = (step_num * self.cfg.step, (step_num + 1) * self.cfg.step);

        let domains = [&self.accounts, &self.storage, &self.code, &self.commitment];
        let indices = [
            &self.log_addrs,
            &self.log_topics,
            &self.traces_from,
            &self.traces_to,
        ];

        let mut collations: Vec<DomainCollation> = vec![];
        for domain in domains.iter() {
            collations.push(domain.collate(tx, step_num, &cancel)?);
        }

        let mut dom_built: Vec<Result<Option<BuiltStep>>> =
            (0..domains.len()).map(|_| Ok(None)).collect();
        let mut idx_built: Vec<Result<Option<Arc<FileItem>>>> =
            (0..indices.len()).map(|_| Ok(None)).collect();
        {
            let cancel = &cancel;
            rayon::scope(|s| {
                let dom_slots = dom_built.iter_mut().zip(domains.iter().zip(collations.iter()));
                for (slot, (domain, collation)) in dom_slots {
                    s.spawn(move |_| {
                        *slot = match collation.is_empty() {
                            true => Ok(None),
                            false => domain
                                .build(tx, collation, cancel)
                                .map(Some)
                                .map_err(|err| {
                                    cancel.cancel();
                                    err
                                }),
                        };
                    });
                }
                for (slot, index) in idx_built.iter_mut().zip(indices.iter()) {
                    s.spawn(move |_| {
                        *slot = (|| {
                            let collation = index.collate(tx, step_num, cancel)?;
                            match collation.is_empty() {
                                true => Ok(None),
                                false => index.build(&collation, cancel).map(Some),
                            }
                        })()
                        .map_err(|err| {
                            cancel.cancel();
                            err
                        });
                    });
                }
            });
        }

        let mut any = false;
        for (domain, built) in domains.iter().zip(dom_built.into_iter()) {
            if let Some(built) = built? {
                domain.integrate(built);
                any = true;
            }
        }
        for (index, built) in indices.iter().zip(idx_built.into_iter()) {
            if let Some(item) = built? {
                index.integrate(item);
                any = true;
            }
        }

        for domain in domains.iter() {
            domain.prune(tx, step_num, txfrom, txto, &cancel)?;
        }
        for index in indices.iter() {
            index.prune(tx, txfrom, txto, &cancel)?;
        }

        Ok(any)
    }

    /// Run merge passes until no column has anything left to fold.
    pub fn merge_loop(&self) -> Result<()> {
        while self.merge_pass()? {}
        Ok(())
    }

    // one merge pass: accounts, storage, code and the indices first, the
    // commitment column strictly after, its branch values reference
    // account and storage keys settled by the first phase.
    fn merge_pass(&self) -> Result<bool> {
        let cancel = self.cancel.child();

        let domains = [&self.accounts, &self.storage, &self.code];
        let indices = [
            &self.log_addrs,
            &self.log_topics,
            &self.traces_from,
            &self.traces_to,
        ];

        let mut dom_merged: Vec<Result<bool>> =
            (0..domains.len()).map(|_| Ok(false)).collect();
        let mut idx_merged: Vec<Result<bool>> =
            (0..indices.len()).map(|_| Ok(false)).collect();
        {
            let cancel = &cancel;
            rayon::scope(|s| {
                for (slot, domain) in dom_merged.iter_mut().zip(domains.iter()) {
                    s.spawn(move |_| {
                        *slot = domain.merge_step(cancel).map_err(|err| {
                            cancel.cancel();
                            err
                        });
                    });
                }
                for (slot, index) in idx_merged.iter_mut().zip(indices.iter()) {
                    s.spawn(move |_| {
                        *slot = index
                            .merge_step(cancel)
                            .map(|retired| retired.is_some())
                            .map_err(|err| {
                                cancel.cancel();
                                err
                            });
                    });
                }
            });
        }

        let mut any = false;
        for merged in dom_merged.into_iter().chain(idx_merged.into_iter()) {
            any = merged? || any;
        }

        // second phase, behind the barrier.
        any = self.commitment.merge_step(&cancel)? || any;

        Ok(any)
    }

    /// Open a reader context: a consistent snapshot of every column's
    /// files bound to the caller's own store snapshot.
    pub fn make_context(&self, tx: Box<dyn KvTx>) -> ReaderContext {
        ReaderContext {
            tx,
            accounts: self.accounts.reader(true),
            storage: self.storage.reader(true),
            code: self.code.reader(true),
            commitment: self.commitment.reader(true),
            log_addrs: self.log_addrs.reader(true),
            log_topics: self.log_topics.reader(true),
            traces_from: self.traces_from.reader(true),
            traces_to: self.traces_to.reader(true),
        }
    }

    /// Receive `(step, root)` for every aggregated step. Single
    /// consumer, the receiver can be taken once.
    pub fn aggregated_roots(&mut self) -> Result<mpsc::Receiver<(u64, [u8; 32])>> {
        match self.roots_rx.take() {
            Some(rx) => Ok(rx),
            None => err_at!(InvalidInput, msg: "aggregated_roots already taken"),
        }
    }

    /// Whether any reader still holds a pin on any column's files.
    pub fn has_pinned_readers(&self) -> bool {
        let sets = [
            self.accounts.as_files(),
            self.storage.as_files(),
            self.code.as_files(),
            self.commitment.as_files(),
            self.log_addrs.as_files(),
            self.log_topics.as_files(),
            self.traces_from.as_files(),
            self.traces_to.as_files(),
        ];
        let mut live = sets
            .iter()
            .flat_map(|set| set.walk().into_iter())
            .collect::<Vec<Arc<FileItem>>>();
        live.extend(
            [&self.accounts, &self.storage, &self.code, &self.commitment]
                .iter()
                .flat_map(|d| {
                    let mut items = d.as_history().as_files().walk();
                    items.extend(d.as_history().as_index().as_files().walk());
                    items
                }),
        );
        live.iter().any(|item| item.to_refcount() != 0)
    }

    /// Stop background work and drop the engine. The store handle, if
    /// still held, is returned to the caller uncommitted.
    pub fn close(mut self) -> Option<Box<dyn KvTx>> {
        self.cancel.cancel();
        self.tx.take()
    }
}

/// Read-only view composed over every column: a pinned snapshot of the
/// file stacks plus the store snapshot `tx` carries. Reads stay
/// consistent while newer steps are aggregated and merged concurrently.
pub struct ReaderContext {
    tx: Box<dyn KvTx>,
    accounts: DomainReader,
    storage: DomainReader,
    code: DomainReader,
    commitment: DomainReader,
    log_addrs: IndexReader,
    log_topics: IndexReader,
    traces_from: IndexReader,
    traces_to: IndexReader,
}

impl ReaderContext {
    /// Latest packed account record for `addr`.
    pub fn read_account_data(&self, addr: &[u8]) -> Result<Option<Vec<u8>>> {
        self.accounts.get(self.tx.as_ref(), addr)
    }

    /// Account record as of `txnum`.
    pub fn read_account_data_before_txnum(
        &self,
        addr: &[u8],
        txnum: u64,
    ) -> Result<Option<Vec<u8>>> {
        self.accounts.get_before_txnum(self.tx.as_ref(), addr, txnum)
    }

    /// Latest value of the storage slot `addr ∥ loc`.
    pub fn read_account_storage(&self, addr: &[u8], loc: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut key = addr.to_vec();
        key.extend_from_slice(loc);
        self.storage.get(self.tx.as_ref(), &key)
    }

    /// Storage slot as of `txnum`.
    pub fn read_account_storage_before_txnum(
        &self,
        addr: &[u8],
        loc: &[u8],
        txnum: u64,
    ) -> Result<Option<Vec<u8>>> {
        let mut key = addr.to_vec();
        key.extend_from_slice(loc);
        self.storage.get_before_txnum(self.tx.as_ref(), &key, txnum)
    }

    /// Latest contract code for `addr`.
    pub fn read_account_code(&self, addr: &[u8]) -> Result<Option<Vec<u8>>> {
        self.code.get(self.tx.as_ref(), addr)
    }

    /// Contract code as of `txnum`.
    pub fn read_account_code_before_txnum(
        &self,
        addr: &[u8],
        txnum: u64,
    ) -> Result<Option<Vec<u8>>> {
        self.code.get_before_txnum(self.tx.as_ref(), addr, txnum)
    }

    /// Latest stored commitment value under `key`, branch nodes and the
    /// recovery marker alike.
    pub fn read_commitment(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.commitment.get(self.tx.as_ref(), key)
    }

    /// Commitment value as of `txnum`.
    pub fn read_commitment_before_txnum(
        &self,
        key: &[u8],
        txnum: u64,
    ) -> Result<Option<Vec<u8>>> {
        self.commitment.get_before_txnum(self.tx.as_ref(), key, txnum)
    }

    /// Every key under `prefix` in the storage column, newest value per
    /// key, deleted slots skipped.
    pub fn storage_prefix_iter(&self, prefix: &[u8]) -> Result<PrefixIter> {
        self.storage.iterate_prefix(self.tx.as_ref(), prefix)
    }

    /// Ascending txnums at which `addr` appeared in a log, within
    /// `[from, to)`.
    pub fn log_addr_iter(&self, addr: &[u8], from: u64, to: u64) -> Result<TxnumIter> {
        self.log_addrs.iter(self.tx.as_ref(), addr, from, to)
    }

    /// Ascending txnums at which `topic` appeared in a log.
    pub fn log_topic_iter(&self, topic: &[u8], from: u64, to: u64) -> Result<TxnumIter> {
        self.log_topics.iter(self.tx.as_ref(), topic, from, to)
    }

    /// Ascending txnums at which `addr` originated a trace.
    pub fn trace_from_iter(&self, addr: &[u8], from: u64, to: u64) -> Result<TxnumIter> {
        self.traces_from.iter(self.tx.as_ref(), addr, from, to)
    }

    /// Ascending txnums at which `addr` received a trace.
    pub fn trace_to_iter(&self, addr: &[u8], from: u64, to: u64) -> Result<TxnumIter> {
        self.traces_to.iter(self.tx.as_ref(), addr, from, to)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
